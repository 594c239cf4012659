//! Webhook signature verification
//!
//! The provider signs the raw request body with HMAC using the shared secret
//! and sends `"<algo>=" + hex(mac)` in a configurable header.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use sha2::Sha256;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    pub fn prefix(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1=",
            SignatureAlgorithm::Sha256 => "sha256=",
        }
    }

    /// Compute the header value the provider would send for `payload`.
    ///
    /// Returns None for an empty secret.
    pub fn sign(&self, secret: &[u8], payload: &[u8]) -> Option<String> {
        if secret.is_empty() {
            return None;
        }
        let digest = match self {
            SignatureAlgorithm::Sha1 => {
                let mut mac = HmacSha1::new_from_slice(secret).ok()?;
                mac.update(payload);
                hex::encode(mac.finalize().into_bytes())
            }
            SignatureAlgorithm::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(secret).ok()?;
                mac.update(payload);
                hex::encode(mac.finalize().into_bytes())
            }
        };
        Some(format!("{}{}", self.prefix(), digest))
    }
}

/// Verify a `sha1=` signature over the raw body.
pub fn verify(raw_body: &[u8], received: Option<&str>, secret: &[u8]) -> bool {
    verify_with(SignatureAlgorithm::Sha1, raw_body, received, secret)
}

/// Verify a signature with the given algorithm.
///
/// A missing header, an empty secret and a mismatch all yield false.
pub fn verify_with(
    algorithm: SignatureAlgorithm,
    raw_body: &[u8],
    received: Option<&str>,
    secret: &[u8],
) -> bool {
    let Some(received) = received else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }
    let Some(digest) = received.strip_prefix(algorithm.prefix()) else {
        return false;
    };
    // the provider always sends lowercase hex
    if !digest
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }
    let Ok(digest) = hex::decode(digest) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha1 => {
            let Ok(mut mac) = HmacSha1::new_from_slice(secret) else {
                return false;
            };
            mac.update(raw_body);
            mac.verify_slice(&digest).is_ok()
        }
        SignatureAlgorithm::Sha256 => {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                return false;
            };
            mac.update(raw_body);
            mac.verify_slice(&digest).is_ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"It's a Secret to Everybody";

    #[test]
    fn test_known_sha1_vector() {
        // RFC 2202 test case 2
        let sig = SignatureAlgorithm::Sha1
            .sign(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(sig, "sha1=effcdf6ae5eb2fa2d27416d5f184df9c259a7c79");
        assert!(verify(b"what do ya want for nothing?", Some(&sig), b"Jefe"));
    }

    #[test]
    fn test_valid_signature_over_raw_bytes() {
        let body = br#"{"action":"completed","repository":"charcoal-client"}"#;
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, body).unwrap();
        assert!(sig.starts_with("sha1="));
        assert!(verify(body, Some(&sig), SECRET));
    }

    #[test]
    fn test_reserialized_body_does_not_verify() {
        let body = br#"{"action":"completed","repository":"charcoal-client"}"#;
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, body).unwrap();
        let spaced = br#"{ "action": "completed", "repository": "charcoal-client" }"#;
        assert!(!verify(spaced, Some(&sig), SECRET));
    }

    #[test]
    fn test_any_flipped_bit_fails() {
        let body = b"hello webhook".to_vec();
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, &body).unwrap();

        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut tampered = body.clone();
                tampered[byte] ^= 1 << bit;
                assert!(!verify(&tampered, Some(&sig), SECRET));
            }
        }

        let sig_bytes = sig.as_bytes();
        for idx in 0..sig_bytes.len() {
            let mut tampered = sig_bytes.to_vec();
            tampered[idx] ^= 0x01;
            let tampered = String::from_utf8_lossy(&tampered).into_owned();
            assert!(!verify(&body, Some(&tampered), SECRET));
        }
    }

    #[test]
    fn test_missing_header_or_secret_is_unauthenticated() {
        let body = b"{}";
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, body).unwrap();
        assert!(!verify(body, None, SECRET));
        assert!(!verify(body, Some(&sig), b""));
        assert!(SignatureAlgorithm::Sha1.sign(b"", body).is_none());
    }

    #[test]
    fn test_comparison_is_exact() {
        let body = b"payload";
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, body).unwrap();
        assert!(!verify(body, Some(&sig.to_uppercase()), SECRET));
        assert!(!verify(body, Some(sig.trim_start_matches("sha1=")), SECRET));
        assert!(!verify(body, Some("sha1=232323"), SECRET));
    }

    #[test]
    fn test_malformed_digest_is_rejected() {
        let body = b"payload";
        let sig = SignatureAlgorithm::Sha1.sign(SECRET, body).unwrap();
        let digest = sig.trim_start_matches("sha1=");
        assert!(!verify(body, Some(&format!("sha1={}", &digest[1..])), SECRET));
        assert!(!verify(body, Some(&format!("sha1={}00", digest)), SECRET));
        assert!(!verify(body, Some(&format!("sha1= {}", digest)), SECRET));
        assert!(!verify(body, Some(&format!("SHA1={}", digest)), SECRET));
        assert!(!verify(body, Some("sha1=zz"), SECRET));
        assert!(!verify(body, Some("sha1="), SECRET));
    }

    #[test]
    fn test_sha256_uses_its_own_prefix() {
        let body = b"payload";
        let sig = SignatureAlgorithm::Sha256.sign(SECRET, body).unwrap();
        assert!(sig.starts_with("sha256="));
        assert!(verify_with(SignatureAlgorithm::Sha256, body, Some(&sig), SECRET));
        assert!(!verify(body, Some(&sig), SECRET));
    }
}
