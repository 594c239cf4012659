//! Service configuration, loaded once at startup from an optional TOML file
//! plus environment overrides

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::http::HeaderName;
use tracing::debug;

use crate::error::VanatuError;
use crate::logging::{LogConfig, LogFormat};
use crate::repo::validate_repo_name;
use crate::signature::SignatureAlgorithm;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:7409";
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature";
pub const DEFAULT_BUILD_TARGET: &str = "build:vanatu";
pub const DEFAULT_INSTALL_COMMAND: &str = "npm ci";
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_JOBS: usize = 50;

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("repos")
}

fn default_signature_header() -> String {
    DEFAULT_SIGNATURE_HEADER.to_string()
}

fn default_build_target() -> String {
    DEFAULT_BUILD_TARGET.to_string()
}

fn default_install_command() -> String {
    DEFAULT_INSTALL_COMMAND.to_string()
}

fn default_step_timeout_secs() -> u64 {
    DEFAULT_STEP_TIMEOUT_SECS
}

fn default_wait_for_pipeline() -> bool {
    true
}

fn default_max_jobs() -> usize {
    DEFAULT_MAX_JOBS
}

#[derive(Debug, Deserialize, Clone)]
pub struct VanatuConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Base directory under which every managed checkout lives
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    #[serde(default = "default_signature_header")]
    pub signature_header: String,
    #[serde(default)]
    pub signature_algorithm: SignatureAlgorithm,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_build_target")]
    pub build_target: String,
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Respond only after the pipeline settles (200/500) instead of as soon as it starts
    #[serde(default = "default_wait_for_pipeline")]
    pub wait_for_pipeline: bool,
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
    #[serde(default)]
    pub logging: LogConfig,
    /// Repository name -> clone URL
    #[serde(default)]
    pub repositories: HashMap<String, String>,
}

impl VanatuConfig {
    /// Parse a config from TOML text without applying overrides or validation.
    pub fn from_toml(text: &str) -> Result<Self, VanatuError> {
        Ok(toml::from_str(text)?)
    }

    /// Override file values with the process environment.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), VanatuError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("HUB_SECRET") {
            self.webhook_secret = Some(secret);
        }
        if let Some(header) = lookup("HUB_HEADER") {
            self.signature_header = header;
        }
        if let Some(dir) = lookup("BASE_CONTENT_DIR") {
            self.content_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(port) = lookup("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| {
                VanatuError::ConfigError(format!("PORT is not a valid port number: '{}'", port))
            })?;
            let host = self
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            self.bind_address = format!("{}:{}", host, port);
        }
        if let Some(target) = lookup("BUILD_TARGET") {
            self.build_target = target;
        }
        if let Some(urls) = lookup("SSH_URLS") {
            self.repositories = serde_json::from_str(&urls).map_err(|e| {
                VanatuError::ConfigError(format!(
                    "SSH_URLS must be a JSON object of name to clone URL: {}",
                    e
                ))
            })?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = log_level_from_env(&level);
        }
        if let Some(build_type) = lookup("BUILD_TYPE") {
            self.logging.format = match build_type.as_str() {
                "prod" => LogFormat::Json,
                _ => LogFormat::Pretty,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), VanatuError> {
        if self.secret().is_none() {
            return Err(VanatuError::ConfigError(
                "webhook secret is missing (set webhook_secret or HUB_SECRET)".to_string(),
            ));
        }
        if self.signature_header.trim().is_empty() {
            return Err(VanatuError::ConfigError(
                "signature header name is missing (set signature_header or HUB_HEADER)"
                    .to_string(),
            ));
        }
        if HeaderName::from_bytes(self.signature_header.as_bytes()).is_err() {
            return Err(VanatuError::ConfigError(format!(
                "signature header '{}' is not a valid HTTP header name",
                self.signature_header
            )));
        }
        if self.build_target.trim().is_empty() {
            return Err(VanatuError::ConfigError(
                "build_target must not be empty".to_string(),
            ));
        }
        if self.install_command.split_whitespace().next().is_none() {
            return Err(VanatuError::ConfigError(
                "install_command must not be empty".to_string(),
            ));
        }
        if self.step_timeout_secs == 0 {
            return Err(VanatuError::ConfigError(
                "step_timeout_secs must be greater than zero".to_string(),
            ));
        }
        for (name, url) in &self.repositories {
            validate_repo_name(name).map_err(|e| {
                VanatuError::ConfigError(format!("repositories.{}: {}", name, e))
            })?;
            if url.trim().is_empty() {
                return Err(VanatuError::ConfigError(format!(
                    "repositories.{}: clone URL is empty",
                    name
                )));
            }
        }
        Ok(())
    }

    /// The shared secret, if one is configured and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref().filter(|s| !s.is_empty())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn clone_url_for(&self, repo_name: &str) -> Option<&str> {
        self.repositories.get(repo_name).map(String::as_str)
    }
}

/// Numeric levels 0 to 5 run from errors only to everything; anything else is
/// used as a filter directive as-is.
fn log_level_from_env(level: &str) -> String {
    match level.trim().parse::<u8>() {
        Ok(0) => "error",
        Ok(1) => "warn",
        Ok(2 | 3) => "info",
        Ok(4) => "debug",
        Ok(_) => "trace",
        Err(_) => return level.trim().to_string(),
    }
    .to_string()
}

/// Load the configuration file, override from the environment and validate.
///
/// A missing file is not an error: every setting then comes from defaults and
/// the environment.
pub fn load_config(path: impl AsRef<Path>) -> Result<VanatuConfig, VanatuError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

pub fn load_config_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<VanatuConfig, VanatuError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();
    let config_str = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config file at '{}', using defaults", path.display());
            String::new()
        }
        Err(e) => {
            return Err(VanatuError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let mut config = VanatuConfig::from_toml(&config_str).map_err(|e| {
        VanatuError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    config.apply_env_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}
