//! Webhook payload parsing and event filtering

use serde::Deserialize;
use serde_json::Value;

use crate::error::VanatuError;

/// Action marking a finished check
pub const COMPLETED_ACTION: &str = "completed";
/// Conclusion of a passing check
pub const SUCCESS_CONCLUSION: &str = "success";

/// Repository as referenced by the payload: either a bare name that is looked
/// up in configuration, or an inline repository object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RepositoryRef {
    Named(String),
    Inline {
        name: String,
        #[serde(default)]
        ssh_url: Option<String>,
        #[serde(default)]
        clone_url: Option<String>,
    },
}

impl RepositoryRef {
    pub fn name(&self) -> &str {
        match self {
            RepositoryRef::Named(name) => name,
            RepositoryRef::Inline { name, .. } => name,
        }
    }

    /// Clone URL carried by the payload itself, ssh preferred.
    pub fn inline_url(&self) -> Option<&str> {
        match self {
            RepositoryRef::Named(_) => None,
            RepositoryRef::Inline {
                ssh_url, clone_url, ..
            } => ssh_url
                .as_deref()
                .or(clone_url.as_deref())
                .filter(|url| !url.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    action: String,
    #[serde(default)]
    conclusion: Option<Value>,
    #[serde(default)]
    check_suite: Option<Value>,
    #[serde(default)]
    check_run: Option<Value>,
    #[serde(default)]
    repository: Option<Value>,
}

/// A conclusion that is not a string still counts as present, so it can never
/// pass for `success`.
fn conclusion_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn nested_conclusion(summary: Option<Value>) -> Option<String> {
    match summary? {
        Value::Object(mut fields) => fields.remove("conclusion").and_then(conclusion_text),
        _ => None,
    }
}

/// The parts of a delivery the pipeline cares about
///
/// The repository is kept as raw JSON until the event is known to qualify, so
/// ignored events never fail on its shape.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub action: String,
    pub conclusion: Option<String>,
    pub repository: Option<Value>,
}

impl WebhookEvent {
    /// Parse the raw request body.
    ///
    /// Only `action` is required. The conclusion comes from a top-level
    /// `conclusion`, then `check_suite.conclusion`, then `check_run.conclusion`.
    pub fn parse(body: &[u8]) -> Result<Self, VanatuError> {
        let raw: RawPayload = serde_json::from_slice(body)
            .map_err(|e| VanatuError::PayloadInvalid(e.to_string()))?;

        let conclusion = raw
            .conclusion
            .and_then(conclusion_text)
            .or_else(|| nested_conclusion(raw.check_suite))
            .or_else(|| nested_conclusion(raw.check_run));

        Ok(Self {
            action: raw.action,
            conclusion,
            repository: raw.repository.filter(|v| !v.is_null()),
        })
    }

    /// Interpret the `repository` field as a bare name or an inline object.
    pub fn repository_ref(&self) -> Result<Option<RepositoryRef>, VanatuError> {
        self.repository
            .clone()
            .map(serde_json::from_value::<RepositoryRef>)
            .transpose()
            .map_err(|_| {
                VanatuError::PayloadInvalid(
                    "repository must be a name or an object with a name".to_string(),
                )
            })
    }
}

/// Whether the event warrants running the pipeline.
///
/// The action must be `completed`; when a conclusion is present it must be
/// `success`.
pub fn should_process(event: &WebhookEvent) -> bool {
    event.action == COMPLETED_ACTION
        && event
            .conclusion
            .as_deref()
            .is_none_or(|c| c == SUCCESS_CONCLUSION)
}
