//! Client for the external validation engine.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use torii_core::{Issue, IssueFactory};

use crate::config::ValidatorConfig;

#[derive(Debug, Error)]
pub enum ValidatorError {
    /// The engine could not be reached: connect failure or timeout.
    #[error("validation engine unreachable: {0}")]
    Transport(String),
    /// The engine answered with a non-success status.
    #[error("validation engine returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// The engine answered 2xx but the body was not an OperationOutcome.
    #[error("validation engine returned an unreadable response: {0}")]
    Decode(String),
}

impl ValidatorError {
    /// Every failed call degrades to exactly one reportable issue.
    pub fn to_issue(&self, issues: &IssueFactory) -> Issue {
        match self {
            ValidatorError::Transport(_) => issues.transport_failure(&self.to_string()),
            ValidatorError::Status { .. } | ValidatorError::Decode(_) => {
                issues.protocol_failure(&self.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorClient {
    http: reqwest::Client,
    url: String,
}

impl ValidatorClient {
    pub fn new(cfg: &ValidatorConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout()).build()?;
        Ok(Self {
            http,
            url: cfg.url.clone(),
        })
    }

    /// Sends the annotated document under the caller's Content-Type and
    /// returns the engine's issue list. A missing issue field in the
    /// response counts as no findings.
    pub async fn validate(
        &self,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Vec<Value>, ValidatorError> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| ValidatorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ValidatorError::Status { status, body });
        }

        let outcome: Value = response
            .json()
            .await
            .map_err(|e| ValidatorError::Decode(e.to_string()))?;
        Ok(outcome
            .get("issue")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}
