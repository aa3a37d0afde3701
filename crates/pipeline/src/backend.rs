//! Client for the image-generation backend that executes worker steps.

use std::time::Duration;

use async_trait::async_trait;
use atelier_core::types::JobId;
use serde::{Deserialize, Serialize};

use crate::plan::StepInput;

/// Output of one backend step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
}

/// Errors from the generation backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status code.
    #[error("Generation backend error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// The step was rejected before reaching the backend.
    #[error("Step rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Execute one step and return the artifact it produced.
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError>;
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StepRequest<'a> {
    job_id: JobId,
    step: crate::plan::StepKind,
    inputs: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StepResponse {
    artifact_url: String,
}

/// HTTP client for the generation backend's `POST /v1/steps` endpoint.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    /// Create a backend client whose requests time out after `timeout`.
    ///
    /// * `base_url` - e.g. `http://localhost:8188`, without trailing slash.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create a backend client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ensure the response has a success status code, capturing the body
    /// of failed responses for diagnostics.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(BackendError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn execute(&self, job_id: JobId, input: &StepInput) -> Result<Artifact, BackendError> {
        let body = StepRequest {
            job_id,
            step: input.step,
            inputs: &input.inputs,
        };

        let response = self
            .client
            .post(format!("{}/v1/steps", self.base_url))
            .json(&body)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let parsed: StepResponse = response.json().await?;

        if parsed.artifact_url.trim().is_empty() {
            return Err(BackendError::InvalidResponse(
                "artifact_url is empty".to_string(),
            ));
        }
        Ok(Artifact {
            url: parsed.artifact_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::with_client(reqwest::Client::new(), "http://gpu:8188/");
        assert_eq!(backend.base_url(), "http://gpu:8188");
    }

    #[test]
    fn step_request_wire_shape() {
        let job_id = JobId::new();
        let inputs = serde_json::json!({ "image_url": "https://x/y.png" });
        let body = serde_json::to_value(StepRequest {
            job_id,
            step: StepKind::FaceRestore,
            inputs: &inputs,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "job_id": job_id.to_string(),
                "step": "face_restore",
                "inputs": { "image_url": "https://x/y.png" },
            })
        );
    }
}
