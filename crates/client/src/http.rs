//! HTTP client for the jobs API.

use async_trait::async_trait;
use atelier_core::job::JobView;
use atelier_core::request::GenerationRequest;
use atelier_core::types::JobId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;

/// Errors from the jobs API.
#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("API error ({status} {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

impl ApiClientError {
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiClientError::Api { code, .. } => Some(code),
            ApiClientError::Request(_) => None,
        }
    }

    pub fn is_insufficient_balance(&self) -> bool {
        self.code() == Some("INSUFFICIENT_BALANCE")
    }

    /// A 4xx answer: the API refused the request and changed nothing.
    /// Transport failures and 5xx answers leave the outcome open.
    pub fn is_refusal(&self) -> bool {
        matches!(self, ApiClientError::Api { status, .. } if (400..500).contains(status))
    }
}

/// The API's receipt for a created job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedJob {
    pub job_id: JobId,
    pub cost: i64,
    pub new_balance: i64,
}

/// Job operations the subscriber needs from the API.
#[async_trait]
pub trait JobsApi: Send + Sync {
    /// Debit the caller and create `job_id`.
    async fn create_job(
        &self,
        job_id: JobId,
        request: &GenerationRequest,
    ) -> Result<CreatedJob, ApiClientError>;

    /// Ask the worker to stop `job_id`. Its charge is refunded when it does.
    async fn request_cancellation(&self, job_id: JobId) -> Result<JobView, ApiClientError>;

    /// Current state of `job_id`, independent of any subscription.
    async fn job_status(&self, job_id: JobId) -> Result<JobView, ApiClientError>;
}

// ---------------------------------------------------------------------------
// HttpJobsApi
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CreateJobBody<'a> {
    job_id: JobId,
    request: &'a GenerationRequest,
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

#[derive(Deserialize)]
struct BalanceBody {
    balance: i64,
}

/// [`JobsApi`] over the API's REST endpoints.
pub struct HttpJobsApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpJobsApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            config: config.clone(),
        }
    }

    /// The caller's current balance.
    pub async fn balance(&self) -> Result<i64, ApiClientError> {
        let response = self
            .client
            .get(self.url("/balance"))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        let body: BalanceBody = Self::parse_response(response).await?;
        Ok(body.balance)
    }

    fn url(&self, path: &str) -> String {
        self.config.api_url(path)
    }

    /// Unwrap the `{ "data": ... }` envelope of a successful response, or
    /// turn the `{ "error", "code" }` body of a failed one into
    /// [`ApiClientError::Api`].
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiClientError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => (parsed.code, parsed.error),
                Err(_) => ("UNKNOWN".to_string(), body),
            };
            return Err(ApiClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }
        let envelope: DataResponse<T> = response.json().await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl JobsApi for HttpJobsApi {
    async fn create_job(
        &self,
        job_id: JobId,
        request: &GenerationRequest,
    ) -> Result<CreatedJob, ApiClientError> {
        let response = self
            .client
            .post(self.url("/jobs"))
            .bearer_auth(&self.config.token)
            .json(&CreateJobBody { job_id, request })
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn request_cancellation(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        let response = self
            .client
            .post(self.url(&format!("/jobs/{job_id}/cancel")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobView, ApiClientError> {
        let response = self
            .client
            .get(self.url(&format!("/jobs/{job_id}")))
            .bearer_auth(&self.config.token)
            .send()
            .await?;
        Self::parse_response(response).await
    }
}
