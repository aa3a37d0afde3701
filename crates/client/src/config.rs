use std::time::Duration;

use atelier_core::types::JobId;

use crate::reconnect::ReconnectConfig;

/// How long to wait for the subscription acknowledgment by default.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for plain HTTP calls to the API.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for one API server and one user.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL, e.g. `http://localhost:3000`.
    pub base_url: String,
    /// Bearer token sent with every request and on the WebSocket upgrade.
    pub token: String,
    /// Maximum wait for the `subscribed` acknowledgment.
    pub ack_timeout: Duration,
    pub request_timeout: Duration,
    /// Backoff for re-opening a notification channel that dropped.
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// WebSocket URL of the subscription endpoint for `job_id`.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn job_ws_url(&self, job_id: JobId) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{base}/api/v1/ws/jobs/{job_id}")
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_http_scheme() {
        let job_id = JobId::new();
        let plain = ClientConfig::new("http://localhost:3000/", "t");
        let tls = ClientConfig::new("https://atelier.example.com", "t");

        assert_eq!(
            plain.job_ws_url(job_id),
            format!("ws://localhost:3000/api/v1/ws/jobs/{job_id}")
        );
        assert_eq!(
            tls.job_ws_url(job_id),
            format!("wss://atelier.example.com/api/v1/ws/jobs/{job_id}")
        );
    }

    #[test]
    fn api_url_is_versioned() {
        let config = ClientConfig::new("http://localhost:3000", "t");
        assert_eq!(config.api_url("/jobs"), "http://localhost:3000/api/v1/jobs");
    }
}
