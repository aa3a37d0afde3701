//! WebSocket transport for job subscriptions.

use async_trait::async_trait;
use atelier_core::job_events::JobChannelMessage;
use atelier_core::types::JobId;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::channel::{ChannelError, JobChannel, JobConnector};
use crate::config::ClientConfig;

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens `GET /api/v1/ws/jobs/{job_id}` with the configured bearer token.
pub struct WsConnector {
    config: ClientConfig,
}

impl WsConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl JobConnector for WsConnector {
    async fn open(&self, job_id: JobId) -> Result<Box<dyn JobChannel>, ChannelError> {
        let url = self.config.job_ws_url(job_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::Connect(format!("Invalid subscription URL {url}: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.config.token))
            .map_err(|e| ChannelError::Connect(format!("Invalid token: {e}")))?;
        request.headers_mut().insert("authorization", auth);

        let (stream, _response) = connect_async(request).await.map_err(|e| match e {
            tungstenite::Error::Http(response) => ChannelError::Rejected {
                status: response.status().as_u16(),
            },
            other => ChannelError::Connect(format!("Failed to connect to {url}: {other}")),
        })?;

        tracing::debug!(job_id = %job_id, "Job subscription opened");
        Ok(Box::new(WsJobChannel { job_id, stream }))
    }
}

/// A live WebSocket subscription to one job.
pub struct WsJobChannel {
    job_id: JobId,
    stream: Stream,
}

#[async_trait]
impl JobChannel for WsJobChannel {
    async fn next_message(&mut self) -> Result<Option<JobChannelMessage>, ChannelError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text)
                        .map(Some)
                        .map_err(|e| ChannelError::Protocol(e.to_string()));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(job_id = %self.job_id, ?frame, "Server closed job subscription");
                    return Ok(None);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChannelError::Lost(e.to_string())),
                None => {
                    return Err(ChannelError::Lost(
                        "stream ended without a close frame".to_string(),
                    ))
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(job_id = %self.job_id, error = %e, "Error closing job subscription");
        }
    }
}
