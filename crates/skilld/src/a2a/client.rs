//! HTTP transport for agent-to-agent delegation.
//!
//! Peers expose `POST /a2a/tasks`; the reply body is the same message in
//! a terminal state. Request deadlines are enforced by the router, not
//! here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use skilld_core::a2a::DelegationMessage;

use super::router::{DelegationTransport, TransportError};

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            let addr = e
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            TransportError::Unreachable { addr }
        } else {
            TransportError::Http {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Delegation transport over plain HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(auth_token: Option<String>) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                TransportError::InvalidResponse(format!("invalid auth token: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl DelegationTransport for HttpTransport {
    async fn send(
        &self,
        peer: &str,
        message: &DelegationMessage,
    ) -> Result<DelegationMessage, TransportError> {
        let url = format!("{}/a2a/tasks", peer.trim_end_matches('/'));
        let response = self.client.post(&url).json(message).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let reply: DelegationMessage = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        if reply.task_id != message.task_id {
            return Err(TransportError::InvalidResponse(format!(
                "reply task id {} does not match request {}",
                reply.task_id, message.task_id
            )));
        }

        Ok(reply)
    }
}
