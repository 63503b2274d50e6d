//! HTTP client for the thread API.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use strand_core::error::StreamError;
use strand_core::protocol::{
    JobAccepted, LoadResponse, StartRequest, StatusResponse, StopAck,
};

use crate::config::ClientConfig;
use crate::reader::{ByteStream, byte_stream};
use crate::resume::{CheckpointSource, StatusSource};

/// What `start` or `resume` handed back.
pub enum StartResponse {
    /// Attached mode: the event stream of the run.
    Stream(ByteStream),
    /// Detached mode: follow the thread by polling.
    Job(JobAccepted),
}

impl std::fmt::Debug for StartResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Job(job) => f.debug_tuple("Job").field(job).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.base_url.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// `POST /threads`.
    pub async fn start(
        &self,
        thread_id: Option<&str>,
        input: Value,
        detached: bool,
    ) -> Result<StartResponse, StreamError> {
        let body = StartRequest {
            thread_id: thread_id.map(String::from),
            input,
            detached,
        };
        debug!(thread_id = ?thread_id, detached, "starting thread");
        let response = self
            .client
            .post(self.url("/threads"))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        Self::into_start_response(response).await
    }

    /// `POST /resume/{thread_id}`.
    pub async fn resume(&self, thread_id: &str, detached: bool) -> Result<StartResponse, StreamError> {
        debug!(thread_id, detached, "resuming thread");
        let response = self
            .client
            .post(self.url(&format!("/resume/{thread_id}")))
            .query(&[("detached", detached)])
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StreamError::NotFound(thread_id.to_string()));
        }
        Self::into_start_response(response).await
    }

    /// `POST /stop/{thread_id}`. Best effort; an unknown thread is not an error.
    pub async fn stop(&self, thread_id: &str) -> Result<Option<StopAck>, StreamError> {
        let response = self
            .client
            .post(self.url(&format!("/stop/{thread_id}")))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(transport)
    }

    /// `GET /status/{thread_id}`.
    pub async fn status(&self, thread_id: &str) -> Result<StatusResponse, StreamError> {
        let response = self
            .client
            .get(self.url(&format!("/status/{thread_id}")))
            .send()
            .await
            .map_err(transport)?;
        let response = Self::check(response).await?;
        response.json().await.map_err(transport)
    }

    /// `GET /load/{thread_id}`; `None` when no checkpoint exists.
    pub async fn load(&self, thread_id: &str) -> Result<Option<LoadResponse>, StreamError> {
        let response = self
            .client
            .get(self.url(&format!("/load/{thread_id}")))
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(transport)
    }

    async fn into_start_response(response: reqwest::Response) -> Result<StartResponse, StreamError> {
        let response = Self::check(response).await?;
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            Ok(StartResponse::Stream(byte_stream(response.bytes_stream())))
        } else {
            let job: JobAccepted = response.json().await.map_err(transport)?;
            Ok(StartResponse::Job(job))
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StreamError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read response body".into());
        warn!(%status, body = %body, "thread API error");
        Err(StreamError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

fn transport(e: reqwest::Error) -> StreamError {
    StreamError::Transport(e.to_string())
}

#[async_trait]
impl CheckpointSource for ApiClient {
    async fn load(&self, thread_id: &str) -> Result<Option<LoadResponse>, StreamError> {
        ApiClient::load(self, thread_id).await
    }
}

#[async_trait]
impl StatusSource for ApiClient {
    async fn status(&self, thread_id: &str) -> Result<StatusResponse, StreamError> {
        ApiClient::status(self, thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_rooted_under_api() {
        let client = ApiClient::new("http://localhost:3001/");
        assert_eq!(client.base_url(), "http://localhost:3001");
        assert_eq!(client.url("/status/t-1"), "http://localhost:3001/api/status/t-1");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = ApiClient::new("http://127.0.0.1:1");
        let err = client.status("t").await.unwrap_err();
        assert!(err.is_transport());
    }
}
