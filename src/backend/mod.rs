use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use log::{debug, info};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::web::models::ChatRequest;

#[cfg(test)]
pub mod testing;

/// Raw upstream body, chunked however the transport delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to reach inference backend: {0}")]
    Connect(String),

    #[error("timed out waiting for inference backend")]
    Timeout,

    #[error("upstream rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("invalid response from inference backend: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Connect(e.to_string())
        }
    }
}

/// The slice of an HTTP client the relay and the pass-through need.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send the request and hand back the response body as it arrives.
    /// Fails without yielding a stream on connect errors or non-2xx replies.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError>;

    /// One-shot request; the backend's JSON reply is returned untouched.
    async fn complete(&self, request: &ChatRequest) -> Result<Value, BackendError>;
}

// Client for an Ollama-compatible /api/chat endpoint
pub struct OllamaClient {
    chat_url: String,
    client: Client,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(chat_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let chat_url = chat_url.into();
        info!("Initializing inference backend client for {}", chat_url);

        // No overall request timeout: a streamed reply may legitimately run
        // for much longer than the first-token wait.
        let client = Client::builder().connect_timeout(timeout).build()?;

        Ok(Self {
            chat_url,
            client,
            timeout,
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<reqwest::Response, BackendError> {
        debug!(
            "POST {} model={} messages={} stream={}",
            self.chat_url,
            request.model,
            request.messages.len(),
            request.stream
        );

        let pending = self.client.post(&self.chat_url).json(request).send();
        let response = tokio::time::timeout(self.timeout, pending)
            .await
            .map_err(|_| BackendError::Timeout)??;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            // The reason text is best effort; a stalled body must not hold
            // up the rejection.
            let body = tokio::time::timeout(self.timeout, response.text())
                .await
                .ok()
                .and_then(|text| text.ok())
                .unwrap_or_default();
            return Err(BackendError::Rejected { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, BackendError> {
        let response = self.send(request).await?;
        Ok(response
            .bytes_stream()
            .map_err(|e| BackendError::Transport(e.to_string()))
            .boxed())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<Value, BackendError> {
        let response = self.send(request).await?;
        let body = tokio::time::timeout(self.timeout, response.json::<Value>())
            .await
            .map_err(|_| BackendError::Timeout)?
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        debug!("Response JSON: {}", body);
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn chat_request(stream: bool) -> ChatRequest {
        serde_json::from_value(json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": stream
        }))
        .unwrap()
    }

    fn client_for(server: &MockServer) -> OllamaClient {
        OllamaClient::new(format!("{}/api/chat", server.uri()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn open_stream_forwards_body_and_yields_raw_bytes() {
        let server = MockServer::start().await;
        let ndjson = "{\"message\":{\"content\":\"He\"}}\n{\"done\":true}\n";
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "model": "x",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
            .expect(1)
            .mount(&server)
            .await;

        let stream = client_for(&server).open_stream(&chat_request(true)).await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(body, ndjson.as_bytes());
    }

    #[tokio::test]
    async fn open_stream_reports_rejection_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model 'x' not found"))
            .mount(&server)
            .await;

        match client_for(&server).open_stream(&chat_request(true)).await {
            Err(BackendError::Rejected { status, body }) => {
                assert_eq!(status, 404);
                assert!(body.contains("not found"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("rejected request produced a stream"),
        }
    }

    #[tokio::test]
    async fn complete_returns_backend_json_verbatim() {
        let server = MockServer::start().await;
        let reply = json!({"message": {"role": "assistant", "content": "Hello"}, "done": true});
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply.clone()))
            .mount(&server)
            .await;

        let body = client_for(&server).complete(&chat_request(false)).await.unwrap();
        assert_eq!(body, reply);
    }

    #[tokio::test]
    async fn rejection_with_stalled_body_still_fails_promptly() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let head = "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 100\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(b"partial").await.unwrap();
            // Hold the connection open without finishing the body.
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let url = format!("http://{}/api/chat", addr);
        let client = OllamaClient::new(url, Duration::from_millis(200)).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.open_stream(&chat_request(true)),
        )
        .await
        .expect("rejection waited on the error body");

        match result {
            Err(BackendError::Rejected { status, body }) => {
                assert_eq!(status, 500);
                assert!(body.is_empty());
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("rejected request produced a stream"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_connect_error() {
        let client =
            OllamaClient::new("http://127.0.0.1:1/api/chat", Duration::from_secs(2)).unwrap();
        let err = client.open_stream(&chat_request(true)).await.err().unwrap();
        assert!(matches!(err, BackendError::Connect(_) | BackendError::Timeout));
    }
}
