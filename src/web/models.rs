use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Inbound chat request, forwarded to the backend as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    /// Conversation history, oldest first. Entries are opaque to the relay.
    pub messages: Vec<Map<String, Value>>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    /// Backend options we don't interpret (`options`, `keep_alive`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_stream() -> bool {
    true
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must contain at least one entry".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSessionRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chat_request_round_trips_unknown_fields() {
        let raw = json!({
            "model": "llama3",
            "messages": [{"role": "user", "content": "hi", "images": []}],
            "options": {"temperature": 0.2}
        });
        let request: ChatRequest = serde_json::from_value(raw).unwrap();
        assert!(request.stream);

        let forwarded = serde_json::to_value(&request).unwrap();
        assert_eq!(forwarded["options"]["temperature"], json!(0.2));
        assert_eq!(forwarded["messages"][0]["images"], json!([]));
        assert_eq!(forwarded["stream"], json!(true));
    }

    #[test]
    fn validate_rejects_empty_model_and_history() {
        let mut request: ChatRequest = serde_json::from_value(json!({
            "model": " ",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(request.validate().is_err());

        request.model = "llama3".to_string();
        assert!(request.validate().is_ok());

        request.messages.clear();
        assert!(request.validate().is_err());
    }
}
