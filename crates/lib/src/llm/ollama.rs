//! Ollama API client (http://127.0.0.1:11434 by default).
//! Non-streaming chat plus model listing for the startup availability check.

use crate::llm::{ModelBackend, ModelError};
use crate::session::{ConversationTurn, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:11434";

/// Client for Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("ollama request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ollama api error: {0}")]
    Api(String),
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/tags: list available models.
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, OllamaError> {
        let url = format!("{}/api/tags", self.base_url);
        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: TagsResponse = res.json().await?;
        Ok(data.models.unwrap_or_default())
    }

    /// POST /api/chat: non-streaming chat completion.
    pub(crate) async fn chat(
        &self,
        model: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatResponse, OllamaError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
        };
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(OllamaError::Api(format!("{} {}", status, body)));
        }
        let data: ChatResponse = res.json().await?;
        Ok(data)
    }
}

#[async_trait]
impl ModelBackend for OllamaClient {
    async fn chat(
        &self,
        model: &str,
        turns: &[ConversationTurn],
    ) -> Result<ConversationTurn, ModelError> {
        let messages = turns.iter().map(ChatMessage::from).collect();
        let res = OllamaClient::chat(self, model, messages).await?;
        let message = res
            .message
            .ok_or_else(|| OllamaError::Api("response has no message".to_string()))?;
        Ok(ConversationTurn::assistant(message.content))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        let role = match turn.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: turn.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatResponse {
    message: Option<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP request with a fixed JSON body; returns the base URL and the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let c = OllamaClient::new(Some("http://gpu-box:11434/".to_string()));
        assert_eq!(c.base_url(), "http://gpu-box:11434");
        assert_eq!(OllamaClient::new(None).base_url(), DEFAULT_BASE_URL);
    }

    #[test]
    fn turn_maps_to_chat_message_role() {
        let m = ChatMessage::from(&ConversationTurn::system("be kind"));
        assert_eq!(m.role, "system");
        assert_eq!(m.content, "be kind");
    }

    #[tokio::test]
    async fn chat_backend_returns_assistant_turn() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"model":"llama3.2","message":{"role":"assistant","content":"hi there"},"done":true}"#,
        )
        .await;
        let client = OllamaClient::new(Some(url));
        let turns = vec![ConversationTurn::system("sys"), ConversationTurn::user("hello")];
        let reply = ModelBackend::chat(&client, "llama3.2", &turns).await.unwrap();
        assert_eq!(reply, ConversationTurn::assistant("hi there"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/chat"));
        assert!(request.contains(r#""stream":false"#));
        assert!(request.contains(r#""role":"user","content":"hello""#));
    }

    #[tokio::test]
    async fn chat_backend_maps_http_error() {
        let (url, _server) = serve_once("500 Internal Server Error", r#"{"error":"model not found"}"#).await;
        let client = OllamaClient::new(Some(url));
        let err = ModelBackend::chat(&client, "missing", &[ConversationTurn::user("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Ollama(OllamaError::Api(_))));
    }

    #[tokio::test]
    async fn list_models_parses_tags() {
        let (url, _server) = serve_once(
            "200 OK",
            r#"{"models":[{"name":"llama3.2:latest","size":2019393189},{"name":"qwen3:8b"}]}"#,
        )
        .await;
        let models = OllamaClient::new(Some(url)).list_models().await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama3.2:latest", "qwen3:8b"]);
    }
}
