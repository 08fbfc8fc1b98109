//! Language-model collaborator.
//!
//! The [`LanguageModel`] trait decouples planning and correction from the chat
//! backend (currently Ollama). Tests use scripted models that return queued
//! responses without any network traffic.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::config::LlmConfig;

/// Abstraction over chat-completion backends.
pub trait LanguageModel {
    /// Send one prompt and return the response text.
    ///
    /// Returns `None` on any transport failure or empty response; callers treat
    /// that as "no answer" rather than an error.
    fn complete(&self, model: &str, prompt: &str, system: Option<&str>) -> Option<String>;
}

impl<T: LanguageModel + ?Sized> LanguageModel for &T {
    fn complete(&self, model: &str, prompt: &str, system: Option<&str>) -> Option<String> {
        (**self).complete(model, prompt, system)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Blocking client for the Ollama HTTP API.
///
/// Must be created and used off the async runtime (e.g. inside
/// `spawn_blocking`).
pub struct OllamaClient {
    http: reqwest::blocking::Client,
    endpoint: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Names of the models installed on the server.
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .context("list models")?;
        let tags: TagsResponse = response.json().context("decode model list")?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }

    #[instrument(skip_all, fields(model, prompt_bytes = prompt.len()))]
    fn chat(&self, model: &str, prompt: &str, system: Option<&str>) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        let url = format!("{}/api/chat", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(anyhow!("chat request failed with {status}: {body}"));
        }
        let parsed: ChatResponse = response.json().context("decode chat response")?;
        let content = parsed
            .message
            .map(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("empty chat response"))?;
        debug!(response_bytes = content.len(), "chat completed");
        Ok(content)
    }
}

impl LanguageModel for OllamaClient {
    fn complete(&self, model: &str, prompt: &str, system: Option<&str>) -> Option<String> {
        match self.chat(model, prompt, system) {
            Ok(content) => Some(content),
            Err(err) => {
                warn!(model, err = %format!("{err:#}"), "language model request failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_system_then_user() {
        let request = ChatRequest {
            model: "llama3",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "be brief",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
            stream: false,
        };
        let json = serde_json::to_value(&request).expect("json");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn chat_response_tolerates_missing_message() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"done": true}"#).expect("json");
        assert!(parsed.message.is_none());
    }

    #[test]
    fn unreachable_server_yields_none() {
        let client = OllamaClient::new(&LlmConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            planner_model: "llama3".to_string(),
            request_timeout_secs: 2,
        })
        .expect("client");
        assert_eq!(client.complete("llama3", "hello", None), None);
    }
}
