//! Chat completions against a local Ollama server.

use crate::{ConversationTurn, OllamaConfig, ReplyGenerator, Result, VoiceError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OllamaReply {
    config: OllamaConfig,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    num_ctx: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

impl OllamaReply {
    /// Connect and check that the configured model is installed.
    pub fn connect(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Transport(e.to_string()))?;

        let tags: TagsResponse = client
            .get(format!("{}/api/tags", config.host))
            .timeout(Duration::from_secs(5))
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| VoiceError::Unavailable(format!("ollama at {}: {e}", config.host)))?
            .json()
            .map_err(|e| VoiceError::Malformed(e.to_string()))?;

        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        if !model_available(&config.model, &names) {
            warn!(model = %config.model, available = ?names, "ollama model not installed");
            return Err(VoiceError::Unavailable(format!(
                "model '{}' not found, run: ollama pull {}",
                config.model, config.model
            )));
        }

        info!(host = %config.host, model = %config.model, "ollama connected");
        Ok(Self { config, client })
    }
}

fn model_available(model: &str, installed: &[String]) -> bool {
    let family = model.split(':').next().unwrap_or(model);
    installed
        .iter()
        .any(|name| name.contains(model) || name.starts_with(family))
}

impl ReplyGenerator for OllamaReply {
    fn generate_reply(&mut self, history: &[ConversationTurn]) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: &self.config.system_prompt,
        });
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                crate::Role::User => "user",
                crate::Role::Assistant => "assistant",
            },
            content: &turn.content,
        }));

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
                top_p: self.config.top_p,
                num_predict: self.config.num_predict,
                num_ctx: self.config.num_ctx,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.config.host))
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Timeout
                } else {
                    VoiceError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(VoiceError::Transport(format!(
                "ollama: HTTP {}",
                response.status()
            )));
        }

        let body: ChatResponse = response
            .json()
            .map_err(|e| VoiceError::Malformed(e.to_string()))?;
        let text = body
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        debug!(chars = text.len(), "ollama reply received");
        if text.is_empty() {
            return Err(VoiceError::Malformed("empty message content".into()));
        }
        Ok(text)
    }
}
