use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrStreamConfig {
    pub language: Option<String>,
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub wake_words: Vec<String>,
    #[serde(default = "default_sensitivity")]
    pub wake_word_sensitivity: f32,
}

fn default_sensitivity() -> f32 {
    0.5
}

impl Default for AsrStreamConfig {
    fn default() -> Self {
        Self {
            language: Some("en".to_string()),
            sample_rate_hz: 16_000,
            wake_words: vec!["hey max".to_string()],
            wake_word_sensitivity: default_sensitivity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub ts: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub voice: Option<String>,
    pub sample_rate_hz: u32,
    /// Playback speed multiplier, clamped to 0.5..=2.0 by the engines.
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_speed() -> f32 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: Some("en_US-lessac-medium".to_string()),
            sample_rate_hz: 16_000,
            speed: default_speed(),
        }
    }
}

/// Who produced a turn of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One utterance in the prompt context handed to a [`crate::ReplyGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Connection settings for an Ollama chat server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
    pub num_ctx: u32,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen2:0.5b".to_string(),
            system_prompt: "You are Max, a friendly and helpful AI assistant. \
                Keep responses concise (1-3 sentences) since you'll be speaking them aloud. \
                Be warm, slightly playful, and helpful."
                .to_string(),
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 75,
            num_ctx: 512,
            timeout_secs: 300,
        }
    }
}

/// Kyutai speech-to-text served over HTTP. Requests to a huggingface.co
/// endpoint need the bearer token named by `token_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub endpoint: String,
    pub token_env: String,
    /// Rate the model expects; audio is resampled to it before upload.
    pub model_rate_hz: u32,
    /// Streaming window for wake word spotting.
    pub window_ms: u32,
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api-inference.huggingface.co/models/kyutai/stt-2.6b-en".to_string(),
            token_env: "HUGGINGFACEHUB_API_TOKEN".to_string(),
            model_rate_hz: 24_000,
            window_ms: 1_000,
            timeout_secs: 30,
        }
    }
}

/// Piper synthesis plus an external WAV player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiperConfig {
    pub binary: String,
    pub voice: String,
    pub player: Vec<String>,
    pub synth_timeout_secs: u64,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            binary: "piper".to_string(),
            voice: "en_US-lessac-medium".to_string(),
            player: vec!["aplay".to_string(), "-q".to_string()],
            synth_timeout_secs: 30,
        }
    }
}
