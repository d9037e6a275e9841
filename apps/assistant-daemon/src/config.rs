use anyhow::{Context, Result};
use assistant_core::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use voice_local::plugin::{
    AudioBackendKind, ReplyBackendKind, SpeechBackendKind, TranscriberKind,
};
use voice_local::{AsrStreamConfig, OllamaConfig, PiperConfig, SttConfig, TtsConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio_backend: AudioBackendKind,
    pub transcriber: TranscriberKind,
    pub reply_backend: ReplyBackendKind,
    pub speech_backend: SpeechBackendKind,
    pub wake_word_enabled: bool,
    pub wake: AsrStreamConfig,
    pub stt: SttConfig,
    pub ticks_per_second: u32,
    pub assistant: OrchestratorConfig,
    pub ollama: OllamaConfig,
    pub piper: PiperConfig,
    pub tts: TtsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio_backend: AudioBackendKind::Microphone,
            transcriber: TranscriberKind::Kyutai,
            reply_backend: ReplyBackendKind::Ollama,
            speech_backend: SpeechBackendKind::Piper,
            wake_word_enabled: true,
            wake: AsrStreamConfig::default(),
            stt: SttConfig::default(),
            ticks_per_second: 30,
            assistant: OrchestratorConfig::default(),
            ollama: OllamaConfig::default(),
            piper: PiperConfig::default(),
            tts: TtsConfig::default(),
        }
    }
}

impl Config {
    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.json");
        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.assistant.history_limit, 20);
        assert_eq!(config.wake.wake_words, vec!["hey max".to_string()]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.json");
        fs::write(
            &path,
            r#"{ "reply_backend": "mock", "assistant": { "history_limit": 6 } }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.reply_backend, ReplyBackendKind::Mock);
        assert_eq!(config.assistant.history_limit, 6);
        assert_eq!(
            config.assistant.apology,
            "Sorry, I had trouble thinking about that."
        );
        assert_eq!(config.speech_backend, SpeechBackendKind::Piper);
        assert_eq!(config.transcriber, TranscriberKind::Kyutai);
        assert_eq!(config.stt.model_rate_hz, 24_000);
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assistant.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
