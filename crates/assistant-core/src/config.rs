use crate::history::DEFAULT_HISTORY_LIMIT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_APOLOGY: &str = "Sorry, I had trouble thinking about that.";

/// When to stop recording an utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Mean absolute amplitude, in 16-bit sample units, below which a chunk counts as silent.
    pub silence_threshold: f32,
    /// Trailing silence that ends the recording.
    pub max_silence_ms: u64,
    /// Chunks that must be captured before silence can end the recording.
    pub min_chunks: usize,
    /// Hard cap on recording length.
    pub max_duration_ms: u64,
    /// Recordings shorter than this are not transcribed.
    pub min_samples: usize,
    /// How long to wait on the device for each chunk.
    pub chunk_timeout_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 500.0,
            max_silence_ms: 1500,
            min_chunks: 10,
            max_duration_ms: 10_000,
            min_samples: 1600,
            chunk_timeout_ms: 500,
        }
    }
}

impl RecordingConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    /// Trailing silence limit expressed in samples at `sample_rate_hz`.
    pub fn max_silence_samples(&self, sample_rate_hz: u32) -> u64 {
        self.max_silence_ms * u64::from(sample_rate_hz) / 1000
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Turns kept after each completed reply.
    pub history_limit: usize,
    /// Spoken when the reply generator fails.
    pub apology: String,
    pub recording: RecordingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            apology: DEFAULT_APOLOGY.to_string(),
            recording: RecordingConfig::default(),
        }
    }
}
