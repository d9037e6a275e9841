use crate::{AsrSegment, AsrStreamConfig, ConversationTurn, Result, TtsConfig};
use std::time::Duration;

pub trait AsrStream {
    fn new(config: AsrStreamConfig) -> Self
    where
        Self: Sized;
    fn push_audio(&mut self, _pcm_s16le: &[i16]);
    fn poll(&mut self) -> Option<AsrSegment>;
    fn end(&mut self) -> Option<AsrSegment> {
        None
    }
}

pub trait TtsEngine {
    fn new(config: TtsConfig) -> Self
    where
        Self: Sized;
    fn synthesize(&mut self, text: &str) -> Vec<i16>;
}

/// Batch speech-to-text over a finished recording.
pub trait Transcriber: Send {
    /// Transcribe normalized mono samples in `-1.0..=1.0`.
    ///
    /// Engine failures are reported as `None`, the same as an empty transcript.
    fn transcribe(&mut self, samples: &[f32]) -> Option<String>;
}

/// Stateful keyword spotter fed with consecutive audio chunks.
///
/// There is no built-in pause: callers that want to mute detection simply
/// stop feeding it.
pub trait WakeWordDetector: Send {
    fn detect(&mut self, chunk: &[i16]) -> bool;
}

/// Produces the assistant's next utterance from the conversation so far.
pub trait ReplyGenerator: Send {
    fn generate_reply(&mut self, history: &[ConversationTurn]) -> Result<String>;
}

/// Speech output shared between the task that speaks and the thread that cancels.
pub trait SpeechEngine: Send + Sync {
    /// Blocks until the utterance finishes or is cancelled.
    fn speak(&self, text: &str) -> Result<()>;

    /// Stop any ongoing utterance. Must be a no-op when nothing is playing.
    fn cancel(&self);
}

/// Something that can open a live stream of 16-bit mono PCM chunks.
pub trait AudioSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn AudioCapture>>;
}

pub trait AudioCapture {
    fn sample_rate_hz(&self) -> u32;

    /// Wait up to `timeout` for the next chunk. `Ok(None)` means no audio arrived in time.
    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<i16>>>;
}
