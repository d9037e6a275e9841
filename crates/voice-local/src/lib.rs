//! voice-local: collaborator traits for a voice assistant, with mock and local backends

mod types;
pub use types::{
    AsrSegment, AsrStreamConfig, ConversationTurn, OllamaConfig, PiperConfig, Role, SttConfig,
    TtsConfig,
};

mod error;
pub use error::{Result, VoiceError};

mod traits;
pub use traits::{
    AsrStream, AudioCapture, AudioSource, ReplyGenerator, SpeechEngine, Transcriber, TtsEngine,
    WakeWordDetector,
};

mod adapters;
pub use adapters::{AsrTranscriber, PhraseWakeDetector, SynthSpeech};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{
    MockAsr, MockReply, MockSpeech, MockTranscriber, MockTts, MockWakeDetector, ScriptEnd,
    ScriptedAudio, UnavailableAudio,
};

#[cfg(feature = "ollama")]
mod ollama;
#[cfg(feature = "ollama")]
pub use ollama::OllamaReply;

#[cfg(feature = "kyutai_moshi")]
mod kyutai;
#[cfg(feature = "kyutai_moshi")]
pub use kyutai::{KyutaiAsrStream, KyutaiClient, KyutaiTranscriber};

#[cfg(feature = "piper")]
mod piper;
#[cfg(feature = "piper")]
pub use piper::PiperSpeech;

#[cfg(feature = "audio")]
pub mod mic;

#[cfg(feature = "mock")]
pub mod plugin;
