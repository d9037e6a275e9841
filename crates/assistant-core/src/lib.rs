//! assistant-core: turn-taking orchestration for a voice assistant
//!
//! One [`Orchestrator`] owns the assistant's state and conversation history.
//! Recording, reply generation and speech each run as a background task that
//! reports back with a single message; a [`WakeWordWatcher`] listens in the
//! background and is muted whenever a turn is in flight.

mod state;
pub use state::{AssistantState, Envelope, ResponseOutcome, TaskId, TaskKind, TranscriptOutcome};

mod error;
pub use error::{AssistantError, Result};

mod config;
pub use config::{OrchestratorConfig, RecordingConfig, DEFAULT_APOLOGY};

mod history;
pub use history::{ConversationHistory, DEFAULT_HISTORY_LIMIT};

pub mod recorder;

mod task;
pub use task::{SharedReplier, SharedTranscriber};

mod watcher;
pub use watcher::{WakeGate, WakeWordWatcher};

mod orchestrator;
pub use orchestrator::{Collaborators, Orchestrator};

mod driver;
pub use driver::{Control, UpdateLoop};

pub use voice_local::{ConversationTurn, Role};
