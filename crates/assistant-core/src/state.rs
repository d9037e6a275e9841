use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Where the assistant is in the current turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssistantState {
    /// Waiting for the wake word or a tap.
    #[default]
    Idle,
    /// Recording the user's utterance.
    Listening,
    /// Waiting for the reply generator.
    Thinking,
    /// Playing the reply.
    Speaking,
}

impl AssistantState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Recording,
    Reply,
    Speech,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Recording => "recording",
            Self::Reply => "reply",
            Self::Speech => "speech",
        })
    }
}

/// Identity of one background task, carried on its terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.0.simple().to_string();
        f.write_str(&full[..8])
    }
}

/// Terminal message of a recording task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    Ready(String),
    Failed,
}

impl TranscriptOutcome {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "TranscriptReady",
            Self::Failed => "TranscriptFailed",
        }
    }
}

/// Terminal message of a reply or speech task. Both share one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    ReplyReady(String),
    ReplyFailed,
    SpeechDone,
}

impl ResponseOutcome {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::ReplyReady(_) => "ReplyReady",
            Self::ReplyFailed => "ReplyFailed",
            Self::SpeechDone => "SpeechDone",
        }
    }

    pub(crate) fn kind(&self) -> TaskKind {
        match self {
            Self::ReplyReady(_) | Self::ReplyFailed => TaskKind::Reply,
            Self::SpeechDone => TaskKind::Speech,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<M> {
    pub task: TaskId,
    pub outcome: M,
}
