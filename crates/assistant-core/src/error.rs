use crate::{AssistantState, TaskId, TaskKind};
use thiserror::Error;

pub type Result<T, E = AssistantError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum AssistantError {
    /// A message arrived that no live task could have sent in this state.
    /// The single-task invariant no longer holds.
    #[error("protocol violation: {outcome} from {kind} task {task} while {state}")]
    ProtocolViolation {
        state: AssistantState,
        kind: TaskKind,
        task: TaskId,
        outcome: &'static str,
    },
    #[error("failed to start thread: {0}")]
    Spawn(#[from] std::io::Error),
}
