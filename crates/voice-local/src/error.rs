use thiserror::Error;

pub type Result<T, E = VoiceError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend not compiled in: {0}")]
    NotCompiled(&'static str),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("audio stream closed")]
    StreamClosed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("timeout")]
    Timeout,
    #[error("speech cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
