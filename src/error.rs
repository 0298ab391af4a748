use crate::rtsp::RtspState;
use thiserror::Error;

/// Errors that abort a single simulated session.
///
/// None of these are fatal to the run: the orchestrator logs them against the
/// session ordinal and keeps going.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("redirect lookup failed: {0}")]
    Lookup(String),

    #[error("unexpected status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("invalid playlist type: {0}")]
    InvalidPlaylistType(String),

    #[error("invalid playlist: {0}")]
    InvalidPlaylist(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error while {state}: {detail}")]
    ProtocolState { state: RtspState, detail: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SimError {
    fn from(e: reqwest::Error) -> Self {
        SimError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for SimError {
    fn from(e: std::io::Error) -> Self {
        SimError::Transport(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SimError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SimError::Transport("operation timed out".to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
