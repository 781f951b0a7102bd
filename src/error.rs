//! Session-fatal error taxonomy (§7).

use thiserror::Error;

use crate::message::WireErrorCode;

/// Conditions that end a session but are not process-fatal. The engine
/// surfaces these, runs teardown where still possible, then exits the
/// session loop (§7 "Propagation").
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer reported error: {0:?}")]
    PeerError(WireErrorCode),
    #[error("no activity from peer within the inactivity window")]
    Inactivity,
    #[error("session exceeded its hard time cap")]
    HardCapExceeded,
    #[error("local shutdown requested")]
    StopRequested,
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("digest computation failed: {0}")]
    Digest(#[from] anyhow::Error),
}

impl SessionError {
    pub fn from_io(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
