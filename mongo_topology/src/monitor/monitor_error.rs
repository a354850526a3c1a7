use std::time::Duration;

use crate::error_chain_fmt;

/// Why a single heartbeat attempt failed.
#[derive(thiserror::Error)]
pub enum HeartbeatError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Heartbeat timed out after {0:?}")]
    Timeout(Duration),
    #[error("Malformed heartbeat reply: {0}")]
    MalformedReply(String),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for HeartbeatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl HeartbeatError {
    pub fn is_network_error(&self) -> bool {
        matches!(self, HeartbeatError::Network(_) | HeartbeatError::Timeout(_))
    }
}
