use std::time::Duration;

use serde_json::Value;

use crate::{
    error_chain_fmt,
    hello_reply::{Document, TopologyVersion},
    server_address::ServerAddress,
    topology::TopologyError,
};

/// Label the server attaches to errors it considers safe to retry as a write.
pub const RETRYABLE_WRITE_ERROR_LABEL: &str = "RetryableWriteError";

const HOST_UNREACHABLE: i32 = 6;
const HOST_NOT_FOUND: i32 = 7;
const NETWORK_TIMEOUT: i32 = 89;
const SHUTDOWN_IN_PROGRESS: i32 = 91;
const READ_CONCERN_MAJORITY_NOT_AVAILABLE_YET: i32 = 134;
const PRIMARY_STEPPED_DOWN: i32 = 189;
const EXCEEDED_TIME_LIMIT: i32 = 262;
const SOCKET_EXCEPTION: i32 = 9001;
const LEGACY_NOT_PRIMARY: i32 = 10058;
const NOT_WRITABLE_PRIMARY: i32 = 10107;
const INTERRUPTED_AT_SHUTDOWN: i32 = 11600;
const INTERRUPTED_DUE_TO_REPL_STATE_CHANGE: i32 = 11602;
const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;
const NOT_PRIMARY_OR_SECONDARY: i32 = 13436;

const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [
    NOT_WRITABLE_PRIMARY,
    NOT_PRIMARY_NO_SECONDARY_OK,
    LEGACY_NOT_PRIMARY,
];

const RECOVERING_CODES: [i32; 5] = [
    INTERRUPTED_AT_SHUTDOWN,
    INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
    NOT_PRIMARY_OR_SECONDARY,
    PRIMARY_STEPPED_DOWN,
    SHUTDOWN_IN_PROGRESS,
];

const RETRYABLE_CODES: [i32; 12] = [
    HOST_UNREACHABLE,
    HOST_NOT_FOUND,
    NETWORK_TIMEOUT,
    SHUTDOWN_IN_PROGRESS,
    PRIMARY_STEPPED_DOWN,
    EXCEEDED_TIME_LIMIT,
    SOCKET_EXCEPTION,
    NOT_WRITABLE_PRIMARY,
    INTERRUPTED_AT_SHUTDOWN,
    INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
    NOT_PRIMARY_NO_SECONDARY_OK,
    NOT_PRIMARY_OR_SECONDARY,
];

#[derive(thiserror::Error)]
pub enum OperationError {
    #[error("Network error talking to {address}: {message}")]
    Network {
        address: ServerAddress,
        message: String,
    },
    #[error("Operation against {address} timed out after {timeout:?}")]
    Timeout {
        address: ServerAddress,
        timeout: Duration,
    },
    #[error("Command failed with code {code} ({code_name}): {message}")]
    Command {
        code: i32,
        code_name: String,
        message: String,
        labels: Vec<String>,
        topology_version: Option<TopologyVersion>,
    },
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Server selection failed")]
    Selection(#[from] TopologyError),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}
impl std::fmt::Debug for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl OperationError {
    /// Turns an `ok: 0` reply into a [`OperationError::Command`]. Returns `None` for success.
    pub fn from_command_reply(reply: &Document) -> Option<Self> {
        let ok = reply.get("ok").and_then(Value::as_f64).unwrap_or(1.0);
        if ok == 1.0 {
            return None;
        }

        let code = reply
            .get("code")
            .and_then(Value::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(0);
        let code_name = reply
            .get("codeName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message = reply
            .get("errmsg")
            .and_then(Value::as_str)
            .unwrap_or("command failed")
            .to_string();
        let labels = reply
            .get("errorLabels")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let topology_version = reply
            .get("topologyVersion")
            .cloned()
            .and_then(|version| serde_json::from_value(version).ok());

        Some(OperationError::Command {
            code,
            code_name,
            message,
            labels,
            topology_version,
        })
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            OperationError::Command { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        match self {
            OperationError::Command { labels, .. } => labels.iter().any(|l| l == label),
            _ => false,
        }
    }

    pub fn topology_version(&self) -> Option<&TopologyVersion> {
        match self {
            OperationError::Command {
                topology_version, ..
            } => topology_version.as_ref(),
            _ => None,
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            OperationError::Network { .. } | OperationError::Timeout { .. }
        )
    }

    /// The server stopped being primary or is recovering/shutting down.
    pub fn is_state_change_error(&self) -> bool {
        self.code()
            .map(|code| {
                NOT_WRITABLE_PRIMARY_CODES.contains(&code) || RECOVERING_CODES.contains(&code)
            })
            .unwrap_or(false)
    }

    pub fn is_retryable_read(&self) -> bool {
        self.is_network_error()
            || self
                .code()
                .map(|code| {
                    RETRYABLE_CODES.contains(&code)
                        || code == READ_CONCERN_MAJORITY_NOT_AVAILABLE_YET
                })
                .unwrap_or(false)
    }

    pub fn is_retryable_write(&self) -> bool {
        self.is_network_error()
            || self.has_label(RETRYABLE_WRITE_ERROR_LABEL)
            || self
                .code()
                .map(|code| RETRYABLE_CODES.contains(&code))
                .unwrap_or(false)
    }
}
