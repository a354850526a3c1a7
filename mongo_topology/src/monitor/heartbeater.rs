use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    hello_reply::{Document, TopologyVersion},
    server_address::ServerAddress,
};

use super::HeartbeatError;

/// Sends the handshake command to one server and returns the decoded reply.
///
/// Implementations own the dedicated monitoring connection (opening it, re-opening it after a
/// failure). Deadlines are enforced by the caller.
#[async_trait]
pub trait Heartbeater: Send + Sync + 'static {
    async fn check(
        &self,
        address: &ServerAddress,
        request: HeartbeatRequest,
    ) -> Result<Document, HeartbeatError>;
}

/// The handshake command plus the information a streaming-capable transport needs.
#[derive(Clone, Debug, PartialEq)]
pub struct HeartbeatRequest {
    pub command: Document,
    /// Set when the server is asked to hold the reply until its topology changes.
    pub awaited: bool,
}

impl HeartbeatRequest {
    pub fn polling() -> Self {
        Self {
            command: hello_command(None, None),
            awaited: false,
        }
    }

    pub fn awaited(topology_version: &TopologyVersion, max_await_time: Duration) -> Self {
        Self {
            command: hello_command(Some(topology_version), Some(max_await_time)),
            awaited: true,
        }
    }
}

fn hello_command(
    topology_version: Option<&TopologyVersion>,
    max_await_time: Option<Duration>,
) -> Document {
    let mut command = Document::new();
    command.insert("hello".to_string(), json!(1));
    command.insert("helloOk".to_string(), json!(true));
    if let (Some(version), Some(wait)) = (topology_version, max_await_time) {
        command.insert("topologyVersion".to_string(), json!(version));
        command.insert("maxAwaitTimeMS".to_string(), json!(wait.as_millis() as u64));
    }
    command
}
