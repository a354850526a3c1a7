//! Seam to the connection layer. Pooling, authentication and wire encoding live on the other
//! side of these traits.
use async_trait::async_trait;

use crate::{hello_reply::Document, server_address::ServerAddress, OperationError};

/// Hands out ready-to-use connections to a specific server.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    async fn checkout(&self, address: &ServerAddress)
        -> Result<Box<dyn Connection>, OperationError>;

    /// Drops idle connections to `address` after the topology marked it unusable.
    fn clear(&self, address: &ServerAddress) {
        tracing::trace!("Pool has nothing to clear for {}", address);
    }
}

#[async_trait]
pub trait Connection: Send {
    fn address(&self) -> &ServerAddress;

    /// Sends a command and returns the decoded reply, whatever its `ok` value.
    async fn send_command(&mut self, command: Document) -> Result<Document, OperationError>;
}
