use serde_json::json;
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    server_description::{ServerDescription, ServerType},
    server_selection::SelectionCriteria,
    session::ClientSession,
    topology::{SelectedServer, Topology},
};

use super::{Operation, OperationError};

/// Runs operations against the topology, retrying a qualifying failure once.
#[derive(Clone)]
pub struct RetryableExecutor {
    topology: Topology,
}

impl RetryableExecutor {
    pub fn new(topology: Topology) -> Self {
        Self { topology }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Selects a server, runs `operation` on it, and on a retryable failure runs it once more
    /// on a freshly selected server. Never makes more than two attempts.
    ///
    /// If the first attempt fails and re-selection fails too, the first attempt's error is
    /// returned. If both attempts fail, the second attempt's error is returned.
    #[instrument(
        level = "debug",
        name = "Retryable Executor - Execute",
        skip(self, operation, session),
        fields(operation = operation.name(), correlation_id)
    )]
    pub async fn execute<Op: Operation>(
        &self,
        operation: &Op,
        mut session: Option<&mut ClientSession>,
    ) -> Result<Op::Output, OperationError> {
        Span::current().record("correlation_id", Uuid::new_v4().to_string());

        let capabilities = operation.capabilities();
        let criteria = operation.selection_criteria();
        if capabilities.cursor_iterating && !matches!(criteria, SelectionCriteria::Address(_)) {
            return Err(OperationError::InvalidArgument(format!(
                "{} continues a cursor and must be pinned to the server that opened it",
                operation.name()
            )));
        }

        let server = self.topology.select_server(&criteria).await?;
        let options = self.topology.options();

        let retryable = if capabilities.writable {
            capabilities.retryable
                && options.retry_writes
                && session.is_some()
                && supports_retryable_writes(server.description())
        } else {
            capabilities.retryable && options.retry_reads
        };

        // A retried write must reuse the transaction number so the server can deduplicate it.
        let txn_number = match session.as_mut() {
            Some(session) if retryable && capabilities.writable => {
                Some(session.next_txn_number())
            }
            _ => None,
        };
        let session = session.as_deref();

        let first_error = match self.attempt(operation, &server, session, txn_number).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };
        self.topology
            .handle_application_error(server.address(), &first_error)
            .await;

        let should_retry = retryable
            && if capabilities.writable {
                first_error.is_retryable_write()
            } else {
                first_error.is_retryable_read()
            };
        if !should_retry {
            return Err(first_error);
        }
        tracing::debug!(
            "Retrying {} after failure on {}. Caused by: {}",
            operation.name(),
            server.address(),
            first_error
        );

        let retry_server = match self.topology.select_server(&criteria).await {
            Ok(retry_server) => retry_server,
            Err(e) => {
                tracing::debug!("Could not select a server for the retry. Caused by: {}", e);
                return Err(first_error);
            }
        };
        if capabilities.writable && !supports_retryable_writes(retry_server.description()) {
            tracing::debug!(
                "{} no longer supports retryable writes",
                retry_server.address()
            );
            return Err(first_error);
        }

        match self
            .attempt(operation, &retry_server, session, txn_number)
            .await
        {
            Ok(output) => Ok(output),
            Err(e) => {
                self.topology
                    .handle_application_error(retry_server.address(), &e)
                    .await;
                tracing::debug!("Retry of {} failed as well", operation.name());
                Err(e)
            }
        }
    }

    #[instrument(
        level = "trace",
        skip(self, operation, server, session),
        fields(address = %server.address())
    )]
    async fn attempt<Op: Operation>(
        &self,
        operation: &Op,
        server: &SelectedServer,
        session: Option<&ClientSession>,
        txn_number: Option<i64>,
    ) -> Result<Op::Output, OperationError> {
        let mut command = operation.build(server.description())?;
        if let Some(session) = session {
            command.insert("lsid".to_string(), session.lsid());
        }
        if let Some(txn_number) = txn_number {
            command.insert("txnNumber".to_string(), json!(txn_number));
        }

        let mut connection = server.checkout().await?;
        let reply = connection.send_command(command).await?;
        if let Some(error) = OperationError::from_command_reply(&reply) {
            return Err(error);
        }
        operation.handle_response(reply, server.description())
    }
}

fn supports_retryable_writes(server: &ServerDescription) -> bool {
    match server.server_type {
        ServerType::LoadBalancer => true,
        ServerType::Standalone => false,
        _ => server.logical_session_timeout_minutes.is_some(),
    }
}
