use crate::{
    hello_reply::Document,
    server_description::ServerDescription,
    server_selection::{ReadPreference, SelectionCriteria},
};

use super::OperationError;

/// What an operation is allowed to do and how it may be retried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
    /// Safe to issue a second time after a transient failure.
    pub retryable: bool,
    /// Continues a cursor opened on one specific server.
    pub cursor_iterating: bool,
}

impl Capabilities {
    pub fn read() -> Self {
        Self {
            readable: true,
            ..Self::default()
        }
    }

    pub fn write() -> Self {
        Self {
            writable: true,
            ..Self::default()
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn cursor_iterating(mut self) -> Self {
        self.cursor_iterating = true;
        self
    }
}

/// One command-level operation. Implementations describe the command; selection, checkout and
/// retries are handled by [`RetryableExecutor`](super::RetryableExecutor).
pub trait Operation: Send + Sync {
    type Output: Send;

    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    fn selection_criteria(&self) -> SelectionCriteria;

    /// Builds the command for `server`. Called again for a retry.
    fn build(&self, server: &ServerDescription) -> Result<Document, OperationError>;

    /// Interprets a successful (`ok: 1`) reply.
    fn handle_response(
        &self,
        response: Document,
        server: &ServerDescription,
    ) -> Result<Self::Output, OperationError>;
}

/// Runs a caller-supplied command document and returns the raw reply.
#[derive(Clone, Debug, PartialEq)]
pub struct RunCommand {
    command: Document,
    capabilities: Capabilities,
    criteria: SelectionCriteria,
}

impl RunCommand {
    /// A non-retryable command sent to the primary.
    pub fn new(command: Document) -> Result<Self, OperationError> {
        if command.is_empty() {
            return Err(OperationError::InvalidArgument(
                "a command document needs at least one field".to_string(),
            ));
        }
        Ok(Self {
            command,
            capabilities: Capabilities::write(),
            criteria: SelectionCriteria::Writable,
        })
    }

    pub fn set_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn set_read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.criteria = SelectionCriteria::ReadPreference(read_preference);
        self
    }

    pub fn set_selection_criteria(mut self, criteria: SelectionCriteria) -> Self {
        self.criteria = criteria;
        self
    }
}

impl Operation for RunCommand {
    type Output = Document;

    fn name(&self) -> &str {
        // The first key of a command document names the command.
        self.command.keys().next().map(String::as_str).unwrap_or("")
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn selection_criteria(&self) -> SelectionCriteria {
        self.criteria.clone()
    }

    fn build(&self, _server: &ServerDescription) -> Result<Document, OperationError> {
        Ok(self.command.clone())
    }

    fn handle_response(
        &self,
        response: Document,
        _server: &ServerDescription,
    ) -> Result<Self::Output, OperationError> {
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn capabilities_compose() {
        let capabilities = Capabilities::read().retryable().cursor_iterating();
        assert!(capabilities.readable);
        assert!(!capabilities.writable);
        assert!(capabilities.retryable);
        assert!(capabilities.cursor_iterating);
    }

    #[test]
    fn run_command_defaults_to_primary() {
        let mut command = Document::new();
        command.insert("ping".to_string(), json!(1));
        let op = RunCommand::new(command).unwrap();
        assert_eq!(op.name(), "ping");
        assert_eq!(op.selection_criteria(), SelectionCriteria::Writable);
        assert!(!op.capabilities().retryable);
    }

    #[test]
    fn run_command_rejects_empty_document() {
        assert!(matches!(
            RunCommand::new(Document::new()),
            Err(OperationError::InvalidArgument(_))
        ));
    }
}
