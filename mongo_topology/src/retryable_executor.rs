mod executor;
mod operation;
mod operation_error;

pub use executor::RetryableExecutor;
pub use operation::{Capabilities, Operation, RunCommand};
pub use operation_error::{OperationError, RETRYABLE_WRITE_ERROR_LABEL};
