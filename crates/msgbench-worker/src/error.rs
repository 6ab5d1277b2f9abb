use msgbench_driver::DriverError;
use thiserror::Error;

/// Errors surfaced to the coordinator by worker control operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a driver is already initialized")]
    DriverAlreadyInitialized,

    #[error("no driver is initialized")]
    DriverNotInitialized,

    #[error("load generation is already running")]
    LoadAlreadyRunning,

    #[error("invalid work assignment: {0}")]
    InvalidAssignment(String),

    #[error("producer probe failed: {0}")]
    ProbeFailed(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}
