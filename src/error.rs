use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkbusError {
    #[error("No workers available")]
    NoWorkersAvailable,

    #[error("No worker with address {0}")]
    WorkerNotFound(String),

    #[error("Invalid dispatch mode: {0}. Use: random, sequential or address")]
    InvalidMode(String),

    #[error("targetAddress is required for address mode")]
    MissingTargetAddress,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Timed out waiting for worker response")]
    DispatchTimeout,

    #[error("Bus publish failed: {0}")]
    Publish(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkbusError>;
