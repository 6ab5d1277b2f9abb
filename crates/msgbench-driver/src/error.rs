use thiserror::Error;

/// Errors surfaced by drivers and the driver registry.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no driver registered under '{0}'")]
    UnknownDriver(String),

    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),

    #[error("topic '{0}' does not exist")]
    NoSuchTopic(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("driver is closed")]
    Closed,
}
