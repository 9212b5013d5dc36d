//! Error type for MQTT transport operations.
//!
//! `TransferError` aggregates setup, connection and publish failures into a
//! single type. Setup errors (`ClientSetup`, `ConfigError`, `Io`) surface at
//! startup; `ClientTransfer` and `InvalidMetadata` surface per publish;
//! `ClientConnection` and `RetriesPolicy` come out of the connection kernel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Topic or QoS passed to the publisher is unusable.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The client could not be constructed (bad TLS material, etc.).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// The connection kernel is not running or was already taken.
    #[error("Connection kernel error: {0}")]
    ConnectionKernel(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request could not be queued to the event loop.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Reconnect attempts exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
