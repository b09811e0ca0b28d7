use thiserror::Error;

use crate::device::Device;

/// Clipbird error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("No pinned certificate for {0}")]
    CertificateNotFound(String),

    #[error("Certificate mismatch for {0}")]
    CertificateMismatch(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(Device),

    #[error("Not connected to a server")]
    NotConnected,

    #[error("No active role")]
    NoActiveRole,

    #[error("Operation not available as {0}")]
    WrongRole(&'static str),

    #[error("History index {index} out of range (len {len})")]
    HistoryIndexOutOfRange { index: usize, len: usize },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Host identity error: {0}")]
    Identity(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Coordinator is not running")]
    CoordinatorStopped,
}

pub type Result<T> = std::result::Result<T, Error>;
