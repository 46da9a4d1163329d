//! Error types for the multisim stack

use thiserror::Error;

use crate::types::SubId;

/// Error types for the multisim library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("configuration error: {0}")]
    Config(String),

    /// The named subscription index is out of range or not yet wired to a
    /// radio-family implementation.
    #[error("subscription {0} is not available")]
    SubscriptionNotAvailable(SubId),

    /// No deactivated subscription index is left to assign.
    #[error("no deactivated subscription available for activation")]
    NoFreeSubscription,

    /// Radio command transport failure.
    #[error("radio command failed: {0}")]
    Radio(String),

    /// Carrier table persistence failure (non-fatal to callers).
    #[error("carrier table write failed: {0}")]
    Carrier(String),

    /// An actor mailbox was closed before the operation completed.
    #[error("actor mailbox closed")]
    ChannelClosed,

    /// I/O errors (configuration file reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Result alias used throughout the multisim crates.
pub type Result<T> = std::result::Result<T, Error>;
