//! Broker error types.
//!
//! [`BrokerError`] covers registration, config persistence, session storage
//! and token issuance. Variants that stem from a wrong client secret or
//! ticket ([`Decryption`](BrokerError::Decryption),
//! [`Domain`](BrokerError::Domain)) must be surfaced as access-denied,
//! never as a server fault: see [`BrokerError::is_access_denied`].

use tessera_storage::{ConfigError, StorageError};
use thiserror::Error;

/// Errors raised by the broker core.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BrokerError {
    /// Registration input failed validation.
    ///
    /// The message lists every violated field, one per line, and is safe
    /// to return verbatim to the registrar.
    #[error("{0}")]
    Validation(String),

    /// No factory matches the feature key and discriminant.
    #[error("Unsupported feature \"{key}\" (implementation \"{hash}\")")]
    UnsupportedFeature {
        /// Feature key from the registration input.
        key: String,
        /// Discriminant selecting the implementation.
        hash: String,
    },

    /// A produced config could not be persisted consistently.
    #[error("{0}")]
    PersistenceIntegrity(String),

    /// Ciphertext could not be authenticated under any configured key.
    #[error("Unable to decrypt value")]
    Decryption,

    /// A value decoded but is not what the caller may use (foreign type, corrupt bytes).
    #[error("Invalid value: {0}")]
    Domain(String),

    /// A value is not assignable to the expected config interface.
    #[error("Type mismatch: {0}")]
    Type(String),

    /// Unknown identifier on an administrative lookup.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No session exists for the presented ticket.
    #[error("Session not found")]
    SessionNotFound,

    /// The client has no config for a feature the operation needs.
    #[error("Feature \"{0}\" is not configured for this client")]
    FeatureNotConfigured(String),

    /// A runtime invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// A pluggable collaborator (tokenizer, fetcher) failed.
    #[error("External collaborator failed: {0}")]
    External(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Storage backend error.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Storage error: {0}")]
    Storage(
        /// The underlying storage error.
        #[from]
        #[source]
        StorageError,
    ),
}

impl BrokerError {
    /// Message of the error raised when a required store is left without config.
    pub const MISSING_REQUIRED_DATA: &'static str = "Missing required registration data.";

    /// Creates the error raised when a required store received no config.
    #[must_use]
    pub fn missing_required_data() -> Self {
        Self::PersistenceIntegrity(Self::MISSING_REQUIRED_DATA.to_owned())
    }

    /// Creates a new `Domain` error.
    #[must_use]
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` when the error must be reported as a denied credential.
    ///
    /// A wrong secret or ticket is indistinguishable from a forged one.
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Decryption | Self::Domain(_))
    }
}

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
