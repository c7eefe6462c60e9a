//! Trust engine error types.
//!
//! Predicates never surface these to callers as a reason for a denial. A
//! denied request only ever sees [`AuthError::AccessDenied`]; the other
//! variants describe configuration or verifier faults and are logged.

use tessera_broker::BrokerError;
use tessera_storage::ConfigError;
use thiserror::Error;

/// Trust engine errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` so new variants may be added in
/// minor releases. Downstream match expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The request is not trusted. Carries no predicate-level detail.
    #[error("Access denied")]
    AccessDenied,

    /// Digest algorithm not allowed by policy.
    #[error("Unsupported digest: {0}")]
    UnsupportedDigest(String),

    /// A client's stored public key cannot be parsed.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// A request attribute is present but malformed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// An IP allowlist entry is neither an address, a CIDR block nor `peer`.
    #[error("Invalid IP rule '{rule}': {reason}")]
    InvalidIpRule {
        /// The offending entry.
        rule: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A request signature was presented twice within its validity window.
    #[error("Signature replayed")]
    SignatureReplayed,

    /// Trust configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Broker lookup failure.
    #[error("Broker error: {0}")]
    Broker(
        /// The underlying broker error.
        #[source]
        BrokerError,
    ),
}

impl AuthError {
    /// Creates an [`AuthError::InvalidIpRule`].
    #[must_use]
    pub fn invalid_ip_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidIpRule { rule: rule.into(), reason: reason.into() }
    }
}

impl From<BrokerError> for AuthError {
    fn from(err: BrokerError) -> Self {
        AuthError::Broker(err)
    }
}

/// Result type alias for trust engine operations.
pub type Result<T> = std::result::Result<T, AuthError>;
