//! Signature digest validation.
//!
//! Request signatures are RSA PKCS#1 v1.5 over a digest the client picked at
//! registration. The operator decides which digests are acceptable; this
//! module enforces that policy.
//!
//! # Security
//!
//! - Broken or absent digests (`md5`, `sha1`, `none`) are always rejected
//! - Only SHA-2 digests are accepted

use tessera_broker::DigestAlgorithm;

use crate::error::AuthError;

/// Digests that are never accepted.
pub const FORBIDDEN_DIGESTS: &[&str] = &["none", "md5", "sha1"];

/// Digests the verifier implements.
pub const ACCEPTED_DIGESTS: &[&str] = &["sha256", "sha384", "sha512"];

/// Validates a digest name against the security policy.
///
/// Names are matched case-insensitively, with dashes ignored (`SHA-256`
/// equals `sha256`).
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedDigest`] if the digest is forbidden or
/// not in [`ACCEPTED_DIGESTS`].
///
/// # Examples
///
/// ```
/// use tessera_authn::validation::validate_digest;
///
/// assert!(validate_digest("SHA-384").is_ok());
/// assert!(validate_digest("sha1").is_err());
/// ```
pub fn validate_digest(name: &str) -> Result<DigestAlgorithm, AuthError> {
    let normalized = name.to_ascii_lowercase().replace('-', "");

    if FORBIDDEN_DIGESTS.contains(&normalized.as_str()) {
        return Err(AuthError::UnsupportedDigest(format!("Digest '{name}' is not allowed for security reasons")));
    }

    if !ACCEPTED_DIGESTS.contains(&normalized.as_str()) {
        return Err(AuthError::UnsupportedDigest(format!("Digest '{name}' is not in accepted list")));
    }

    DigestAlgorithm::from_name(&normalized)
        .ok_or_else(|| AuthError::UnsupportedDigest(format!("Digest '{name}' has no verifier")))
}
