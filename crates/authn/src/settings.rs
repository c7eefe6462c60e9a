//! Trust engine configuration.
//!
//! # Example
//!
//! ```
//! use tessera_authn::settings::TrustConfig;
//!
//! let config: TrustConfig = serde_json::from_str(r#"{
//!     "client_ips": ["10.0.0.0/8", "2001:db8::/32"],
//!     "registrar_ips": ["peer"],
//!     "signature": { "exclude": ["utm_source"] },
//!     "replay_capacity": 100000
//! }"#)?;
//! config.validate()?;
//! assert_eq!(config.signature().signature_param, "_signature");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use tessera_broker::DigestAlgorithm;
use tessera_storage::ConfigError;

use crate::{
    error::{AuthError, Result},
    ip::IpAllowlist,
    validation::{ACCEPTED_DIGESTS, validate_digest},
};

/// Default query parameter carrying the request signature.
pub const DEFAULT_SIGNATURE_PARAM: &str = "_signature";

/// Default query parameter carrying the declared request timestamp.
pub const DEFAULT_TIMESTAMP_PARAM: &str = "_timestamp";

/// Default header carrying a registration ticket.
pub const DEFAULT_REGISTRATION_TICKET_HEADER: &str = "x-registration-ticket";

fn default_signature_param() -> String {
    DEFAULT_SIGNATURE_PARAM.to_owned()
}

fn default_timestamp_param() -> String {
    DEFAULT_TIMESTAMP_PARAM.to_owned()
}

fn default_digests() -> Vec<String> {
    ACCEPTED_DIGESTS.iter().map(|d| (*d).to_owned()).collect()
}

fn default_registration_ticket_header() -> String {
    DEFAULT_REGISTRATION_TICKET_HEADER.to_owned()
}

/// Request signature settings shared by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureSettings {
    /// Query parameter carrying the signature.
    #[serde(default = "default_signature_param")]
    pub signature_param: String,

    /// Query parameter carrying the declared timestamp.
    #[serde(default = "default_timestamp_param")]
    pub timestamp_param: String,

    /// Query parameters left out of the signed string.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Digests clients may sign with.
    #[serde(default = "default_digests")]
    pub digests: Vec<String>,
}

impl Default for SignatureSettings {
    fn default() -> Self {
        Self {
            signature_param: default_signature_param(),
            timestamp_param: default_timestamp_param(),
            exclude: Vec::new(),
            digests: default_digests(),
        }
    }
}

impl SignatureSettings {
    /// Validates and returns the allowed digests.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnsupportedDigest`] for a forbidden or unknown digest.
    pub fn allowed_digests(&self) -> Result<Vec<DigestAlgorithm>> {
        self.digests.iter().map(|name| validate_digest(name)).collect()
    }
}

/// Complete trust engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustConfig {
    /// Addresses trusted to act as clients. Empty trusts everyone.
    #[serde(default)]
    pub(crate) client_ips: Vec<String>,

    /// Addresses trusted to register clients. Empty trusts everyone.
    #[serde(default)]
    pub(crate) registrar_ips: Vec<String>,

    /// Request signature settings.
    #[serde(default)]
    pub(crate) signature: SignatureSettings,

    /// Header carrying a registration ticket.
    #[serde(default = "default_registration_ticket_header")]
    pub(crate) registration_ticket_header: String,

    /// Grant when every evaluated predicate abstained.
    #[serde(default)]
    pub(crate) allow_if_all_abstain: bool,

    /// Capacity of the signature replay detector. Disabled when unset.
    #[serde(default)]
    pub(crate) replay_capacity: Option<u64>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            client_ips: Vec::new(),
            registrar_ips: Vec::new(),
            signature: SignatureSettings::default(),
            registration_ticket_header: default_registration_ticket_header(),
            allow_if_all_abstain: false,
            replay_capacity: None,
        }
    }
}

#[bon::bon]
impl TrustConfig {
    /// Creates a validated configuration.
    ///
    /// # Optional Fields
    ///
    /// * `client_ips` - Client allowlist (default: empty, trusts everyone).
    /// * `registrar_ips` - Registrar allowlist (default: empty, trusts everyone).
    /// * `signature` - Signature settings (default: `_signature`, `_timestamp`, every SHA-2 digest).
    /// * `registration_ticket_header` - Default: `x-registration-ticket`.
    /// * `allow_if_all_abstain` - Default: `false`.
    /// * `replay_capacity` - Enables replay detection when set.
    ///
    /// # Errors
    ///
    /// Returns an error if [`validate`](Self::validate) fails.
    #[builder]
    pub fn new(
        #[builder(default, with = |iter: impl IntoIterator<Item = impl Into<String>>| {
            iter.into_iter().map(Into::into).collect()
        })]
        client_ips: Vec<String>,
        #[builder(default, with = |iter: impl IntoIterator<Item = impl Into<String>>| {
            iter.into_iter().map(Into::into).collect()
        })]
        registrar_ips: Vec<String>,
        #[builder(default)] signature: SignatureSettings,
        #[builder(into, default = default_registration_ticket_header())] registration_ticket_header: String,
        #[builder(default)] allow_if_all_abstain: bool,
        replay_capacity: Option<u64>,
    ) -> Result<Self> {
        let config = Self {
            client_ips,
            registrar_ips,
            signature,
            registration_ticket_header,
            allow_if_all_abstain,
            replay_capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidIpRule`] for a malformed allowlist entry
    /// - [`AuthError::UnsupportedDigest`] for a disallowed digest
    /// - [`AuthError::Config`] for empty or clashing parameter names, an empty header name or a
    ///   zero replay capacity
    pub fn validate(&self) -> Result<()> {
        self.client_allowlist()?;
        self.registrar_allowlist()?;

        if self.signature.allowed_digests()?.is_empty() {
            return Err(ConfigError::Missing { field: "signature.digests" }.into());
        }
        if self.signature.signature_param.is_empty() {
            return Err(ConfigError::Missing { field: "signature.signature_param" }.into());
        }
        if self.signature.timestamp_param.is_empty() {
            return Err(ConfigError::Missing { field: "signature.timestamp_param" }.into());
        }
        if self.signature.signature_param == self.signature.timestamp_param {
            return Err(ConfigError::invalid(
                "signature.timestamp_param",
                "must differ from signature.signature_param",
            )
            .into());
        }
        if self.signature.exclude.contains(&self.signature.timestamp_param) {
            return Err(ConfigError::invalid("signature.exclude", "cannot exclude the timestamp parameter").into());
        }
        if self.registration_ticket_header.trim().is_empty() {
            return Err(ConfigError::Missing { field: "registration_ticket_header" }.into());
        }
        if self.replay_capacity == Some(0) {
            return Err(ConfigError::BelowMinimum {
                field: "replay_capacity",
                min: "1".into(),
                value: "0".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Parsed client allowlist.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidIpRule`] for a malformed entry.
    pub fn client_allowlist(&self) -> Result<IpAllowlist> {
        IpAllowlist::parse(&self.client_ips)
    }

    /// Parsed registrar allowlist.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidIpRule`] for a malformed entry.
    pub fn registrar_allowlist(&self) -> Result<IpAllowlist> {
        IpAllowlist::parse(&self.registrar_ips)
    }

    /// Signature settings.
    #[must_use]
    pub fn signature(&self) -> &SignatureSettings {
        &self.signature
    }

    /// Registration ticket header name.
    #[must_use]
    pub fn registration_ticket_header(&self) -> &str {
        &self.registration_ticket_header
    }

    /// Whether an all-abstain decision grants.
    #[must_use]
    pub fn allow_if_all_abstain(&self) -> bool {
        self.allow_if_all_abstain
    }

    /// Replay detector capacity, if enabled.
    #[must_use]
    pub fn replay_capacity(&self) -> Option<u64> {
        self.replay_capacity
    }
}
