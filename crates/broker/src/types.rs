//! Identifier and credential types shared by the broker components.
//!
//! - [`ClientId`]: time-ordered client identifier (UUIDv7). Its hyphenated form sorts lexically in
//!   creation order, which the registry relies on for oldest-client lookup.
//! - [`ClientSecret`]: per-registration symmetric key for the client's feature configs. Never
//!   persisted.
//! - [`Ticket`]: bearer credential and encryption key of one session.
//! - [`Realm`]: partition key selecting a session pool.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::BrokerError;

/// Length of a client secret in bytes.
pub const CLIENT_SECRET_LEN: usize = 24;

/// Length of a session ticket in bytes.
pub const TICKET_LEN: usize = 32;

/// Time-ordered unique client identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Mints a fresh identifier ordered after every previously minted one.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Raw form used as the storage field name.
    #[must_use]
    pub fn raw(&self) -> String {
        self.0.hyphenated().to_string()
    }

    /// Compact display encoding (base64url of the 16 id bytes).
    #[must_use]
    pub fn compact(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Parses either the raw or the compact form.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Domain`] if `value` is neither form.
    pub fn parse(value: &str) -> Result<Self, BrokerError> {
        if let Ok(uuid) = Uuid::parse_str(value) {
            return Ok(Self(uuid));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| BrokerError::domain(format!("malformed client id '{value}'")))?;
        let uuid = Uuid::from_slice(&bytes)
            .map_err(|_| BrokerError::domain(format!("malformed client id '{value}'")))?;
        Ok(Self(uuid))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for ClientId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Random key material owned by a single client registration.
///
/// The bytes are zeroed on drop and never written to storage.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecret(Zeroizing<Vec<u8>>);

impl ClientSecret {
    /// Mints [`CLIENT_SECRET_LEN`] random bytes.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; CLIENT_SECRET_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps secret bytes supplied by a caller.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    /// Base64url (unpadded) encoding returned to the registrar.
    #[must_use]
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_slice())
    }

    /// Decodes a base64url secret presented by a client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Domain`] if `encoded` is not valid base64url.
    pub fn decode(encoded: &str) -> Result<Self, BrokerError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| BrokerError::domain("malformed client secret"))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClientSecret(***)")
    }
}

/// Opaque session ticket. Doubles as the session's encryption key.
#[derive(Clone, PartialEq, Eq)]
pub struct Ticket(Zeroizing<Vec<u8>>);

impl Ticket {
    /// Mints [`TICKET_LEN`] random bytes.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; TICKET_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps ticket bytes decoded upstream.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    /// Base64url (unpadded) encoding for cookie transport.
    #[must_use]
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_slice())
    }

    /// Decodes a ticket from its cookie form.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Domain`] if `encoded` is not valid base64url
    /// or decodes to zero bytes.
    pub fn decode(encoded: &str) -> Result<Self, BrokerError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .map_err(|_| BrokerError::domain("malformed ticket"))?;
        if bytes.is_empty() {
            return Err(BrokerError::domain("empty ticket"));
        }
        Ok(Self::from_bytes(bytes))
    }

    /// Raw ticket bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ticket(***)")
    }
}

/// Session partition (tenant or firewall) name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Realm(String);

impl Realm {
    /// Creates a realm from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The realm name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Realm {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Realm {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_sort_in_creation_order() {
        let ids: Vec<ClientId> = (0..32).map(|_| ClientId::generate()).collect();
        let raws: Vec<String> = ids.iter().map(ClientId::raw).collect();
        let mut sorted = raws.clone();
        sorted.sort();
        assert_eq!(raws, sorted);
    }

    #[test]
    fn test_client_id_parses_both_forms() {
        let id = ClientId::generate();
        assert_eq!(ClientId::parse(&id.raw()).unwrap(), id);
        assert_eq!(ClientId::parse(&id.compact()).unwrap(), id);
        assert!(ClientId::parse("not-an-id").is_err());
    }

    #[test]
    fn test_secret_is_24_bytes_and_round_trips() {
        let secret = ClientSecret::generate();
        assert_eq!(secret.as_bytes().len(), CLIENT_SECRET_LEN);

        let encoded = secret.encode();
        assert!(!encoded.contains('='));
        assert_eq!(ClientSecret::decode(&encoded).unwrap(), secret);
    }

    #[test]
    fn test_ticket_encoding() {
        let ticket = Ticket::generate();
        assert_eq!(ticket.as_bytes().len(), TICKET_LEN);
        assert_eq!(Ticket::decode(&ticket.encode()).unwrap(), ticket);
        assert!(Ticket::decode("").is_err());
        assert!(Ticket::decode("***").is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        assert_eq!(format!("{:?}", ClientSecret::generate()), "ClientSecret(***)");
        assert_eq!(format!("{:?}", Ticket::generate()), "Ticket(***)");
    }
}
