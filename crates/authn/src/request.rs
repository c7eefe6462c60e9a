//! Request context evaluated by the trust predicates.
//!
//! The HTTP layer decodes what it can (client id, client secret, session
//! ticket) before the engine runs. Predicates only read the context; a value
//! the HTTP layer could not decode is simply absent.

use std::{collections::BTreeMap, net::IpAddr};

use chrono::{DateTime, Utc};
use tessera_broker::{ClientId, ClientSecret, Ticket};

use crate::error::{AuthError, Result};

/// Everything a predicate may look at.
#[derive(Debug, Clone, Default)]
pub struct TrustRequest {
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    peer: Option<IpAddr>,
    client_ip: Option<IpAddr>,
    client_id: Option<ClientId>,
    secret: Option<ClientSecret>,
    ticket: Option<Ticket>,
    server_time: Option<DateTime<Utc>>,
}

#[bon::bon]
impl TrustRequest {
    /// Creates a request context.
    ///
    /// # Optional Fields
    ///
    /// * `query` - Query parameters.
    /// * `headers` - Request headers. Names are stored lowercase.
    /// * `peer` - Address of the connected peer.
    /// * `client_ip` - Originating address resolved through trusted proxies. Defaults to `peer`.
    /// * `client_id`, `secret` - Declared client credentials.
    /// * `ticket` - Session ticket decoded from the request.
    /// * `server_time` - Stable server timestamp for this request (e.g. the session's creation
    ///   time). Signature freshness is judged against it instead of the wall clock when set.
    #[builder]
    pub fn new(
        #[builder(default, with = |pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>| {
            pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
        })]
        query: BTreeMap<String, String>,
        #[builder(default, with = |pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>| {
            pairs.into_iter().map(|(k, v)| (k.into().to_ascii_lowercase(), v.into())).collect()
        })]
        headers: BTreeMap<String, String>,
        peer: Option<IpAddr>,
        client_ip: Option<IpAddr>,
        client_id: Option<ClientId>,
        secret: Option<ClientSecret>,
        ticket: Option<Ticket>,
        server_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self { query, headers, peer, client_ip, client_id, secret, ticket, server_time }
    }

    /// Query parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// All query parameters, sorted by name.
    #[must_use]
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Address of the connected peer.
    #[must_use]
    pub fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    /// Originating address, falling back to the peer address.
    #[must_use]
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip.or(self.peer)
    }

    /// Declared client id.
    #[must_use]
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Declared client secret.
    #[must_use]
    pub fn secret(&self) -> Option<&ClientSecret> {
        self.secret.as_ref()
    }

    /// Decoded session ticket.
    #[must_use]
    pub fn ticket(&self) -> Option<&Ticket> {
        self.ticket.as_ref()
    }

    /// Time the request is judged at: the stable server timestamp if one was
    /// recorded, otherwise now.
    #[must_use]
    pub fn server_time(&self) -> DateTime<Utc> {
        self.server_time.unwrap_or_else(Utc::now)
    }
}

/// Decodes client credentials as presented on the wire.
///
/// # Errors
///
/// Returns [`AuthError::MalformedRequest`] if either value does not decode.
pub fn decode_credentials(client_id: &str, secret: &str) -> Result<(ClientId, ClientSecret)> {
    let id = ClientId::parse(client_id).map_err(|e| AuthError::MalformedRequest(e.to_string()))?;
    let secret = ClientSecret::decode(secret).map_err(|e| AuthError::MalformedRequest(e.to_string()))?;
    Ok((id, secret))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::Ipv4Addr;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let request = TrustRequest::builder().headers([("X-Registration-Ticket", "abc")]).build();
        assert_eq!(request.header("x-registration-ticket"), Some("abc"));
        assert_eq!(request.header("X-REGISTRATION-TICKET"), Some("abc"));
        assert_eq!(request.header("x-other"), None);
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let forwarded = IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9));

        assert_eq!(TrustRequest::builder().peer(peer).build().client_ip(), Some(peer));
        assert_eq!(TrustRequest::builder().peer(peer).client_ip(forwarded).build().client_ip(), Some(forwarded));
        assert_eq!(TrustRequest::default().client_ip(), None);
    }

    #[test]
    fn test_server_time_prefers_recorded_timestamp() {
        let recorded = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(TrustRequest::builder().server_time(recorded).build().server_time(), recorded);
        assert!(TrustRequest::default().server_time() > recorded);
    }

    #[test]
    fn test_decode_credentials() {
        let id = ClientId::generate();
        let secret = ClientSecret::generate();

        let (decoded_id, decoded_secret) = decode_credentials(&id.compact(), &secret.encode()).unwrap();
        assert_eq!(decoded_id, id);
        assert_eq!(decoded_secret.as_bytes(), secret.as_bytes());

        assert!(matches!(decode_credentials("nope", &secret.encode()), Err(AuthError::MalformedRequest(_))));
    }
}
