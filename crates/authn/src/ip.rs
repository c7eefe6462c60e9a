//! Source address allowlists.
//!
//! Entries are single addresses (`192.0.2.7`, `2001:db8::1`), CIDR blocks
//! (`10.0.0.0/8`, `2001:db8::/32`) or the [`PEER_SENTINEL`], which trusts
//! whatever the raw peer address is and so disables the check.
//!
//! IPv4-mapped IPv6 addresses (`::ffff:192.0.2.7`) are compared in their
//! IPv4 form.

use std::{fmt, net::IpAddr, str::FromStr};

use crate::{error::AuthError, vote::Vote};

/// Allowlist entry that disables address checks.
pub const PEER_SENTINEL: &str = "peer";

/// One allowlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpRule {
    /// Trust any raw peer address.
    Peer,
    /// Exactly this address.
    Exact(IpAddr),
    /// Every address in `network/prefix`.
    Block {
        /// Network address, host bits cleared.
        network: IpAddr,
        /// Prefix length in bits.
        prefix: u8,
    },
}

impl IpRule {
    /// Returns `true` if `ip` satisfies this rule.
    #[must_use]
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        match *self {
            Self::Peer => true,
            Self::Exact(addr) => addr == ip,
            Self::Block { network, prefix } => match (network, ip) {
                (IpAddr::V4(net), IpAddr::V4(ip)) => {
                    let mask = prefix_mask_v4(prefix);
                    u32::from(net) & mask == u32::from(ip) & mask
                },
                (IpAddr::V6(net), IpAddr::V6(ip)) => {
                    let mask = prefix_mask_v6(prefix);
                    u128::from(net) & mask == u128::from(ip) & mask
                },
                (IpAddr::V6(net), IpAddr::V4(ip)) => {
                    let mask = prefix_mask_v6(prefix);
                    u128::from(net) & mask == u128::from(ip.to_ipv6_mapped()) & mask
                },
                _ => false,
            },
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    u32::MAX.checked_shl(32u32.saturating_sub(u32::from(prefix))).unwrap_or(0)
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    u128::MAX.checked_shl(128u32.saturating_sub(u32::from(prefix))).unwrap_or(0)
}

impl FromStr for IpRule {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rule = s.trim();
        if rule.eq_ignore_ascii_case(PEER_SENTINEL) {
            return Ok(Self::Peer);
        }

        let Some((addr, prefix)) = rule.split_once('/') else {
            let addr = rule
                .parse::<IpAddr>()
                .map_err(|_| AuthError::invalid_ip_rule(rule, "not an IP address"))?;
            return Ok(Self::Exact(addr.to_canonical()));
        };

        let addr = addr
            .parse::<IpAddr>()
            .map_err(|_| AuthError::invalid_ip_rule(rule, "not an IP network"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| AuthError::invalid_ip_rule(rule, "prefix is not a number"))?;
        // An IPv4-mapped network whose prefix stays inside the mapped range is an IPv4 block.
        let (addr, prefix) = match addr.to_canonical() {
            IpAddr::V4(v4) if addr.is_ipv6() && (96..=128).contains(&prefix) => (IpAddr::V4(v4), prefix - 96),
            IpAddr::V4(_) if addr.is_ipv6() => (addr, prefix),
            canonical => (canonical, prefix),
        };
        let network = match addr {
            IpAddr::V4(v4) if prefix <= 32 => IpAddr::V4((u32::from(v4) & prefix_mask_v4(prefix)).into()),
            IpAddr::V6(v6) if prefix <= 128 => IpAddr::V6((u128::from(v6) & prefix_mask_v6(prefix)).into()),
            _ => return Err(AuthError::invalid_ip_rule(rule, "prefix too long")),
        };
        Ok(Self::Block { network, prefix })
    }
}

impl fmt::Display for IpRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer => f.write_str(PEER_SENTINEL),
            Self::Exact(addr) => write!(f, "{addr}"),
            Self::Block { network, prefix } => write!(f, "{network}/{prefix}"),
        }
    }
}

/// A set of [`IpRule`]s.
///
/// An empty allowlist trusts every address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowlist {
    rules: Vec<IpRule>,
}

impl IpAllowlist {
    /// Parses every entry of `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidIpRule`] for the first malformed entry.
    pub fn parse<I, S>(rules: I) -> Result<Self, AuthError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = rules.into_iter().map(|rule| rule.as_ref().parse()).collect::<Result<_, _>>()?;
        Ok(Self { rules })
    }

    /// Returns `true` if no rule is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns `true` if the list contains the [`PEER_SENTINEL`].
    #[must_use]
    pub fn trusts_peer(&self) -> bool {
        self.rules.contains(&IpRule::Peer)
    }

    /// Returns `true` if `ip` is trusted.
    #[must_use]
    pub fn allows(&self, ip: IpAddr) -> bool {
        self.is_empty() || self.rules.iter().any(|rule| rule.matches(ip))
    }

    /// Votes on a source address.
    ///
    /// Grants without looking at the address if the list is empty or trusts
    /// the peer. Otherwise abstains when the address is unknown.
    #[must_use]
    pub fn vote(&self, ip: Option<IpAddr>) -> Vote {
        if self.is_empty() || self.trusts_peer() {
            return Vote::Grant;
        }
        match ip {
            Some(ip) => Vote::from_bool(self.allows(ip)),
            None => Vote::Abstain,
        }
    }
}
