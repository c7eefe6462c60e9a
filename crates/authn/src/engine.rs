//! The request trust engine.
//!
//! Callers name the predicates a route needs; only those are evaluated and
//! their votes combined with [`decide`]. A denial never says which predicate
//! failed.
//!
//! ```no_run
//! use tessera_authn::{Predicate, TrustConfig, TrustEngine, TrustRequest};
//! use tessera_broker::FeatureConfigStore;
//!
//! # async fn example(store: FeatureConfigStore, request: TrustRequest) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TrustEngine::builder().config(&TrustConfig::default()).signature_store(store).build()?;
//! engine.authorize(&request, &[Predicate::ClientIp, Predicate::Signature]).await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc};

use tessera_broker::FeatureConfigStore;
use tracing::{debug, info};

use crate::{
    error::{AuthError, Result},
    ip::IpAllowlist,
    replay::{InMemoryReplayDetector, ReplayDetector},
    request::TrustRequest,
    settings::TrustConfig,
    signature::SignaturePredicate,
    ticket::{RegistrationTicketPredicate, RegistrationTicketValidator, ticket_presence},
    vote::{Vote, decide},
};

/// A predicate a route can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// Valid, fresh client request signature.
    Signature,
    /// A decoded session ticket.
    Ticket,
    /// Source address on the client allowlist.
    ClientIp,
    /// Source address on the registrar allowlist.
    RegistrarIp,
    /// An accepted registration ticket header.
    RegistrationTicket,
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Signature => "signature",
            Self::Ticket => "ticket",
            Self::ClientIp => "client_ip",
            Self::RegistrarIp => "registrar_ip",
            Self::RegistrationTicket => "registration_ticket",
        })
    }
}

/// Evaluates trust predicates over requests.
#[derive(Clone)]
pub struct TrustEngine {
    signature: SignaturePredicate,
    client_ips: IpAllowlist,
    registrar_ips: IpAllowlist,
    registration: RegistrationTicketPredicate,
    allow_if_all_abstain: bool,
}

#[bon::bon]
impl TrustEngine {
    /// Creates an engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Trust configuration.
    /// * `signature_store` - Store holding the clients' signature configs.
    /// * `registration_validator` - Optional registration ticket validator. Without one the
    ///   registration ticket predicate always denies.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    #[builder]
    pub fn new(
        config: &TrustConfig,
        signature_store: FeatureConfigStore,
        registration_validator: Option<Arc<dyn RegistrationTicketValidator>>,
    ) -> Result<Self> {
        config.validate()?;
        let replay = config
            .replay_capacity()
            .map(|capacity| Arc::new(InMemoryReplayDetector::new(capacity)) as Arc<dyn ReplayDetector>);
        let signature = SignaturePredicate::builder()
            .store(signature_store)
            .settings(config.signature().clone())
            .allowed_digests(config.signature().allowed_digests()?)
            .maybe_replay(replay)
            .build();

        Ok(Self {
            signature,
            client_ips: config.client_allowlist()?,
            registrar_ips: config.registrar_allowlist()?,
            registration: RegistrationTicketPredicate::new(
                config.registration_ticket_header(),
                registration_validator,
            ),
            allow_if_all_abstain: config.allow_if_all_abstain(),
        })
    }

    /// Evaluates one predicate.
    pub async fn vote(&self, request: &TrustRequest, predicate: Predicate) -> Vote {
        match predicate {
            Predicate::Signature => self.signature.evaluate(request).await,
            Predicate::Ticket => ticket_presence(request),
            Predicate::ClientIp => self.client_ips.vote(request.client_ip()),
            Predicate::RegistrarIp => self.registrar_ips.vote(request.client_ip()),
            Predicate::RegistrationTicket => self.registration.evaluate(request).await,
        }
    }

    /// Returns `true` if the request satisfies `predicates`.
    ///
    /// Predicates are evaluated in order and evaluation stops at the first
    /// denial.
    #[tracing::instrument(skip(self, request))]
    pub async fn is_trusted(&self, request: &TrustRequest, predicates: &[Predicate]) -> bool {
        let mut votes = Vec::with_capacity(predicates.len());
        for &predicate in predicates {
            let vote = self.vote(request, predicate).await;
            debug!(%predicate, ?vote, "Predicate evaluated");
            votes.push(vote);
            if vote == Vote::Deny {
                break;
            }
        }
        decide(votes, self.allow_if_all_abstain)
    }

    /// Fails unless the request satisfies `predicates`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccessDenied`] if the request is not trusted.
    pub async fn authorize(&self, request: &TrustRequest, predicates: &[Predicate]) -> Result<()> {
        if self.is_trusted(request, predicates).await {
            Ok(())
        } else {
            info!(peer = ?request.peer(), "Request denied");
            Err(AuthError::AccessDenied)
        }
    }
}

impl fmt::Debug for TrustEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustEngine")
            .field("signature", &self.signature)
            .field("client_ips", &self.client_ips)
            .field("registrar_ips", &self.registrar_ips)
            .field("registration", &self.registration)
            .field("allow_if_all_abstain", &self.allow_if_all_abstain)
            .finish()
    }
}
