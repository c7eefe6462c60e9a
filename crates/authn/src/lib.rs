//! # Tessera Request Trust
//!
//! Decides whether an incoming request may act as a registered client, a
//! logged-in user or a registrar.
//!
//! This crate provides:
//! - **Predicates**: signed-request validity, session ticket presence, client and registrar
//!   address allowlists, registration ticket validity
//! - **Composition**: a [`TrustEngine`] that evaluates only the predicates a route requires
//! - **Replay detection**: optional rejection of request signatures presented twice
//!
//! ## Semantics
//!
//! - A predicate whose inputs are missing from the request abstains
//! - A single denial denies the request; abstentions never do
//! - Verifier faults deny, they are never surfaced to the caller
//!
//! ## Example
//!
//! ```no_run
//! use tessera_authn::{Predicate, TrustConfig, TrustEngine, TrustRequest};
//! use tessera_broker::{Broker, BrokerConfig};
//!
//! # async fn example(request: TrustRequest) -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::in_memory(&BrokerConfig::builder().keys(["..."]).build()?)?;
//! let store = broker.store("signature").cloned().ok_or("no signature store")?;
//!
//! let config = TrustConfig::builder().client_ips(["10.0.0.0/8"]).build()?;
//! let engine = TrustEngine::builder().config(&config).signature_store(store).build()?;
//!
//! engine.authorize(&request, &[Predicate::ClientIp, Predicate::Signature]).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The trust engine.
pub mod engine;
/// Trust engine error types.
pub mod error;
/// Source address allowlists.
pub mod ip;
/// Signature replay detection.
pub mod replay;
/// Request context.
pub mod request;
/// Trust configuration.
pub mod settings;
/// Signed-request predicate.
pub mod signature;
/// Ticket predicates.
pub mod ticket;
/// Digest validation.
pub mod validation;
/// Predicate verdicts.
pub mod vote;

#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use engine::{Predicate, TrustEngine};
pub use error::{AuthError, Result};
pub use ip::{IpAllowlist, IpRule};
pub use replay::{InMemoryReplayDetector, ReplayDetector};
pub use request::{TrustRequest, decode_credentials};
pub use settings::TrustConfig;
pub use signature::SignaturePredicate;
pub use ticket::{RegistrationTicketValidator, StaticTicketValidator};
pub use validation::{ACCEPTED_DIGESTS, FORBIDDEN_DIGESTS, validate_digest};
pub use vote::{Vote, decide};
