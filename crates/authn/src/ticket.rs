//! Ticket predicates.
//!
//! Session tickets are decoded before the engine runs, so ticket presence is
//! a plain check on the request context. Registration tickets are opaque
//! strings issued out of band; a [`RegistrationTicketValidator`] decides
//! whether one is acceptable.

use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

use crate::{request::TrustRequest, vote::Vote};

/// Grants if the request carries a decoded session ticket.
#[must_use]
pub fn ticket_presence(request: &TrustRequest) -> Vote {
    Vote::from_bool(request.ticket().is_some())
}

/// Decides whether a registration ticket is acceptable.
#[async_trait]
pub trait RegistrationTicketValidator: Send + Sync {
    /// Returns `true` if `ticket` authorizes a registration.
    async fn validate(&self, ticket: &str) -> bool;
}

/// Accepts a fixed set of registration tickets.
#[derive(Clone, Default)]
pub struct StaticTicketValidator {
    tickets: BTreeSet<String>,
}

impl StaticTicketValidator {
    /// Creates a validator accepting exactly `tickets`.
    pub fn new(tickets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self { tickets: tickets.into_iter().map(Into::into).collect() }
    }
}

impl fmt::Debug for StaticTicketValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTicketValidator").field("tickets", &self.tickets.len()).finish()
    }
}

#[async_trait]
impl RegistrationTicketValidator for StaticTicketValidator {
    async fn validate(&self, ticket: &str) -> bool {
        self.tickets.contains(ticket)
    }
}

/// Grants if the request carries a registration ticket the validator accepts.
#[derive(Clone)]
pub struct RegistrationTicketPredicate {
    header: String,
    validator: Option<Arc<dyn RegistrationTicketValidator>>,
}

impl RegistrationTicketPredicate {
    /// Creates the predicate reading tickets from `header`.
    ///
    /// Without a validator every request is denied.
    #[must_use]
    pub fn new(header: impl Into<String>, validator: Option<Arc<dyn RegistrationTicketValidator>>) -> Self {
        Self { header: header.into(), validator }
    }

    /// Evaluates the predicate.
    pub async fn evaluate(&self, request: &TrustRequest) -> Vote {
        let Some(validator) = &self.validator else {
            debug!("No registration ticket validator configured");
            return Vote::Deny;
        };
        match request.header(&self.header).map(str::trim) {
            Some(ticket) if !ticket.is_empty() => Vote::from_bool(validator.validate(ticket).await),
            _ => Vote::Deny,
        }
    }
}

impl fmt::Debug for RegistrationTicketPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationTicketPredicate")
            .field("header", &self.header)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}
