//! Client registration, encrypted feature configs and ticket-keyed sessions
//! for the Tessera SSO broker.
//!
//! A client registers once with a set of feature settings (its request
//! signature key, its token format, an optional attribute fetcher). The broker
//! validates every feature, encrypts each resulting config under a key
//! derived from a freshly generated client secret and returns that secret
//! exactly once. Without the secret the stored configs cannot be read, not
//! even by the broker.
//!
//! Users authenticate into a realm and receive an opaque ticket; their
//! attributes are sealed under a key derived from the ticket and cached under
//! a digest of `(realm, ticket)`.
//!
//! # Components
//!
//! - [`ClientRegistry`]: registered client ids and their last-access times
//! - [`FeatureConfigStore`]: one encrypted config per client, restricted to one interface
//! - [`RegistrationOrchestrator`]: validate, persist and roll back registrations
//! - [`SessionStore`]: ticket-keyed user attributes, one cache pool per realm
//! - [`ClientMaintenance`]: explicit unregistration, inactivity purge and capacity limit
//! - [`TokenIssuer`]: mints tokens for a session on behalf of a client
//!
//! # Quick Start
//!
//! ```
//! use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
//! use tessera_broker::{Broker, BrokerConfig};
//!
//! let config = BrokerConfig::builder().keys([URL_SAFE_NO_PAD.encode([7u8; 32])]).build()?;
//! let broker = Broker::in_memory(&config)?;
//! assert_eq!(broker.stores.len(), 4);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a fixed-key cipher, an RSA test key and a
//!   preassembled broker over any backend.
//! - **`failpoints`**: Activates the fail points compiled into registration and session prolonging.

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod crypto;
pub mod error;
pub mod factory;
pub mod feature_store;
pub mod issuance;
pub mod maintenance;
pub mod marshal;
pub mod registration;
pub mod registry;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod types;

pub use broker::Broker;
pub use config::{ConfigInterface, DigestAlgorithm, FeatureConfig, SignatureConfig};
pub use crypto::KeyedCipher;
pub use error::{BrokerError, Result};
pub use factory::{FeatureConfigFactory, default_factories};
pub use feature_store::FeatureConfigStore;
pub use issuance::{Fetcher, JwtTokenizer, TokenIssuer, Tokenizer};
pub use maintenance::ClientMaintenance;
pub use marshal::ConfigMarshaller;
pub use registration::{RegistrationOrchestrator, RegistrationResult};
pub use registry::ClientRegistry;
pub use session::{Attributes, SessionStore, UserAttributesItem};
pub use settings::BrokerConfig;
pub use types::{ClientId, ClientSecret, Realm, Ticket};
