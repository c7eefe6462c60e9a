//! Keyed authenticated encryption.
//!
//! [`KeyedCipher`] seals byte payloads under the combination of a server key
//! and a caller-supplied credential (a client secret or a session ticket).
//! Neither half alone is enough to decrypt.
//!
//! # Format
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────┐
//! │ nonce (12 B) │ AES-256-GCM ciphertext + tag     │
//! └──────────────┴──────────────────────────────────┘
//! ```
//!
//! The AES key is `HKDF-SHA256(ikm = server key, salt = credential)`.
//!
//! # Key rotation
//!
//! Encryption always uses the first configured server key. Decryption tries
//! each configured key in order, so a new key can be prepended while values
//! sealed under older keys stay readable until those keys are dropped.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tessera_storage::ConfigError;
use zeroize::Zeroizing;

use crate::error::BrokerError;

/// Length of a server key in bytes.
pub const SERVER_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const KDF_INFO: &[u8] = b"tessera-broker keyed cipher v1";

/// A server-side key. Zeroed on drop.
pub type ServerKey = Zeroizing<[u8; SERVER_KEY_LEN]>;

/// Authenticated symmetric codec over a rotating list of server keys.
#[derive(Clone)]
pub struct KeyedCipher {
    keys: Vec<ServerKey>,
}

impl KeyedCipher {
    /// Creates a cipher whose primary key is `keys[0]`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] if `keys` is empty.
    pub fn new(keys: Vec<ServerKey>) -> Result<Self, BrokerError> {
        if keys.is_empty() {
            return Err(ConfigError::Missing { field: "encryption.keys" }.into());
        }
        Ok(Self { keys })
    }

    /// Number of configured server keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Encrypts `plaintext` under the primary server key and `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Internal`] if the AEAD primitive fails.
    pub fn encrypt(&self, plaintext: &[u8], credential: &[u8]) -> Result<Vec<u8>, BrokerError> {
        let Some(primary) = self.keys.first() else {
            return Err(BrokerError::internal("keyed cipher has no server key"));
        };
        let cipher = derive_cipher(primary, credential)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| BrokerError::internal("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Decrypts `ciphertext`, trying each server key in order.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Decryption`] if no configured key authenticates
    /// the value, including when `ciphertext` is truncated.
    pub fn decrypt(&self, ciphertext: &[u8], credential: &[u8]) -> Result<Vec<u8>, BrokerError> {
        if ciphertext.len() < NONCE_LEN {
            return Err(BrokerError::Decryption);
        }
        let (nonce, sealed) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);

        for key in &self.keys {
            let cipher = derive_cipher(key, credential)?;
            if let Ok(plaintext) = cipher.decrypt(nonce, sealed) {
                return Ok(plaintext);
            }
        }
        Err(BrokerError::Decryption)
    }
}

impl std::fmt::Debug for KeyedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCipher").field("keys", &self.keys.len()).finish_non_exhaustive()
    }
}

fn derive_cipher(server_key: &ServerKey, credential: &[u8]) -> Result<Aes256Gcm, BrokerError> {
    let hkdf = Hkdf::<Sha256>::new(Some(credential), server_key.as_slice());
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(KDF_INFO, okm.as_mut_slice())
        .map_err(|_| BrokerError::internal("key derivation failed"))?;
    Aes256Gcm::new_from_slice(okm.as_slice()).map_err(|_| BrokerError::internal("invalid derived key length"))
}
