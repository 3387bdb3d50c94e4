//! VelumTrust -- record-layer cryptography for the Velum tunnel.
//!
//! Provides the AEAD cipher suites the obfuscator seals records with
//! (AES-256-GCM, ChaCha20-Poly1305) and the HKDF nonce schedule that
//! turns each record's random prefix into a unique nonce under the
//! session key.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod aead;
pub mod error;
pub mod kdf;

pub use aead::{Aes256GcmSealer, ChaCha20Sealer, CipherSuite, RecordSealer, NONCE_LEN, TAG_LEN};
pub use error::{Result, VelumTrustError};
pub use kdf::derive_record_nonce;

/// Pre-established 32-byte session key.
///
/// Key agreement happens outside this crate; the key arrives here fully
/// formed. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SessionKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// Never print key material.
impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}
