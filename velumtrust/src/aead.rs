// AEAD record ciphers: AES-256-GCM and ChaCha20-Poly1305 (RFC 8439).
//
// A sealed record body is ciphertext || 16-byte tag. Nonces come from the
// HKDF schedule in `kdf`; this module never generates them itself.

// Both aes-gcm and chacha20poly1305 re-export the same `aead` traits.
// Import once from aes_gcm to avoid redundant imports.
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce as AesNonce};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use crate::error::{Result, VelumTrustError};

/// AEAD nonce length in bytes (both suites).
pub const NONCE_LEN: usize = 12;

/// AEAD authentication tag length in bytes (both suites).
pub const TAG_LEN: usize = 16;

/// The two AEAD suites a Velum session may seal records with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// ChaCha20-Poly1305 record sealer.
pub struct ChaCha20Sealer {
    cipher: ChaCha20Poly1305,
}

impl ChaCha20Sealer {
    /// Build a sealer from a 32-byte session key.
    pub fn new(key: &[u8; 32]) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| VelumTrustError::InvalidKey(format!("chacha20 init: {e}")))?;
        Ok(Self { cipher })
    }

    /// Seal `plaintext` under `nonce` with optional associated data `aad`.
    ///
    /// Returns ciphertext || 16-byte Poly1305 tag.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|e| VelumTrustError::Encryption(format!("{e}")))
    }

    /// Open a sealed body (ciphertext with appended tag). Fails on any
    /// tag mismatch, which covers tampering with ciphertext, nonce or aad.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|e| VelumTrustError::Decryption(format!("{e}")))
    }
}

/// AES-256-GCM record sealer.
pub struct Aes256GcmSealer {
    cipher: Aes256Gcm,
}

impl Aes256GcmSealer {
    /// Build a sealer from a 32-byte session key.
    pub fn new(key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| VelumTrustError::InvalidKey(format!("aes-gcm init: {e}")))?;
        Ok(Self { cipher })
    }

    /// Seal `plaintext` under `nonce` with optional associated data `aad`.
    ///
    /// Returns ciphertext || 16-byte GCM tag.
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(AesNonce::from_slice(nonce), Payload { msg: plaintext, aad })
            .map_err(|e| VelumTrustError::Encryption(format!("{e}")))
    }

    /// Open a sealed body (ciphertext with appended tag).
    pub fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(AesNonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|e| VelumTrustError::Decryption(format!("{e}")))
    }
}

/// Unified record sealer that dispatches between the two supported suites.
pub enum RecordSealer {
    ChaCha20Poly1305(ChaCha20Sealer),
    Aes256Gcm(Aes256GcmSealer),
}

impl RecordSealer {
    /// Construct from a 32-byte key and the desired cipher suite.
    pub fn new(suite: CipherSuite, key: &[u8; 32]) -> Result<Self> {
        Ok(match suite {
            CipherSuite::ChaCha20Poly1305 => {
                RecordSealer::ChaCha20Poly1305(ChaCha20Sealer::new(key)?)
            }
            CipherSuite::Aes256Gcm => RecordSealer::Aes256Gcm(Aes256GcmSealer::new(key)?),
        })
    }

    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        match self {
            RecordSealer::ChaCha20Poly1305(c) => c.seal(nonce, plaintext, aad),
            RecordSealer::Aes256Gcm(c) => c.seal(nonce, plaintext, aad),
        }
    }

    pub fn open(&self, nonce: &[u8; NONCE_LEN], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        match self {
            RecordSealer::ChaCha20Poly1305(c) => c.open(nonce, sealed, aad),
            RecordSealer::Aes256Gcm(c) => c.open(nonce, sealed, aad),
        }
    }

    /// The suite this sealer was built with.
    pub fn suite(&self) -> CipherSuite {
        match self {
            RecordSealer::ChaCha20Poly1305(_) => CipherSuite::ChaCha20Poly1305,
            RecordSealer::Aes256Gcm(_) => CipherSuite::Aes256Gcm,
        }
    }
}
