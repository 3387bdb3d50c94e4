// VelumTrust error types

use thiserror::Error;

/// Top-level error type for the VelumTrust crate.
#[derive(Debug, Error)]
pub enum VelumTrustError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD seal failed: {0}")]
    Encryption(String),

    #[error("AEAD open failed: {0}")]
    Decryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, VelumTrustError>;
