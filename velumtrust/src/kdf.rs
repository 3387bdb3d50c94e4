// HKDF-SHA256 nonce schedule for record sealing.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::aead::NONCE_LEN;
use crate::error::{Result, VelumTrustError};

/// Domain separator for record nonces.
const NONCE_INFO: &[u8] = b"velum record nonce";

/// Derive the AEAD nonce for one record.
///
/// The 12-byte random prefix carried in clear at the front of every record
/// is the HKDF salt; the session key is the input keying material. The
/// derivation is deterministic, so both ends compute the same nonce from
/// the prefix alone and no counter state is shared. A fresh random prefix
/// per record keeps the (key, nonce) pair from ever repeating.
pub fn derive_record_nonce(key: &[u8; 32], prefix: &[u8]) -> Result<[u8; NONCE_LEN]> {
    let hk = Hkdf::<Sha256>::new(Some(prefix), key);
    let mut nonce = [0u8; NONCE_LEN];
    hk.expand(NONCE_INFO, &mut nonce)
        .map_err(|e| VelumTrustError::KeyDerivation(format!("{e}")))?;
    Ok(nonce)
}
