//! Frame/record transform: the obfuscator.
//!
//! An outbound frame becomes a record body of
//! `prefix(12) || sealed frame bytes` where the prefix is fresh random
//! salt and the AEAD nonce is derived from it under the session key
//! (see `velumtrust::kdf`). With the `Plain` method the frame bytes ride
//! in clear after the prefix, keeping the wire layout uniform; it exists
//! for tests and diagnostics only. When built for a TLS outer carrier
//! the 5-byte application-data record header is written up front, so the
//! output can go straight onto the wire.

use rand::RngCore;
use velumtrust::{derive_record_nonce, CipherSuite, RecordSealer, SessionKey, TAG_LEN};

use crate::error::{MuxError, Result};
use crate::frame::{Frame, HEADER_LEN};
use crate::tls;

/// Length of the random salt fronting every record body.
pub const PREFIX_LEN: usize = 12;

/// Cipher selection, with the wire ids the session setup exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObfsMethod {
    /// No encryption, header in clear. Testing and diagnostics only.
    Plain = 0x00,
    AesGcm = 0x01,
    ChaCha20Poly1305 = 0x02,
}

impl ObfsMethod {
    /// Wire id carried in the session setup.
    pub fn wire_id(self) -> u8 {
        self as u8
    }

    /// Resolve from a wire id.
    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(ObfsMethod::Plain),
            0x01 => Some(ObfsMethod::AesGcm),
            0x02 => Some(ObfsMethod::ChaCha20Poly1305),
            _ => None,
        }
    }

    /// Resolve from the user-facing configuration spelling.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "plain" => Some(ObfsMethod::Plain),
            "aes-gcm" => Some(ObfsMethod::AesGcm),
            "chacha20-poly1305" => Some(ObfsMethod::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// Bidirectional frame/record transform, one per session.
///
/// Stateless between calls (the nonce is derived per record), so it may
/// be driven from many threads at once.
pub struct Obfuscator {
    method: ObfsMethod,
    sealer: Option<RecordSealer>,
    key: SessionKey,
    tls_outer: bool,
}

impl Obfuscator {
    /// Build the record transform for a session.
    ///
    /// With `tls_outer` the obfuscated bytes are fronted by a TLS
    /// application-data record header sized to the body, ready for a
    /// Direct-mode transport; without it the raw record body is emitted
    /// and the carrier supplies its own framing.
    pub fn generate(method: ObfsMethod, key: SessionKey, tls_outer: bool) -> Result<Self> {
        let sealer = match method {
            ObfsMethod::Plain => None,
            ObfsMethod::AesGcm => Some(RecordSealer::new(CipherSuite::Aes256Gcm, key.as_bytes())?),
            ObfsMethod::ChaCha20Poly1305 => Some(RecordSealer::new(
                CipherSuite::ChaCha20Poly1305,
                key.as_bytes(),
            )?),
        };
        Ok(Self {
            method,
            sealer,
            key,
            tls_outer,
        })
    }

    pub fn method(&self) -> ObfsMethod {
        self.method
    }

    /// Per-record byte cost on top of the payload.
    pub fn overhead(&self) -> usize {
        let outer = if self.tls_outer { tls::RECORD_HEADER_LEN } else { 0 };
        let tag = if self.sealer.is_some() { TAG_LEN } else { 0 };
        outer + PREFIX_LEN + HEADER_LEN + tag
    }

    /// Obfuscate one frame into `out`, returning the bytes written.
    ///
    /// `out` must hold at least `overhead() + payload len` bytes.
    pub fn obfuscate(&self, frame: &Frame, out: &mut [u8]) -> Result<usize> {
        let need = self.overhead() + frame.payload.len();
        if out.len() < need {
            return Err(MuxError::BufferTooSmall {
                need,
                have: out.len(),
            });
        }

        let mut off = 0;
        if self.tls_outer {
            let body_len = need - tls::RECORD_HEADER_LEN;
            if body_len > usize::from(u16::MAX) {
                return Err(MuxError::MalformedFrame("record too long for outer framing"));
            }
            out[..tls::RECORD_HEADER_LEN].copy_from_slice(&tls::record_header(body_len as u16));
            off = tls::RECORD_HEADER_LEN;
        }

        rand::thread_rng().fill_bytes(&mut out[off..off + PREFIX_LEN]);
        let body = off + PREFIX_LEN;

        let plaintext = frame.encode();
        match &self.sealer {
            None => out[body..need].copy_from_slice(&plaintext),
            Some(sealer) => {
                let prefix: [u8; PREFIX_LEN] = out[off..off + PREFIX_LEN]
                    .try_into()
                    .map_err(|_| MuxError::MalformedFrame("prefix length"))?;
                let nonce = derive_record_nonce(self.key.as_bytes(), &prefix)?;
                let sealed = sealer.seal(&nonce, &plaintext, &[])?;
                out[body..need].copy_from_slice(&sealed);
            }
        }
        Ok(need)
    }

    /// Invert `obfuscate`. The input is the record body with the outer
    /// carrier framing already stripped by `unit_read`.
    pub fn deobfuscate(&self, record: &[u8]) -> Result<Frame> {
        let tag = if self.sealer.is_some() { TAG_LEN } else { 0 };
        let min = PREFIX_LEN + HEADER_LEN + tag;
        if record.len() < min {
            return Err(MuxError::Truncated {
                need: min,
                have: record.len(),
            });
        }

        let (prefix, body) = record.split_at(PREFIX_LEN);
        match &self.sealer {
            None => Frame::decode(body),
            Some(sealer) => {
                let prefix: [u8; PREFIX_LEN] = prefix
                    .try_into()
                    .map_err(|_| MuxError::MalformedFrame("prefix length"))?;
                let nonce = derive_record_nonce(self.key.as_bytes(), &prefix)?;
                let plaintext = sealer
                    .open(&nonce, body, &[])
                    .map_err(|_| MuxError::AuthFailure)?;
                Frame::decode(&plaintext)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn obfuscator(method: ObfsMethod, tls_outer: bool) -> Obfuscator {
        Obfuscator::generate(method, SessionKey::new([0x5Au8; 32]), tls_outer).unwrap()
    }

    #[test]
    fn method_names_match_config_spellings() {
        assert_eq!(ObfsMethod::from_name("plain"), Some(ObfsMethod::Plain));
        assert_eq!(ObfsMethod::from_name("AES-GCM"), Some(ObfsMethod::AesGcm));
        assert_eq!(
            ObfsMethod::from_name("chacha20-poly1305"),
            Some(ObfsMethod::ChaCha20Poly1305)
        );
        assert_eq!(ObfsMethod::from_name("rc4"), None);
    }

    #[test]
    fn wire_ids_roundtrip() {
        for method in [
            ObfsMethod::Plain,
            ObfsMethod::AesGcm,
            ObfsMethod::ChaCha20Poly1305,
        ] {
            assert_eq!(ObfsMethod::from_wire(method.wire_id()), Some(method));
        }
        assert_eq!(ObfsMethod::from_wire(0x7F), None);
    }

    #[test]
    fn obfuscate_reports_short_buffer() {
        let obfs = obfuscator(ObfsMethod::Plain, false);
        let frame = Frame::data(1, 0, Bytes::from_static(b"abc"));
        let mut out = [0u8; 4];
        assert!(matches!(
            obfs.obfuscate(&frame, &mut out),
            Err(MuxError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn tls_outer_writes_record_header() {
        let obfs = obfuscator(ObfsMethod::Plain, true);
        let frame = Frame::data(1, 0, Bytes::from_static(b"abc"));
        let mut out = vec![0u8; obfs.overhead() + 3];
        let n = obfs.obfuscate(&frame, &mut out).unwrap();
        assert_eq!(n, out.len());
        assert_eq!(&out[..3], &[0x17, 0x03, 0x03]);
        let declared = u16::from_be_bytes([out[3], out[4]]) as usize;
        assert_eq!(declared, n - tls::RECORD_HEADER_LEN);
    }

    #[test]
    fn truncated_record_rejected() {
        let obfs = obfuscator(ObfsMethod::AesGcm, false);
        assert!(matches!(
            obfs.deobfuscate(&[0u8; PREFIX_LEN]),
            Err(MuxError::Truncated { .. })
        ));
    }
}
