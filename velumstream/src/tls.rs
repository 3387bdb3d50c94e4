//! Outer TLS record framing for Direct-mode transports.
//!
//! The carrier presents records as TLS 1.2 application data:
//! `0x17 0x03 0x03 len(2)` followed by `len` body bytes. Only the
//! application-data content type is handled here; handshake mimicry is
//! the business of the collaborator that established the transport.

use std::io::{self, Read};

use crate::session::UnitRead;

/// Bytes in the outer record header.
pub const RECORD_HEADER_LEN: usize = 5;

/// TLS content type for application data.
const APPLICATION_DATA: u8 = 0x17;

/// Legacy record version pinned by TLS 1.2 and 1.3 alike.
const RECORD_VERSION: [u8; 2] = [0x03, 0x03];

/// Compose the 5-byte header fronting a record body of `len` bytes.
pub fn record_header(len: u16) -> [u8; RECORD_HEADER_LEN] {
    let l = len.to_be_bytes();
    [APPLICATION_DATA, RECORD_VERSION[0], RECORD_VERSION[1], l[0], l[1]]
}

/// Read exactly one application-data record off `reader`, returning its
/// body with the header stripped.
pub fn read_record<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    reader.read_exact(&mut header)?;
    if header[0] != APPLICATION_DATA || header[1..3] != RECORD_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a TLS application-data record",
        ));
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(body)
}

/// The `UnitRead` capability for TLS-framed transports.
pub fn unit_read_tls() -> UnitRead {
    std::sync::Arc::new(|reader: &mut (dyn Read + Send)| read_record(reader))
}
