//! Multiplexer frame codec.
//!
//! A frame is the unit of transmission between the session and its peer.
//! Binary layout (all fields big-endian):
//!
//! ```text
//! +-----------+-------+---------+--------------+--- variable ---+
//! | stream_id |  seq  | closing | payload_len  |    payload     |
//! |   (4B)    | (4B)  |  (1B)   |    (2B)      |                |
//! +-----------+-------+---------+--------------+----------------+
//! ```
//!
//! `payload_len` is redundant with the outer record length but keeps the
//! parse independent of the carrier framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MuxError, Result};

/// Bytes in the fixed header preceding the payload.
pub const HEADER_LEN: usize = 11;

/// Largest payload a single frame may carry. `Stream::write` chunks its
/// input at this boundary.
pub const MAX_FRAME_PAYLOAD: usize = 16384;

/// Close marker carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ClosingFlag {
    /// Ordinary data frame.
    #[default]
    None = 0,
    /// The sender half-closes: last frame with this stream id in this
    /// direction.
    Stream = 1,
}

impl TryFrom<u8> for ClosingFlag {
    type Error = MuxError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ClosingFlag::None),
            1 => Ok(ClosingFlag::Stream),
            _ => Err(MuxError::MalformedFrame("closing flag out of range")),
        }
    }
}

/// One multiplexer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical stream within the session.
    pub stream_id: u32,
    /// Per-stream send counter, consecutive from 0.
    pub seq: u32,
    pub closing: ClosingFlag,
    pub payload: Bytes,
}

impl Frame {
    /// An ordinary data frame.
    pub fn data(stream_id: u32, seq: u32, payload: Bytes) -> Self {
        Self {
            stream_id,
            seq,
            closing: ClosingFlag::None,
            payload,
        }
    }

    /// The empty half-close frame terminating a send direction.
    pub fn closing(stream_id: u32, seq: u32) -> Self {
        Self {
            stream_id,
            seq,
            closing: ClosingFlag::Stream,
            payload: Bytes::new(),
        }
    }

    /// The total number of bytes this frame occupies when encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        debug_assert!(self.payload.len() <= usize::from(u16::MAX));
        buf.put_u32(self.stream_id);
        buf.put_u32(self.seq);
        buf.put_u8(self.closing as u8);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
    }

    /// Encode this frame into a fresh byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode a frame from the given byte buffer.
    ///
    /// The buffer must hold exactly one frame: a short header or payload
    /// fails, and so do trailing bytes, since the record carrying the
    /// frame declares its exact length.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(MuxError::MalformedFrame("header short"));
        }
        let stream_id = (&data[0..4]).get_u32();
        let seq = (&data[4..8]).get_u32();
        let closing = ClosingFlag::try_from(data[8])?;
        let payload_len = (&data[9..11]).get_u16() as usize;
        let body = &data[HEADER_LEN..];
        if body.len() < payload_len {
            return Err(MuxError::MalformedFrame("payload short of declared length"));
        }
        if body.len() > payload_len {
            return Err(MuxError::MalformedFrame("trailing bytes after payload"));
        }
        Ok(Self {
            stream_id,
            seq,
            closing,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_data_frame() {
        let frame = Frame::data(7, 3, Bytes::from_static(b"payload bytes"));
        let encoded = frame.encode();
        assert_eq!(encoded.len(), frame.encoded_len());
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrip_closing_frame() {
        let frame = Frame::closing(1, 9);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded.closing, ClosingFlag::Stream);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let frame = Frame::data(0x0102_0304, 0x0506_0708, Bytes::from_static(b"ab"));
        let encoded = frame.encode();
        assert_eq!(&encoded[0..4], &[1, 2, 3, 4]);
        assert_eq!(&encoded[4..8], &[5, 6, 7, 8]);
        assert_eq!(encoded[8], 0);
        assert_eq!(&encoded[9..11], &[0, 2]);
        assert_eq!(&encoded[11..], b"ab");
    }

    #[test]
    fn short_header_rejected() {
        assert!(matches!(
            Frame::decode(&[0u8; HEADER_LEN - 1]),
            Err(MuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn short_payload_rejected() {
        let mut encoded = Frame::data(1, 0, Bytes::from_static(b"abcd")).encode().to_vec();
        encoded.truncate(encoded.len() - 1);
        assert!(matches!(
            Frame::decode(&encoded),
            Err(MuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut encoded = Frame::data(1, 0, Bytes::from_static(b"abcd")).encode().to_vec();
        encoded.push(0);
        assert!(matches!(
            Frame::decode(&encoded),
            Err(MuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn undefined_closing_flag_rejected() {
        let mut encoded = Frame::data(1, 0, Bytes::from_static(b"x")).encode().to_vec();
        encoded[8] = 2;
        assert!(matches!(
            Frame::decode(&encoded),
            Err(MuxError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_payload_data_frame_roundtrips() {
        // Producers only emit empty payloads on close, but the codec
        // tolerates a peer's empty data frame.
        let frame = Frame::data(2, 5, Bytes::new());
        assert_eq!(Frame::decode(&frame.encode()).unwrap(), frame);
    }
}
