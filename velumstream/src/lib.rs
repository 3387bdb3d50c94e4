//! VelumStream -- the multiplexer core of the Velum tunnel.
//!
//! A session owns a pool of byte transports whose wire image is ordinary
//! TLS application data. Application streams are chunked into frames,
//! sealed into records by the obfuscator and spread across the pool;
//! inbound records are unsealed, reassembled per stream and delivered
//! through blocking reader/writer endpoints:
//!
//! - [`frame`]: the multiplexer's wire unit
//! - [`obfs`]: frame/record transform (AEAD or plain)
//! - `switchboard` (internal): outbound transport pool
//! - [`stream`]: per-stream endpoints with ordered or arrival-order
//!   delivery
//! - [`session`]: stream lifecycle, inbound demultiplex, close cascade
//!
//! Transport establishment (handshake mimicry, dialling) happens outside
//! this crate; sessions adopt pre-established [`transport::Connection`]s.

pub mod error;
pub mod frame;
pub mod obfs;
pub mod session;
pub mod stream;
mod switchboard;
pub mod tls;
pub mod transport;
pub mod valve;

pub use error::{MuxError, Result};
pub use frame::{ClosingFlag, Frame, HEADER_LEN, MAX_FRAME_PAYLOAD};
pub use obfs::{ObfsMethod, Obfuscator, PREFIX_LEN};
pub use session::{CloseReason, Session, SessionConfig, UnitRead};
pub use stream::{Stream, MAX_REASSEMBLY_FRAMES};
pub use transport::Connection;
pub use valve::ValveConfig;
