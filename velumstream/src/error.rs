use thiserror::Error;

/// All errors produced by the VelumStream multiplexer.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("session is closed")]
    SessionClosed,

    #[error("broken stream")]
    BrokenStream,

    #[error("read deadline exceeded")]
    Timeout,

    #[error("no usable transport in the switchboard")]
    NoTransport,

    #[error("all transports lost")]
    AllTransportsLost,

    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    #[error("record failed authentication")]
    AuthFailure,

    #[error("record truncated: need at least {need} bytes, got {have}")]
    Truncated { need: usize, have: usize },

    #[error("reassembly buffer overflow on stream {0}")]
    ReassemblyOverflow(u32),

    #[error("obfuscation buffer too small: need {need}, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] velumtrust::VelumTrustError),
}

impl MuxError {
    /// Whether this error tears down the whole session when it surfaces
    /// on the inbound path. A record that fails authentication or parsing
    /// is treated as tampering with the carrier, not as a per-stream
    /// fault.
    pub fn is_session_terminal(&self) -> bool {
        matches!(
            self,
            MuxError::AuthFailure
                | MuxError::MalformedFrame(_)
                | MuxError::Truncated { .. }
                | MuxError::ReassemblyOverflow(_)
                | MuxError::AllTransportsLost
        )
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;
