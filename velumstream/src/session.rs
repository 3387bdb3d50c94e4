//! Session lifecycle: stream table, inbound demultiplex, close cascade.
//!
//! A session owns the obfuscator and the switchboard. Streams are
//! created locally with `open_stream` or materialise when a frame
//! arrives for an id the session has never seen; there is no OPEN frame,
//! the first frame for a new id is the open. `accept` hands those
//! implicitly created streams to the caller.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::{MuxError, Result};
use crate::frame::Frame;
use crate::obfs::Obfuscator;
use crate::stream::Stream;
use crate::switchboard::{Switchboard, Trunk};
use crate::transport::Connection;
use crate::valve::{Valve, ValveConfig};

/// Capability that reads exactly one record body off a transport with
/// the outer carrier framing stripped. Injected so the same session
/// drives TLS-record and other carrier framings; see
/// `tls::unit_read_tls` for the Direct-mode implementation.
pub type UnitRead = Arc<dyn Fn(&mut (dyn Read + Send)) -> io::Result<Vec<u8>> + Send + Sync>;

/// Why a session reached the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Local `close()` call.
    Requested,
    /// The last transport failed on the inbound side.
    AllTransportsLost,
    /// A record failed authentication or parsing: the carrier is
    /// tampered with or desynchronised.
    Tampered,
    /// An ordered stream overran its reassembly cap.
    ReassemblyOverflow,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("requested"),
            CloseReason::AllTransportsLost => f.write_str("all transports lost"),
            CloseReason::Tampered => f.write_str("record tampered"),
            CloseReason::ReassemblyOverflow => f.write_str("reassembly overflow"),
        }
    }
}

/// Everything a session needs at construction. Transports are adopted
/// afterwards with `add_connection`.
pub struct SessionConfig {
    pub obfuscator: Obfuscator,
    /// Skip reassembly and deliver payloads in arrival order, for
    /// carriers that already guarantee nothing.
    pub unordered: bool,
    pub unit_read: UnitRead,
    /// Inbound back-pressure marks; `None` reads without limit.
    pub valve: Option<ValveConfig>,
}

/// Handle to one multiplexed session. Cheap to clone; all clones drive
/// the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    session_id: u32,
    obfuscator: Obfuscator,
    unordered: bool,
    unit_read: UnitRead,
    valve: Option<Valve>,
    switchboard: Switchboard,
    /// Stream table. `None` tombstones a closed id so a late frame for
    /// it is dropped silently instead of reopening the stream.
    streams: RwLock<HashMap<u32, Option<Arc<Stream>>>>,
    /// Locally initiated ids: odd, stride 2.
    next_stream_id: AtomicU32,
    accept_queue: Mutex<VecDeque<Arc<Stream>>>,
    accept_cond: Condvar,
    closed: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Session {
    pub fn new(session_id: u32, config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session_id,
                obfuscator: config.obfuscator,
                unordered: config.unordered,
                unit_read: config.unit_read,
                valve: config.valve.map(Valve::new),
                switchboard: Switchboard::new(),
                streams: RwLock::new(HashMap::new()),
                next_stream_id: AtomicU32::new(1),
                accept_queue: Mutex::new(VecDeque::new()),
                accept_cond: Condvar::new(),
                closed: AtomicBool::new(false),
                close_reason: Mutex::new(None),
            }),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.inner.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Terminal reason, once closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.close_reason.lock()
    }

    /// Adopt a transport: pool its write half and spawn the demux
    /// thread that owns its read half.
    pub fn add_connection(&self, conn: Connection) -> Result<()> {
        if self.inner.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let Connection {
            reader,
            writer,
            shutdown,
        } = conn;
        let trunk = self.inner.switchboard.adopt(writer, shutdown);
        let inner = self.inner.clone();
        // Detached on purpose: the thread exits when the transport dies
        // or the session closes.
        let _ = thread::Builder::new()
            .name(format!("velum-demux-{}-{}", inner.session_id, trunk.id))
            .spawn(move || demux_loop(&inner, &trunk, reader))?;
        Ok(())
    }

    /// Open a locally initiated stream.
    pub fn open_stream(&self) -> Result<Arc<Stream>> {
        if self.inner.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let id = self.inner.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let stream = Arc::new(Stream::new(
            id,
            Arc::downgrade(&self.inner),
            self.inner.unordered,
        ));
        self.inner.streams.write().insert(id, Some(stream.clone()));
        tracing::debug!(session = self.inner.session_id, stream = id, "stream opened");
        Ok(stream)
    }

    /// Block until the peer opens a stream, and return it. Streams
    /// already induced before a close are still handed out; afterwards
    /// this returns `SessionClosed`.
    pub fn accept(&self) -> Result<Arc<Stream>> {
        let mut queue = self.inner.accept_queue.lock();
        loop {
            if let Some(stream) = queue.pop_front() {
                return Ok(stream);
            }
            if self.inner.is_closed() {
                return Err(MuxError::SessionClosed);
            }
            self.inner.accept_cond.wait(&mut queue);
        }
    }

    /// Obfuscate one frame into `out`. Thin adapter over the session's
    /// obfuscator, used by streams and by tests injecting records.
    pub fn obfs(&self, frame: &Frame, out: &mut [u8]) -> Result<usize> {
        self.inner.obfuscator.obfuscate(frame, out)
    }

    /// Inverse adapter.
    pub fn deobfs(&self, record: &[u8]) -> Result<Frame> {
        self.inner.obfuscator.deobfuscate(record)
    }

    /// Per-record overhead of this session's obfuscator, for sizing
    /// `obfs` buffers.
    pub fn obfs_overhead(&self) -> usize {
        self.inner.obfuscator.overhead()
    }

    /// Close the session: break every stream (their buffered bytes stay
    /// readable), wake every blocked `accept` and `read`, and shut the
    /// transports down. Idempotent.
    pub fn close(&self) {
        self.inner.close_with(CloseReason::Requested);
    }
}

impl SessionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn valve_sub(&self, n: usize) {
        if let Some(valve) = &self.valve {
            valve.sub(n);
        }
    }

    /// Seal one frame and put the record onto a transport.
    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<()> {
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let mut buf = vec![0u8; self.obfuscator.overhead() + frame.payload.len()];
        let n = self.obfuscator.obfuscate(frame, &mut buf)?;
        self.switchboard.send(&buf[..n])
    }

    /// Tombstone a locally closed stream id: late frames for it are
    /// dropped instead of reopening it.
    pub(crate) fn retire_stream(&self, id: u32) {
        if let Some(slot) = self.streams.write().get_mut(&id) {
            *slot = None;
        }
    }

    /// Deobfuscate and dispatch one inbound record.
    fn on_record(self: &Arc<Self>, record: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        let frame = self.obfuscator.deobfuscate(record)?;
        self.dispatch(frame)
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) -> Result<()> {
        let id = frame.stream_id;
        let existing = self.streams.read().get(&id).cloned();
        let (stream, induced) = match existing {
            Some(Some(stream)) => (stream, false),
            Some(None) => {
                tracing::trace!(stream = id, "frame for retired stream dropped");
                return Ok(());
            }
            None => match self.streams.write().entry(id) {
                // A frame raced us past the read lock.
                Entry::Occupied(entry) => match entry.get() {
                    Some(stream) => (stream.clone(), false),
                    None => return Ok(()),
                },
                Entry::Vacant(entry) => {
                    // Re-check under the write lock: a close that set the
                    // flag before this point will iterate the table only
                    // after the lock is released, so either the frame is
                    // dropped here or the new stream gets marked broken.
                    if self.is_closed() {
                        return Err(MuxError::SessionClosed);
                    }
                    let stream = Arc::new(Stream::new(id, Arc::downgrade(self), self.unordered));
                    entry.insert(Some(stream.clone()));
                    tracing::debug!(
                        session = self.session_id,
                        stream = id,
                        "stream induced by first frame"
                    );
                    (stream, true)
                }
            },
        };

        let queued = stream.dispatch(frame)?;
        if queued > 0 {
            if let Some(valve) = &self.valve {
                valve.add(queued);
            }
        }
        // Hand the stream to `accept` only after its inducing frame is
        // visible, so an accept-then-read never misses the first payload.
        if induced {
            let mut queue = self.accept_queue.lock();
            queue.push_back(stream);
            self.accept_cond.notify_one();
        }
        Ok(())
    }

    pub(crate) fn close_with(self: &Arc<Self>, reason: CloseReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.close_reason.lock() = Some(reason);
        tracing::info!(session = self.session_id, %reason, "session closed");

        // Break every stream; their queues drain before erroring.
        {
            let streams = self.streams.read();
            for stream in streams.values().flatten() {
                stream.mark_broken();
            }
        }
        // Wake acceptors. Taking the lock orders the wakeup against a
        // waiter that checked the closed flag just before sleeping.
        {
            let _queue = self.accept_queue.lock();
            self.accept_cond.notify_all();
        }
        // Let gated demux threads through, then fail their reads.
        if let Some(valve) = &self.valve {
            valve.release();
        }
        self.switchboard.shut_all();
    }
}

/// Inbound loop, one thread per adopted transport: read one record,
/// unseal, dispatch. Never surfaces errors to callers; failures turn
/// into session state and blocked readers wake with `BrokenStream`.
fn demux_loop(inner: &Arc<SessionInner>, trunk: &Arc<Trunk>, mut reader: Box<dyn Read + Send>) {
    loop {
        if inner.is_closed() {
            break;
        }
        if let Some(valve) = &inner.valve {
            valve.wait_ready();
        }
        let record = match (inner.unit_read)(&mut *reader) {
            Ok(record) => record,
            Err(e) => {
                if !inner.is_closed() {
                    tracing::debug!(trunk = trunk.id, error = %e, "transport read failed");
                    let remaining = inner.switchboard.discard(trunk.id);
                    trunk.shut();
                    if remaining == 0 {
                        inner.close_with(CloseReason::AllTransportsLost);
                    }
                }
                break;
            }
        };
        if let Err(e) = inner.on_record(&record) {
            if e.is_session_terminal() {
                tracing::warn!(session = inner.session_id, error = %e, "closing session");
                let reason = match e {
                    MuxError::ReassemblyOverflow(_) => CloseReason::ReassemblyOverflow,
                    _ => CloseReason::Tampered,
                };
                inner.close_with(reason);
            }
            break;
        }
    }
}
