//! Stream endpoints: the blocking reader/writer halves of one
//! multiplexed byte stream.
//!
//! A stream belongs to exactly one session and holds only a weak
//! back-reference to it. The receive side is fed by the session's demux
//! threads; the send side chunks caller bytes into frames and hands them
//! to the session for sealing and dispatch. Reader and writer may be
//! driven from different threads.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Weak;
use std::time::Duration;

use bytes::{Buf, Bytes};
use parking_lot::{Condvar, Mutex};

use crate::error::{MuxError, Result};
use crate::frame::{ClosingFlag, Frame, MAX_FRAME_PAYLOAD};
use crate::session::SessionInner;

/// Cap on buffered out-of-order frames. A hole this deep means the
/// carrier is broken or hostile, and the session gives up.
pub const MAX_REASSEMBLY_FRAMES: usize = 1024;

struct RecvHalf {
    /// Payloads ready for the reader, in delivery order.
    queue: VecDeque<Bytes>,
    /// Ordered mode: frames parked until their predecessors arrive.
    pending: BTreeMap<u32, (Bytes, ClosingFlag)>,
    /// Ordered mode: next sequence to deliver.
    next_expected_seq: u32,
    /// The peer's closing frame has been delivered.
    remote_closed: bool,
    /// Local close or session close: drain what is buffered, then error.
    broken: bool,
}

struct SendHalf {
    next_seq: u32,
    local_closed: bool,
}

/// One bidirectional stream inside a session.
pub struct Stream {
    id: u32,
    session: Weak<SessionInner>,
    unordered: bool,
    recv: Mutex<RecvHalf>,
    readable: Condvar,
    send: Mutex<SendHalf>,
    read_timeout: Mutex<Option<Duration>>,
}

impl Stream {
    pub(crate) fn new(id: u32, session: Weak<SessionInner>, unordered: bool) -> Self {
        Self {
            id,
            session,
            unordered,
            recv: Mutex::new(RecvHalf {
                queue: VecDeque::new(),
                pending: BTreeMap::new(),
                next_expected_seq: 0,
                remote_closed: false,
                broken: false,
            }),
            readable: Condvar::new(),
            send: Mutex::new(SendHalf {
                next_seq: 0,
                local_closed: false,
            }),
            read_timeout: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Deadline applied to each blocking `read`. `None` blocks without
    /// limit. An expired wait returns `Timeout` and leaves the stream
    /// usable.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        *self.read_timeout.lock() = timeout;
    }

    /// Read buffered bytes, blocking until at least one is available or
    /// the stream breaks.
    ///
    /// An empty `buf` probes liveness: `Ok(0)` on a live stream,
    /// `BrokenStream` on a closed one, without consuming data. Bytes
    /// buffered at close time are still delivered; only a read that
    /// finds the queue empty on a broken or remotely-closed stream
    /// errors.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut recv = self.recv.lock();
        if buf.is_empty() {
            return if recv.broken {
                Err(MuxError::BrokenStream)
            } else {
                Ok(0)
            };
        }
        loop {
            if !recv.queue.is_empty() {
                let n = Self::drain_into(&mut recv, buf);
                drop(recv);
                if let Some(session) = self.session.upgrade() {
                    session.valve_sub(n);
                }
                return Ok(n);
            }
            if recv.broken || recv.remote_closed {
                return Err(MuxError::BrokenStream);
            }
            let timeout = *self.read_timeout.lock();
            match timeout {
                Some(deadline) => {
                    let timed_out = self.readable.wait_for(&mut recv, deadline).timed_out();
                    if timed_out && recv.queue.is_empty() && !recv.broken && !recv.remote_closed {
                        return Err(MuxError::Timeout);
                    }
                }
                None => self.readable.wait(&mut recv),
            }
        }
    }

    fn drain_into(recv: &mut RecvHalf, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            let Some(mut chunk) = recv.queue.pop_front() else {
                break;
            };
            let take = chunk.len().min(buf.len() - n);
            buf[n..n + take].copy_from_slice(&chunk[..take]);
            n += take;
            if take < chunk.len() {
                chunk.advance(take);
                recv.queue.push_front(chunk);
            }
        }
        n
    }

    /// Write all of `buf`, chunked into frames of at most
    /// `MAX_FRAME_PAYLOAD` bytes.
    ///
    /// Framing is atomic per call: two writers on the same stream
    /// interleave at frame granularity, never inside a frame.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let session = self.session.upgrade().ok_or(MuxError::BrokenStream)?;
        let mut send = self.send.lock();
        if send.local_closed || session.is_closed() {
            return Err(MuxError::BrokenStream);
        }
        for chunk in buf.chunks(MAX_FRAME_PAYLOAD) {
            let frame = Frame::data(self.id, send.next_seq, Bytes::copy_from_slice(chunk));
            send.next_seq = send.next_seq.wrapping_add(1);
            session.send_frame(&frame)?;
        }
        Ok(buf.len())
    }

    /// Half-close the send side: emits the closing frame, retires the
    /// id in the session and cancels any blocked read. Buffered receive
    /// bytes stay readable. Idempotent.
    pub fn close(&self) -> Result<()> {
        let seq = {
            let mut send = self.send.lock();
            if send.local_closed {
                return Ok(());
            }
            send.local_closed = true;
            let seq = send.next_seq;
            send.next_seq = send.next_seq.wrapping_add(1);
            seq
        };

        if let Some(session) = self.session.upgrade() {
            // The closing frame is a courtesy; a dead transport or closed
            // session must not fail the close itself.
            if let Err(e) = session.send_frame(&Frame::closing(self.id, seq)) {
                tracing::debug!(stream = self.id, error = %e, "closing frame not sent");
            }
            session.retire_stream(self.id);
        }
        self.mark_broken();
        Ok(())
    }

    /// Stop future waits: drain-then-error semantics from here on.
    /// Called on local close and on session close.
    pub(crate) fn mark_broken(&self) {
        let mut recv = self.recv.lock();
        recv.broken = true;
        self.readable.notify_all();
    }

    /// Feed one inbound frame. Returns the payload bytes newly queued
    /// for the reader (for valve accounting).
    pub(crate) fn dispatch(&self, frame: Frame) -> Result<usize> {
        let mut recv = self.recv.lock();
        if recv.broken {
            // Late frame for a locally closed stream.
            tracing::trace!(stream = self.id, seq = frame.seq, "frame after close dropped");
            return Ok(0);
        }

        let mut queued = 0;
        if self.unordered {
            if !frame.payload.is_empty() {
                queued += frame.payload.len();
                recv.queue.push_back(frame.payload);
            }
            if frame.closing == ClosingFlag::Stream {
                recv.remote_closed = true;
            }
        } else {
            match frame.seq.cmp(&recv.next_expected_seq) {
                CmpOrdering::Less => {
                    tracing::trace!(stream = self.id, seq = frame.seq, "duplicate frame dropped");
                }
                CmpOrdering::Equal => {
                    queued += Self::deliver(&mut recv, frame.payload, frame.closing);
                    loop {
                        let next = recv.next_expected_seq;
                        let Some((payload, closing)) = recv.pending.remove(&next) else {
                            break;
                        };
                        queued += Self::deliver(&mut recv, payload, closing);
                    }
                }
                CmpOrdering::Greater => {
                    if recv.pending.len() >= MAX_REASSEMBLY_FRAMES {
                        return Err(MuxError::ReassemblyOverflow(self.id));
                    }
                    recv.pending
                        .entry(frame.seq)
                        .or_insert((frame.payload, frame.closing));
                }
            }
        }

        if queued > 0 || recv.remote_closed {
            self.readable.notify_all();
        }
        Ok(queued)
    }

    fn deliver(recv: &mut RecvHalf, payload: Bytes, closing: ClosingFlag) -> usize {
        recv.next_expected_seq = recv.next_expected_seq.wrapping_add(1);
        let n = payload.len();
        if n > 0 {
            recv.queue.push_back(payload);
        }
        if closing == ClosingFlag::Stream {
            recv.remote_closed = true;
        }
        n
    }
}

// io adapters for embedding a stream in standard copy loops. A clean
// remote close surfaces as EOF rather than an error.
impl io::Read for &Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match Stream::read(self, buf) {
            Ok(n) => Ok(n),
            Err(MuxError::BrokenStream) => Ok(0),
            Err(MuxError::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, MuxError::Timeout)),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}

impl io::Write for &Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf).map_err(|e| match e {
            MuxError::BrokenStream => io::Error::new(io::ErrorKind::BrokenPipe, MuxError::BrokenStream),
            other => io::Error::other(other),
        })
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan_stream(unordered: bool) -> Stream {
        // A stream with no live session: dispatch and read work, write
        // fails. Enough for receive-path unit tests.
        Stream::new(1, Weak::new(), unordered)
    }

    fn data(seq: u32, payload: &'static [u8]) -> Frame {
        Frame::data(1, seq, Bytes::from_static(payload))
    }

    #[test]
    fn ordered_in_order_delivery() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"ab")).unwrap();
        stream.dispatch(data(1, b"cd")).unwrap();

        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
    }

    #[test]
    fn ordered_reassembles_out_of_order() {
        let stream = orphan_stream(false);
        assert_eq!(stream.dispatch(data(2, b"c")).unwrap(), 0);
        assert_eq!(stream.dispatch(data(0, b"a")).unwrap(), 1);
        assert_eq!(stream.dispatch(data(1, b"b")).unwrap(), 2);

        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn ordered_drops_duplicates() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"a")).unwrap();
        assert_eq!(stream.dispatch(data(0, b"a")).unwrap(), 0);

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 1);
    }

    #[test]
    fn unordered_delivers_in_arrival_order() {
        let stream = orphan_stream(true);
        for (seq, payload) in [(5u32, b"a"), (2, b"b"), (9, b"c"), (0, b"d")] {
            stream.dispatch(data(seq, payload)).unwrap();
        }

        let mut buf = [0u8; 8];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcd");
    }

    #[test]
    fn reassembly_cap_reports_overflow() {
        let stream = orphan_stream(false);
        // Fill the out-of-order buffer; seq 0 never arrives.
        for seq in 1..=(MAX_REASSEMBLY_FRAMES as u32) {
            stream.dispatch(data(seq, b"x")).unwrap();
        }
        assert!(matches!(
            stream.dispatch(data(MAX_REASSEMBLY_FRAMES as u32 + 1, b"x")),
            Err(MuxError::ReassemblyOverflow(1))
        ));
    }

    #[test]
    fn closing_frame_breaks_after_drain() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"tail")).unwrap();
        stream
            .dispatch(Frame::closing(1, 1))
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert!(matches!(
            stream.read(&mut buf),
            Err(MuxError::BrokenStream)
        ));
    }

    #[test]
    fn empty_buf_probes_liveness() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"x")).unwrap();
        assert_eq!(stream.read(&mut []).unwrap(), 0);
        stream.mark_broken();
        // Broken probe errors even with bytes still buffered.
        assert!(matches!(stream.read(&mut []), Err(MuxError::BrokenStream)));
    }

    #[test]
    fn broken_stream_drains_before_erroring() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"buffered")).unwrap();
        stream.mark_broken();

        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"buffered");
        assert!(matches!(
            stream.read(&mut buf),
            Err(MuxError::BrokenStream)
        ));
    }

    #[test]
    fn read_timeout_leaves_stream_usable() {
        let stream = orphan_stream(false);
        stream.set_read_timeout(Some(Duration::from_millis(10)));
        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf), Err(MuxError::Timeout)));

        stream.dispatch(data(0, b"ok")).unwrap();
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
    }

    #[test]
    fn partial_chunk_is_kept_for_next_read() {
        let stream = orphan_stream(false);
        stream.dispatch(data(0, b"abcdef")).unwrap();

        let mut small = [0u8; 4];
        assert_eq!(stream.read(&mut small).unwrap(), 4);
        assert_eq!(&small, b"abcd");
        let n = stream.read(&mut small).unwrap();
        assert_eq!(&small[..n], b"ef");
    }
}
