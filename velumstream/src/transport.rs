//! Byte-duplex transports the session adopts.
//!
//! A transport arrives pre-established (TLS handshake already mimicked
//! by the collaborator that dialled it) and split into halves: the
//! session's demux thread owns the reader while all writers go through
//! the switchboard. The shutdown hook unblocks a reader stuck mid-read,
//! which is how `Session::close` reclaims its demux threads.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Unblocks a pending read and fails further writes. Safe to call more
/// than once.
pub type ShutdownFn = Box<dyn Fn() + Send + Sync>;

/// A pre-established bidirectional transport, split for concurrent use.
pub struct Connection {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub shutdown: ShutdownFn,
}

impl Connection {
    /// Adopt a connected TCP stream.
    pub fn tcp(stream: TcpStream) -> io::Result<Self> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            shutdown: Box::new(move || {
                let _ = stream.shutdown(Shutdown::Both);
            }),
        })
    }
}

#[derive(Default)]
struct PipeState {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One direction of an in-memory duplex.
#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl Pipe {
    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.readable.notify_all();
    }
}

/// Reading half of an in-memory pipe. Blocks until bytes arrive or the
/// pipe closes (EOF).
pub struct PipeReader {
    pipe: Arc<Pipe>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.pipe.state.lock();
        while state.buf.is_empty() {
            if state.closed {
                return Ok(0);
            }
            self.pipe.readable.wait(&mut state);
        }
        let n = buf.len().min(state.buf.len());
        for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Writing half of an in-memory pipe. Closing it (or dropping it) gives
/// the reader EOF.
pub struct PipeWriter {
    pipe: Arc<Pipe>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.pipe.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
        }
        state.buf.extend(buf);
        self.pipe.readable.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.pipe.close();
    }
}

/// An in-memory duplex pair, one `Connection` per end.
///
/// Used by the tests in place of a local TCP pair, and usable for
/// loopback plumbing. Buffering is unbounded; session-level back
/// pressure is the valve's job.
pub fn duplex() -> (Connection, Connection) {
    let ab = Arc::new(Pipe::default());
    let ba = Arc::new(Pipe::default());

    let a = Connection {
        reader: Box::new(PipeReader { pipe: ba.clone() }),
        writer: Box::new(PipeWriter { pipe: ab.clone() }),
        shutdown: {
            let (ab, ba) = (ab.clone(), ba.clone());
            Box::new(move || {
                ab.close();
                ba.close();
            })
        },
    };
    let b = Connection {
        reader: Box::new(PipeReader { pipe: ab.clone() }),
        writer: Box::new(PipeWriter { pipe: ba.clone() }),
        shutdown: Box::new(move || {
            ab.close();
            ba.close();
        }),
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::thread;

    use super::*;

    #[test]
    fn duplex_carries_bytes_both_ways() {
        let (mut a, mut b) = duplex();
        a.writer.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        b.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        b.writer.write_all(b"pong").unwrap();
        a.reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn shutdown_unblocks_reader_with_eof() {
        let (a, mut b) = duplex();
        let handle = thread::spawn(move || {
            let mut buf = [0u8; 1];
            b.reader.read(&mut buf)
        });
        (a.shutdown)();
        assert_eq!(handle.join().unwrap().unwrap(), 0);
    }

    #[test]
    fn dropped_writer_gives_eof() {
        let (a, mut b) = duplex();
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn write_after_shutdown_fails() {
        let (mut a, b) = duplex();
        (b.shutdown)();
        assert!(a.writer.write_all(b"x").is_err());
    }
}
