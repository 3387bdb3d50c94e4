//! Transport pool and outbound record dispatch.
//!
//! The switchboard owns the write halves of every adopted transport and
//! spreads outbound records across them round-robin. Each trunk carries
//! a write-serialising lock so a record lands on the wire whole; a trunk
//! whose write fails is discarded and the record moves to the next one.
//! The read halves live with the session's demux threads, which call
//! back into `discard` when a transport dies under them.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{MuxError, Result};
use crate::transport::ShutdownFn;

/// One pooled transport: write half plus the shutdown hook shared with
/// its demux thread.
pub(crate) struct Trunk {
    pub(crate) id: u64,
    writer: Mutex<Box<dyn Write + Send>>,
    shutdown: ShutdownFn,
}

impl Trunk {
    fn write_record(&self, record: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        writer.write_all(record)?;
        writer.flush()
    }

    pub(crate) fn shut(&self) {
        (self.shutdown)();
    }
}

pub(crate) struct Switchboard {
    trunks: RwLock<Vec<Arc<Trunk>>>,
    next_id: AtomicU64,
    rr: AtomicUsize,
}

impl Switchboard {
    pub(crate) fn new() -> Self {
        Self {
            trunks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            rr: AtomicUsize::new(0),
        }
    }

    /// Pool a transport's write half; the caller keeps the read half.
    pub(crate) fn adopt(&self, writer: Box<dyn Write + Send>, shutdown: ShutdownFn) -> Arc<Trunk> {
        let trunk = Arc::new(Trunk {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            writer: Mutex::new(writer),
            shutdown,
        });
        self.trunks.write().push(trunk.clone());
        trunk
    }

    /// Put one full record onto some healthy transport.
    ///
    /// Round-robin across the pool; a trunk that errors is dropped and
    /// the record is retried on the next, so the record either lands on
    /// exactly one transport in full or the pool runs dry.
    pub(crate) fn send(&self, record: &[u8]) -> Result<()> {
        loop {
            let trunk = {
                let trunks = self.trunks.read();
                if trunks.is_empty() {
                    return Err(MuxError::NoTransport);
                }
                let i = self.rr.fetch_add(1, Ordering::Relaxed) % trunks.len();
                trunks[i].clone()
            };
            match trunk.write_record(record) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(trunk = trunk.id, error = %e, "dropping transport after write error");
                    self.discard(trunk.id);
                    trunk.shut();
                }
            }
        }
    }

    /// Drop a transport from the pool; returns how many remain.
    pub(crate) fn discard(&self, id: u64) -> usize {
        let mut trunks = self.trunks.write();
        trunks.retain(|t| t.id != id);
        trunks.len()
    }

    /// Shut every transport down and empty the pool (session close).
    /// Transport errors are ignored.
    pub(crate) fn shut_all(&self) {
        let trunks = std::mem::take(&mut *self.trunks.write());
        for trunk in &trunks {
            trunk.shut();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.trunks.read().len()
    }
}
