//! Session-wide inbound back-pressure.
//!
//! One valve is shared by every stream of a session. Demux threads gate
//! on it before pulling the next record; readers drain it as they
//! consume. This couples the inbound rate to the slowest consumer
//! without per-stream windows.

use parking_lot::{Condvar, Mutex};

/// Water marks in buffered bytes. Demux threads stop pulling at
/// `high_water` and resume once drain drops the level below `low_water`.
#[derive(Debug, Clone, Copy)]
pub struct ValveConfig {
    pub high_water: usize,
    pub low_water: usize,
}

struct Level {
    queued: usize,
    /// Set at session close; every gated thread is let through for good.
    released: bool,
}

/// Shared token accounting for one session's readable queues.
pub(crate) struct Valve {
    config: ValveConfig,
    level: Mutex<Level>,
    below: Condvar,
}

impl Valve {
    pub(crate) fn new(config: ValveConfig) -> Self {
        Self {
            config,
            level: Mutex::new(Level {
                queued: 0,
                released: false,
            }),
            below: Condvar::new(),
        }
    }

    /// Account `n` freshly queued bytes.
    pub(crate) fn add(&self, n: usize) {
        self.level.lock().queued += n;
    }

    /// Account `n` bytes drained by a reader; wakes gated demux threads
    /// once the level falls below the low water mark.
    pub(crate) fn sub(&self, n: usize) {
        let mut level = self.level.lock();
        level.queued = level.queued.saturating_sub(n);
        if level.queued < self.config.low_water {
            self.below.notify_all();
        }
    }

    /// Gate a demux thread while the level sits at or above the high
    /// water mark.
    pub(crate) fn wait_ready(&self) {
        let mut level = self.level.lock();
        while !level.released && level.queued >= self.config.high_water {
            self.below.wait(&mut level);
        }
    }

    /// Let every gated thread through permanently (session close).
    pub(crate) fn release(&self) {
        let mut level = self.level.lock();
        level.released = true;
        self.below.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.level.lock().queued
    }
}
