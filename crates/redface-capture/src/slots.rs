//! Ownership ledger for driver buffer slots.
//!
//! A published [`Frame`](crate::Frame) holds a [`SlotLease`]. Releasing the
//! lease pushes its index onto a return queue; only the capture loop talks to
//! the driver, and it re-queues returned slots before each wait.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

#[derive(Debug)]
pub struct SlotArena {
    returns_tx: Sender<usize>,
    returns_rx: Receiver<usize>,
    outstanding: Arc<AtomicUsize>,
}

impl SlotArena {
    pub fn new() -> Self {
        let (returns_tx, returns_rx) = unbounded();
        Self {
            returns_tx,
            returns_rx,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hand `slot` to a consumer.
    pub fn lease(&self, slot: usize) -> SlotLease {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        SlotLease {
            slot,
            returns: self.returns_tx.clone(),
            outstanding: Arc::clone(&self.outstanding),
        }
    }

    /// Slots released since the last call, in release order.
    pub fn drain_returned(&self) -> impl Iterator<Item = usize> + '_ {
        self.returns_rx.try_iter()
    }

    /// Leases that have not been released yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl Default for SlotArena {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of one driver slot. Returned exactly once: on [`release`] or on drop.
///
/// [`release`]: SlotLease::release
#[derive(Debug)]
pub struct SlotLease {
    slot: usize,
    returns: Sender<usize>,
    outstanding: Arc<AtomicUsize>,
}

impl SlotLease {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn release(self) {
        // Drop does the work.
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        // The loop may already be gone; the driver pool went with it.
        let _ = self.returns.send(self.slot);
    }
}
