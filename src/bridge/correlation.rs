//! Pending-wait slot matching inbound responses to the one outstanding read.
//!
//! At most one wait exists at a time. A wait is keyed by command id only;
//! command id 0 means "nothing pending". Delivery goes through a oneshot
//! channel, so a matching response is handed over exactly once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;

/// A response handed to the waiting read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub command_id: u32,
    pub payload: String,
}

/// Why a wait ended without a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// No matching response before the deadline.
    Timeout,
    /// The wait was cancelled, e.g. its connection went away.
    Cancelled,
}

struct Waiter {
    token: u64,
    command_id: u32,
    connection_id: u64,
    tx: oneshot::Sender<Delivery>,
}

/// The single pending-wait slot of a bridge.
#[derive(Default)]
pub struct PendingWait {
    slot: Mutex<Option<Waiter>>,
    next_token: AtomicU64,
}

impl PendingWait {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Waiter>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start waiting for `command_id`, dropping any stale wait.
    ///
    /// The returned handle clears the slot when dropped.
    pub fn register(&self, command_id: u32, connection_id: u64) -> WaitHandle<'_> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        *self.lock() = Some(Waiter {
            token,
            command_id,
            connection_id,
            tx,
        });

        WaitHandle {
            pending: self,
            token,
            rx,
        }
    }

    /// Command id currently awaited, 0 when nothing is pending.
    pub fn waiting_for(&self) -> u32 {
        self.lock().as_ref().map_or(0, |waiter| waiter.command_id)
    }

    /// Hand a response to the waiter if it awaits `command_id`.
    ///
    /// Returns `true` if the response was delivered. A delivered wait is
    /// cleared, so a repeated response for the same id is not delivered twice.
    pub fn deliver(&self, command_id: u32, payload: String) -> bool {
        if command_id == 0 {
            return false;
        }

        let mut slot = self.lock();
        match slot.as_ref() {
            Some(waiter) if waiter.command_id == command_id => {}
            _ => return false,
        }
        let Some(waiter) = slot.take() else {
            return false;
        };
        drop(slot);

        waiter.tx.send(Delivery { command_id, payload }).is_ok()
    }

    /// Cancel the wait if its request went out on `connection_id`.
    pub fn cancel_for_connection(&self, connection_id: u64) -> bool {
        let mut slot = self.lock();
        if slot
            .as_ref()
            .is_some_and(|waiter| waiter.connection_id == connection_id)
        {
            // Dropping the sender wakes the receiver with an error.
            slot.take();
            return true;
        }
        false
    }

    fn clear(&self, token: u64) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|waiter| waiter.token == token) {
            slot.take();
        }
    }
}

/// Receiving end of one registered wait.
pub struct WaitHandle<'a> {
    pending: &'a PendingWait,
    token: u64,
    rx: oneshot::Receiver<Delivery>,
}

impl WaitHandle<'_> {
    /// Wait for the matching response for at most `limit`.
    pub async fn wait(&mut self, limit: Duration) -> Result<Delivery, WaitError> {
        match tokio::time::timeout(limit, &mut self.rx).await {
            Ok(Ok(delivery)) => Ok(delivery),
            Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => Err(WaitError::Timeout),
        }
    }
}

impl Drop for WaitHandle<'_> {
    fn drop(&mut self) {
        self.pending.clear(self.token);
    }
}
