use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::notify::NotifyError;

struct SlotState<T> {
    pending: bool,
    closed: bool,
    value: Option<T>,
}

/// A pending flag plus the latest value, guarded by one lock and a condvar.
///
/// Publishing sets the flag and replaces the value; taking clears the flag.
/// Values published between two takes coalesce into the most recent one.
/// Waiters are woken after the lock is released.
pub struct PendingSlot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T: Clone> PendingSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: false,
                closed: false,
                value: None,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `value`, marks the slot pending and wakes every waiter.
    pub fn publish(&self, value: T) {
        self.store(value);
        self.notify();
    }

    /// Stores `value` and marks the slot pending without waking anyone.
    ///
    /// Lets a caller that holds its own lock defer [`PendingSlot::notify`]
    /// until that lock is released.
    pub fn store(&self, value: T) {
        let mut state = self.lock();
        state.value = Some(value);
        state.pending = true;
    }

    /// Wakes every waiter.
    pub fn notify(&self) {
        self.ready.notify_all();
    }

    /// Clears the pending flag and returns the latest value, if one is pending.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        if !state.pending {
            return None;
        }
        state.pending = false;
        state.value.clone()
    }

    /// Blocks until a value is pending, the slot is closed, or `timeout` passes.
    ///
    /// Returns `Ok(None)` on timeout.
    ///
    /// # Errors
    ///
    /// [`NotifyError::NoData`] if the slot is closed while waiting.
    pub fn wait_take(&self, timeout: Duration) -> Result<Option<T>, NotifyError> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| !s.pending && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(NotifyError::NoData);
        }
        if !state.pending {
            return Ok(None);
        }
        state.pending = false;
        Ok(state.value.clone())
    }

    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    /// Clears the pending flag and reopens a closed slot.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.pending = false;
        state.closed = false;
    }

    /// Marks the slot closed and releases every blocked waiter.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.pending = false;
        }
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T: Clone> Default for PendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
