//! Single-assignment result cell shared between an operation and its awaiters.
//!
//! A [`Deferred`] starts `Pending` and transitions exactly once to `Resolved`
//! or `Rejected`. Any number of tasks may [`wait`](Deferred::wait) on it;
//! every one observes the same outcome.

use std::sync::Arc;

use bl_core::{Error, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Observable state of a [`Deferred`].
#[derive(Debug, Clone)]
pub enum DeferredState<T> {
    Pending,
    Resolved(T),
    Rejected(Error),
}

struct Inner<T> {
    state: Mutex<DeferredState<T>>,
    notify: Notify,
}

/// Cloneable handle to a single-assignment result.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone> Deferred<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(DeferredState::Pending),
                notify: Notify::new(),
            }),
        }
    }

    /// Settle with a value. Returns `false` (and changes nothing) if the cell
    /// was already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(DeferredState::Resolved(value))
    }

    /// Settle with an error. Returns `false` (and changes nothing) if the
    /// cell was already settled.
    pub fn reject(&self, error: Error) -> bool {
        self.settle(DeferredState::Rejected(error))
    }

    fn settle(&self, next: DeferredState<T>) -> bool {
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, DeferredState::Pending) {
                return false;
            }
            *state = next;
        }
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.inner.state.lock(), DeferredState::Pending)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> DeferredState<T> {
        self.inner.state.lock().clone()
    }

    /// Wait until the cell is settled and return its outcome.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a settle in between is not missed.
            notified.as_mut().enable();

            let snapshot = self.state();
            match snapshot {
                DeferredState::Resolved(value) => return Ok(value),
                DeferredState::Rejected(err) => return Err(err),
                DeferredState::Pending => {}
            }

            notified.await;
        }
    }
}

impl<T: Clone> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match *self.inner.state.lock() {
            DeferredState::Pending => "pending",
            DeferredState::Resolved(_) => "resolved",
            DeferredState::Rejected(_) => "rejected",
        };
        f.debug_tuple("Deferred").field(&label).finish()
    }
}
