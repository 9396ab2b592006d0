//! Request identifiers and the table of requests awaiting a response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use super::errors::McpError;

/// Outcome delivered to a waiting caller.
pub type RequestOutcome = Result<Value, McpError>;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Monotonic request ID counter, owned by one client instance.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicI64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Next identifier, starting at 1.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Pending Table ───────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingState {
    slots: HashMap<i64, oneshot::Sender<RequestOutcome>>,
    /// Set once the transport is gone; new registrations fail with it.
    closed: Option<McpError>,
}

/// Maps outstanding request IDs to their single-use result slot.
///
/// A slot's sender is removed from the map when it is resolved, so each
/// request completes at most once; a duplicate response for the same ID finds
/// nothing and is reported as unmatched.
#[derive(Default)]
pub struct PendingTable {
    state: Mutex<PendingState>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a slot for `id`.
    ///
    /// Fails with the termination error if the transport has already ended,
    /// so a late caller never waits on a slot nobody will resolve.
    pub fn register(&self, id: i64) -> Result<oneshot::Receiver<RequestOutcome>, McpError> {
        let mut state = self.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }

        let (tx, rx) = oneshot::channel();
        let previous = state.slots.insert(id, tx);
        debug_assert!(previous.is_none(), "request id {id} registered twice");
        Ok(rx)
    }

    /// Deliver `outcome` to the caller waiting on `id`.
    ///
    /// Returns `false` when no such request is pending.
    pub fn resolve(&self, id: i64, outcome: RequestOutcome) -> bool {
        let Some(slot) = self.lock().slots.remove(&id) else {
            return false;
        };
        if slot.send(outcome).is_err() {
            // Caller stopped waiting (dropped its future).
            tracing::debug!(id, "response arrived after caller gave up");
        }
        true
    }

    /// Forget `id` without resolving it (deadline passed or send failed).
    pub fn abandon(&self, id: i64) {
        self.lock().slots.remove(&id);
    }

    /// Fail every pending slot with `error` and refuse new registrations.
    ///
    /// Only the first call records its error; returns how many slots failed.
    pub fn fail_all(&self, error: McpError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(error.clone());
            }
            state.slots.drain().collect()
        };

        let count = drained.len();
        for (_, slot) in drained {
            let _ = slot.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
