//! Stop token for cooperative job stops.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A token that asks a running job to stop.
///
/// Steps poll the token at chunk boundaries only, so a stop never interrupts
/// an open transaction. Stopping is idempotent; the first reason is kept.
#[derive(Debug, Default)]
pub struct StopToken {
    stop_requested: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl StopToken {
    /// Creates a new token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop with a reason.
    pub fn request_stop(&self, reason: impl Into<String>) {
        let mut slot = self.reason.write();
        if self
            .stop_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *slot = Some(reason.into());
        }
    }

    /// Returns whether a stop has been requested.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Returns the stop reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}
