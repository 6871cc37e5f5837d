//! Tolerance for errors expected to clear up on their own.
//!
//! A nonce ahead of the ledger, a full mempool or validation lagging behind
//! the ledger all resolve themselves given time. Each class gets a window,
//! starting at its first occurrence since the last successful tick, during
//! which it is logged as a warning and retried quickly. Past the window it
//! is treated like any other failure.

use arbiter_staker::{EphemeralClass, StakerError};
use std::time::Duration;
use tokio::time::Instant;

/// Tracks one ephemeral error class.
#[derive(Debug, Clone)]
pub struct EphemeralErrorHandler {
    class: EphemeralClass,
    window: Duration,
    first_seen: Option<Instant>,
}

impl EphemeralErrorHandler {
    pub fn new(class: EphemeralClass, window: Duration) -> Self {
        Self {
            class,
            window,
            first_seen: None,
        }
    }

    pub fn class(&self) -> EphemeralClass {
        self.class
    }

    /// Whether `err` belongs to this class and is still within its window.
    ///
    /// The first matching error starts the window.
    pub fn tolerates(&mut self, err: &StakerError, now: Instant) -> bool {
        if err.ephemeral_class() != Some(self.class) {
            return false;
        }
        let first_seen = *self.first_seen.get_or_insert(now);
        now.duration_since(first_seen) <= self.window
    }

    pub fn reset(&mut self) {
        self.first_seen = None;
    }
}

/// One handler per ephemeral class.
#[derive(Debug, Clone)]
pub struct EphemeralHandlers {
    handlers: Vec<EphemeralErrorHandler>,
}

impl EphemeralHandlers {
    pub fn new(window: Duration) -> Self {
        Self {
            handlers: EphemeralClass::ALL
                .iter()
                .map(|class| EphemeralErrorHandler::new(*class, window))
                .collect(),
        }
    }

    /// The class of `err` if some handler tolerates it.
    pub fn tolerates(&mut self, err: &StakerError, now: Instant) -> Option<EphemeralClass> {
        self.handlers
            .iter_mut()
            .find_map(|handler| handler.tolerates(err, now).then(|| handler.class()))
    }

    /// Forget all first occurrences, after a successful tick.
    pub fn reset_all(&mut self) {
        for handler in &mut self.handlers {
            handler.reset();
        }
    }
}
