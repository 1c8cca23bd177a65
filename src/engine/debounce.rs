//! Trailing-edge resize debouncer.
//!
//! A single pending slot: every notification overwrites the stored width and
//! pushes the deadline out to `now + quiet`. Polling after the deadline yields
//! the most recent width exactly once and empties the slot. Time is passed in
//! by the caller so the owner loop (and tests) control the clock.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Pending {
    width: u32,
    deadline: Instant,
}

/// Coalesces bursts of container resizes into one recompute.
#[derive(Debug, Clone)]
pub struct ResizeDebouncer {
    quiet: Duration,
    pending: Option<Pending>,
}

impl ResizeDebouncer {
    /// Create a debouncer that fires after `quiet` without notifications.
    #[must_use]
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
        }
    }

    /// Record a resize to `width` observed at `now`, rescheduling the firing.
    pub fn notify_resize(&mut self, width: u32, now: Instant) {
        self.pending = Some(Pending {
            width,
            deadline: now + self.quiet,
        });
    }

    /// Fire if the quiet period has elapsed, returning the latest width.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        match self.pending {
            Some(p) if now >= p.deadline => {
                self.pending = None;
                Some(p.width)
            }
            _ => None,
        }
    }

    /// When the pending recompute is due, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}
