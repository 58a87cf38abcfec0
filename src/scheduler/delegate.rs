//! The scheduler's delegate contract.

use std::sync::Mutex;
use std::time::Instant;

/// A periodic delegate driven by the [`super::Scheduler`] thread.
///
/// `timer_ping` is invoked under the scheduler's delegate lock: it must be
/// short and non-blocking, and must never call back into the scheduler.
/// `timer_period` is read every scheduler tick and so may change
/// dynamically between pings (the video timer delegate does exactly this).
pub trait Delegate: Send + Sync {
    /// Invoked when the timer fires.
    fn timer_ping(&self);

    /// Current period in seconds. Re-read every scheduler tick.
    fn timer_period(&self) -> f64;

    /// Whether this delegate should be removed after its next ping.
    fn fire_once(&self) -> bool;

    /// Whether the delegate still wants to receive pings. Returning
    /// `false` causes the scheduler to remove it on the next tick.
    fn running(&self) -> bool {
        true
    }

    /// Mark the delegate as no longer wanting pings.
    fn kill(&self) {}

    /// Timestamp of the delegate's last ping (or registration time).
    fn last_ping(&self) -> Instant;

    /// Overwrite the delegate's last-ping timestamp.
    fn set_last_ping(&self, when: Instant);

    /// Resync phase to now -- used by the harness to resume the video
    /// timer's cadence immediately after a retune or an audio-authoritative
    /// advance, instead of waiting out whatever fraction of the old period
    /// had already elapsed.
    fn refresh_last_ping(&self) {
        self.set_last_ping(Instant::now());
    }
}

/// Helper for storing a delegate's last-ping timestamp behind interior
/// mutability, since `Delegate::set_last_ping` takes `&self`.
pub struct LastPingCell(Mutex<Instant>);

impl LastPingCell {
    pub fn new() -> Self {
        Self(Mutex::new(Instant::now()))
    }

    pub fn get(&self) -> Instant {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, when: Instant) {
        *self.0.lock().unwrap() = when;
    }
}

impl Default for LastPingCell {
    fn default() -> Self {
        Self::new()
    }
}
