//! Manual/auto-reset wait primitive used to gate worker threads.
//!
//! A direct port of the original `Event` condition variable wrapper: a
//! boolean condition with `Signal`/`Clear`/`Wait` semantics. No signal is
//! ever missed -- state persists until observed by a `Wait` (auto-reset) or
//! indefinitely (manual-reset).

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A boolean condition gate with optional manual-reset semantics.
pub struct Event {
    state: Mutex<bool>,
    condition: Condvar,
    manual: bool,
}

impl Event {
    /// Create a new event with the given initial state and reset mode.
    ///
    /// When `manual` is `false`, a successful `wait()` atomically clears
    /// the state back to `false` before returning (auto-reset). When
    /// `manual` is `true`, the state remains `true` until an explicit
    /// [`Event::clear`].
    pub fn new(initial_state: bool, manual: bool) -> Self {
        Self {
            state: Mutex::new(initial_state),
            condition: Condvar::new(),
            manual,
        }
    }

    /// Set the state to true and wake all waiters. Idempotent.
    pub fn signal(&self) {
        let mut state = self.state.lock().unwrap();
        if *state {
            return;
        }
        *state = true;
        self.condition.notify_all();
    }

    /// Set the state to false.
    pub fn clear(&self) {
        *self.state.lock().unwrap() = false;
    }

    /// Block until the state is true.
    ///
    /// If this event is auto-reset, the state is cleared back to `false`
    /// before returning.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        state = self.condition.wait_while(state, |s| !*s).unwrap();
        if !self.manual {
            *state = false;
        }
    }

    /// Block until the state is true or `timeout` elapses.
    ///
    /// Returns `true` if the state became true before the timeout. On
    /// timeout, the state is left untouched (no mutation happens).
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (mut state, result) = self
            .condition
            .wait_timeout_while(state, timeout, |s| !*s)
            .unwrap();
        if result.timed_out() {
            return false;
        }
        if !self.manual {
            *state = false;
        }
        true
    }
}
