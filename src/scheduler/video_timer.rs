//! The scheduler delegate that paces video frame pumps.
//!
//! Ports `VideoTimerDelegate`: on each ping it invokes a caller-supplied
//! pump callback, at a period derived from the nominal frame rate and
//! scaled by a mutable `playrate_factor` the harness retunes when audio
//! is observed running persistently slow.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use crate::scheduler::delegate::{Delegate, LastPingCell};

/// Pings the harness's frame pump every `base_period * playrate_factor`
/// seconds. `base_period` is the nominal frame period in seconds
/// (`sample_duration / time_scale`), not a frequency: scaling
/// `playrate_factor` above 1.0 stretches the cadence (slows the video
/// clock down) to match audio observed running persistently slow, exactly
/// as `VideoTimerDelegate::TimerPeriod` does in the original.
pub struct VideoTimerDelegate {
    base_period: Mutex<f64>,
    playrate_factor: AtomicU64,
    running: AtomicBool,
    fire_once: bool,
    last_ping: LastPingCell,
    on_ping: Box<dyn Fn() + Send + Sync>,
}

impl VideoTimerDelegate {
    /// `base_period` is the nominal frame period in seconds, e.g.
    /// `1001.0 / 30000.0` for 29.97fps.
    pub fn new(base_period: f64, on_ping: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            base_period: Mutex::new(base_period),
            playrate_factor: AtomicU64::new(1.0f64.to_bits()),
            running: AtomicBool::new(true),
            fire_once: false,
            last_ping: LastPingCell::new(),
            on_ping: Box::new(on_ping),
        }
    }

    /// Change the nominal frame period (seconds), e.g. on a playlist
    /// segment switch. Rejects non-positive values.
    pub fn set_base_period(&self, base_period: f64) {
        if base_period > 0.0 {
            *self.base_period.lock().unwrap() = base_period;
        }
    }

    pub fn base_period(&self) -> f64 {
        *self.base_period.lock().unwrap()
    }

    /// Retune the playback rate multiplier applied on top of the nominal
    /// frame period. Rejects non-positive values.
    pub fn set_playrate_factor(&self, factor: f64) {
        if factor > 0.0 {
            self.playrate_factor.store(factor.to_bits(), Ordering::SeqCst);
        }
    }

    pub fn playrate_factor(&self) -> f64 {
        f64::from_bits(self.playrate_factor.load(Ordering::SeqCst))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Delegate for VideoTimerDelegate {
    fn timer_ping(&self) {
        (self.on_ping)();
    }

    fn timer_period(&self) -> f64 {
        self.base_period() * self.playrate_factor()
    }

    fn fire_once(&self) -> bool {
        self.fire_once
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.stop();
    }

    fn last_ping(&self) -> Instant {
        self.last_ping.get()
    }

    fn set_last_ping(&self, when: Instant) {
        self.last_ping.set(when)
    }
}
