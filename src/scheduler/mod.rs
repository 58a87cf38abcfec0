//! High-precision periodic scheduler.
//!
//! Ports the original `HighPrecisionTimer`: a single background thread
//! elevates itself to the highest real-time priority it can get (best
//! effort, never fatal) and ticks a fixed-interval loop, pinging every
//! registered [`delegate::Delegate`] whose own period has elapsed since its
//! last ping. Delegates are held as `Arc<dyn Delegate>` in a `Mutex`-guarded
//! set so they can be added and removed while the thread runs.
//!
//! - [`mod@delegate`]: the `Delegate` trait pinged by the worker thread.
//! - [`video_timer`]: the concrete delegate that paces video frame pumps.

pub mod delegate;
pub mod video_timer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::error::SchedulerError;
use delegate::Delegate;

/// Drives a set of [`Delegate`]s at their individually requested periods.
pub struct Scheduler {
    tick: Duration,
    delegates: Arc<Mutex<Vec<Arc<dyn Delegate>>>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            delegates: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Register a delegate. Safe to call while the scheduler is running.
    pub fn add_delegate(&self, delegate: Arc<dyn Delegate>) {
        delegate.refresh_last_ping();
        self.delegates.lock().unwrap().push(delegate);
    }

    /// Remove a delegate by pointer identity.
    pub fn remove_delegate(&self, delegate: &Arc<dyn Delegate>) {
        let mut delegates = self.delegates.lock().unwrap();
        delegates.retain(|d| !Arc::ptr_eq(d, delegate));
    }

    pub fn remove_all_delegates(&self) {
        self.delegates.lock().unwrap().clear();
    }

    /// Spawn the worker thread. Errs if already running.
    ///
    /// Refreshes every already-registered delegate's `last_ping` to now
    /// first, so a delegate added long before `start()` is actually called
    /// (e.g. during `Initialize`, with `StartTest` following much later)
    /// doesn't see its first tick's elapsed time span that whole gap and
    /// fire a burst of catch-up pings.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        for delegate in self.delegates.lock().unwrap().iter() {
            delegate.refresh_last_ping();
        }

        let tick = self.tick;
        let delegates = Arc::clone(&self.delegates);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("avsync-scheduler".to_string())
            .spawn(move || run_scheduler_thread(tick, delegates, running))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SchedulerError::SpawnFailed(e.to_string())
            })?;

        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signal the worker thread to stop and join it. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_scheduler_thread(
    tick: Duration,
    delegates: Arc<Mutex<Vec<Arc<dyn Delegate>>>>,
    running: Arc<AtomicBool>,
) {
    elevate_thread_priority();
    info!("scheduler thread started, tick = {:?}", tick);

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        let mut delegates = delegates.lock().unwrap();
        delegates.retain(|d| d.running());

        for delegate in delegates.iter() {
            let elapsed = now.saturating_duration_since(delegate.last_ping());
            if elapsed.as_secs_f64() < delegate.timer_period() {
                continue;
            }
            delegate.set_last_ping(now);
            delegate.timer_ping();
            if delegate.fire_once() {
                delegate.kill();
            }
        }
        drop(delegates);

        thread::sleep(tick);
    }

    info!("scheduler thread stopped");
}

#[cfg(unix)]
fn elevate_thread_priority() {
    // Best-effort SCHED_FIFO elevation, mirroring the original timer's
    // startup sequence. A failure here only costs scheduling precision,
    // never correctness, so it's logged and not propagated.
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority < 0 {
            warn!("sched_get_priority_max(SCHED_FIFO) failed, running at default priority");
            return;
        }
        let param = libc::sched_param {
            sched_priority: max_priority,
        };
        let result = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if result != 0 {
            warn!(
                "pthread_setschedparam(SCHED_FIFO, {}) failed with errno {}, running at default priority",
                max_priority, result
            );
        }
    }
}

#[cfg(not(unix))]
fn elevate_thread_priority() {
    warn!("real-time thread priority elevation is not supported on this platform");
}
