//! Adversarial scheduling-jitter generators.
//!
//! Ports `AdversarialPressureThread`: a pure CPU-burn loop with no real
//! work, used to starve the scheduler and feeder threads of cycles so
//! tests can observe how the reconciliation state machine behaves under
//! contention.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct PressureThread {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PressureThread {
    pub fn spawn() -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("avsync-pressure".to_string())
            .spawn(move || {
                let mut accum: u64 = 0;
                while flag.load(Ordering::Relaxed) {
                    for i in 0..10_000u64 {
                        accum = accum.wrapping_add(i.wrapping_mul(2654435761));
                    }
                    std::hint::black_box(accum);
                }
            })
            .ok();
        Self { running, handle }
    }

    pub fn kill(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PressureThread {
    fn drop(&mut self) {
        self.kill();
    }
}
