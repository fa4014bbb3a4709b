use std::time::{Duration, Instant};

/// Logs how long a routing phase took when dropped.
pub struct ScopedTimer {
    name: &'static str,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: &'static str) -> Self {
        log::debug!("{} started", name);
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::info!("{} finished in {:.3}s", self.name, self.elapsed().as_secs_f64());
    }
}
