use std::time::Instant;

use log::info;

/// Records one line per processing step with the shape change and duration.
pub struct LogManager;

impl LogManager {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, message: &str) {
        info!("{}", message);
    }

    pub fn record_step(
        &self,
        step: &str,
        before: (usize, usize),
        after: (usize, usize),
        started: Instant,
        details: &str,
    ) {
        self.record(&format!(
            "{} {}x{} -> {}x{} in {:.1} ms ({})",
            step,
            before.0,
            before.1,
            after.0,
            after.1,
            started.elapsed().as_secs_f64() * 1e3,
            details
        ));
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
