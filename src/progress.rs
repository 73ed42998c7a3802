//! Progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe accumulator that logs each time the running total crosses an
/// interval boundary. Purely observational; the pipeline works the same with an
/// interval of `u64::MAX`.
pub struct ProgressLogger {
    name: &'static str,
    interval: u64,
    current: AtomicU64,
}

impl ProgressLogger {
    pub fn new(name: &'static str, interval: u64) -> Self {
        assert!(interval > 0, "interval must be positive");
        ProgressLogger {
            name,
            interval,
            current: AtomicU64::new(0),
        }
    }

    /// Adds `amount` to the total, logging at most once per interval crossed.
    pub fn add(&self, amount: u64) {
        let previous = self.current.fetch_add(amount, Ordering::Relaxed);
        let total = previous + amount;
        if total / self.interval > previous / self.interval {
            log::info!("{}: {}", self.name, total);
        }
    }

    pub fn total(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::ProgressLogger;

    #[test]
    fn test_accumulates() {
        let progress = ProgressLogger::new("bytes", 100);
        progress.add(60);
        progress.add(60);
        progress.add(1);
        assert_eq!(progress.total(), 121);
    }
}
