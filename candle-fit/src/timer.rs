//! Per-epoch wall clock.

use crate::meter::AverageMeter;
use std::time::{Duration, Instant};

/// Splits each batch into time spent waiting on the data source and time
/// spent in the step itself. Durations are recorded in seconds.
#[derive(Clone, Debug)]
pub struct Timer {
    epoch_start: Instant,
    mark: Instant,
    pub data_time: AverageMeter,
    pub batch_time: AverageMeter,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            epoch_start: now,
            mark: now,
            data_time: AverageMeter::new("data_time"),
            batch_time: AverageMeter::new("batch_time"),
        }
    }

    pub fn reset(&mut self) {
        let now = Instant::now();
        self.epoch_start = now;
        self.mark = now;
        self.data_time.reset();
        self.batch_time.reset();
    }

    /// A batch has been received from the data source.
    pub fn data_ready(&mut self) {
        let now = Instant::now();
        self.data_time.update((now - self.mark).as_secs_f64());
        self.mark = now;
    }

    /// The step for the current batch has finished.
    pub fn batch_done(&mut self) {
        let now = Instant::now();
        self.batch_time.update((now - self.mark).as_secs_f64());
        self.mark = now;
    }

    /// Time since the last reset.
    pub fn elapsed(&self) -> Duration {
        self.epoch_start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_one_sample_per_call() {
        let mut t = Timer::new();
        t.data_ready();
        t.batch_done();
        t.data_ready();
        t.batch_done();
        assert_eq!(t.data_time.count(), 2);
        assert_eq!(t.batch_time.count(), 2);
        assert!(t.batch_time.avg() >= 0.0);
    }

    #[test]
    fn reset_clears_meters() {
        let mut t = Timer::new();
        t.data_ready();
        t.batch_done();
        t.reset();
        assert_eq!(t.data_time.count(), 0);
        assert_eq!(t.batch_time.count(), 0);
    }
}
