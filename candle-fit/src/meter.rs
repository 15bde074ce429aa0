//! Running averages over a scalar stream.

/// Default decay of the exponentially smoothed average.
pub const DEFAULT_DECAY: f64 = 0.95;

/// Tracks the cumulative mean and an exponentially smoothed mean of the
/// values passed to [`update`](Self::update).
///
/// Both averages read as `0.0` until the first update. The smoothed average is
/// seeded with the first value observed after construction or a
/// [`reset`](Self::reset). Non-finite values are not filtered.
///
/// `Clone` produces an independent copy, which is how per-epoch snapshots are
/// taken.
#[derive(Clone, Debug, PartialEq)]
pub struct AverageMeter {
    name: String,
    decay: f64,
    val: f64,
    sum: f64,
    count: usize,
    avg_smooth: f64,
}

impl AverageMeter {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_decay(name, DEFAULT_DECAY)
    }

    pub fn with_decay(name: impl Into<String>, decay: f64) -> Self {
        Self {
            name: name.into(),
            decay,
            val: 0.0,
            sum: 0.0,
            count: 0,
            avg_smooth: 0.0,
        }
    }

    pub fn update(&mut self, value: f64) {
        self.val = value;
        if self.count == 0 {
            self.avg_smooth = value;
        } else {
            self.avg_smooth = self.decay * self.avg_smooth + (1.0 - self.decay) * value;
        }
        self.sum += value;
        self.count += 1;
    }

    pub fn reset(&mut self) {
        self.val = 0.0;
        self.sum = 0.0;
        self.count = 0;
        self.avg_smooth = 0.0;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed value.
    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn avg_smooth(&self) -> f64 {
        self.avg_smooth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avg_is_cumulative_mean() {
        let mut m = AverageMeter::new("loss");
        m.update(1.0);
        m.update(3.0);
        assert_eq!(m.avg(), 2.0);
        assert_eq!(m.count(), 2);
        assert_eq!(m.val(), 3.0);
    }

    #[test]
    fn empty_meter_reads_zero() {
        let m = AverageMeter::new("loss");
        assert_eq!(m.avg(), 0.0);
        assert_eq!(m.avg_smooth(), 0.0);
    }

    #[test]
    fn smoothing_is_seeded_with_first_value() {
        let mut m = AverageMeter::with_decay("loss", 0.9);
        let values = [4.0, 2.0, 8.0, 1.0];
        let mut expected = values[0];
        for &v in &values[1..] {
            expected = 0.9 * expected + 0.1 * v;
        }
        for v in values {
            m.update(v);
        }
        assert!((m.avg_smooth() - expected).abs() < 1e-12);
    }

    #[test]
    fn reset_forgets_history_and_reseeds() {
        let mut m = AverageMeter::new("acc");
        m.update(10.0);
        m.update(20.0);
        m.reset();
        assert_eq!(m.count(), 0);
        m.update(5.0);
        m.update(7.0);
        assert_eq!(m.avg(), 6.0);
        let expected = DEFAULT_DECAY * 5.0 + (1.0 - DEFAULT_DECAY) * 7.0;
        assert!((m.avg_smooth() - expected).abs() < 1e-12);
    }

    #[test]
    fn clone_is_independent() {
        let mut m = AverageMeter::new("loss");
        m.update(2.0);
        let snapshot = m.clone();
        m.reset();
        m.update(100.0);
        assert_eq!(snapshot.avg(), 2.0);
        assert_eq!(snapshot.count(), 1);
    }

    #[test]
    fn nan_propagates() {
        let mut m = AverageMeter::new("loss");
        m.update(1.0);
        m.update(f64::NAN);
        assert!(m.avg().is_nan());
    }
}
