//! Metrics evaluated on every batch, in training and validation alike.

use candle::{Result, Tensor};

/// A named function of `(output, target)` whose result reduces to a single
/// value. Averaging across batches is done by the runner's meters.
pub trait Metric {
    fn name(&self) -> &str;
    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Tensor>;
}

/// [`Metric`] built from a name and a closure.
pub struct FnMetric<F> {
    name: String,
    f: F,
}

impl<F> FnMetric<F>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Metric for FnMetric<F>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        (self.f)(output, target)
    }
}
