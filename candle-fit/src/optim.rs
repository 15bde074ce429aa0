//! Optimizer interface used by the training step.

use candle::backprop::GradStore;
use candle::{Result, Var};

/// Optimizer as seen by the runner.
///
/// Candle returns fresh gradients from every backward pass, so
/// [`zero_grad`](Self::zero_grad) only matters for implementations that keep
/// gradient state of their own.
pub trait Optimizer {
    fn zero_grad(&mut self) -> Result<()> {
        Ok(())
    }

    fn step(&mut self, grads: &GradStore) -> Result<()>;

    /// Variables updated by [`step`](Self::step).
    fn vars(&self) -> &[Var];

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Adapts any `candle_nn` optimizer (SGD, AdamW, ...) to [`Optimizer`].
pub struct CandleOptimizer<O> {
    inner: O,
    vars: Vec<Var>,
}

impl<O: candle_nn::Optimizer> CandleOptimizer<O> {
    pub fn new(vars: Vec<Var>, config: O::Config) -> Result<Self> {
        let inner = O::new(vars.clone(), config)?;
        Ok(Self { inner, vars })
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

impl<O: candle_nn::Optimizer> Optimizer for CandleOptimizer<O> {
    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.inner.step(grads)
    }

    fn vars(&self) -> &[Var] {
        &self.vars
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr)
    }
}
