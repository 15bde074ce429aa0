//! Model and criterion traits consumed by the [`Runner`](crate::Runner).

use candle::{Result, Tensor, Var};

/// One `(input, target)` pair yielded by a data source.
#[derive(Clone, Debug)]
pub struct Batch {
    pub input: Tensor,
    pub target: Tensor,
}

impl Batch {
    pub fn new(input: Tensor, target: Tensor) -> Self {
        Self { input, target }
    }
}

/// Trait for models driven by the [`Runner`](crate::Runner).
///
/// The mode switches only change what `forward` computes (dropout, batch
/// statistics); the runner's control flow is the same either way.
pub trait Model {
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// Switch to training behaviour. Called before every training epoch.
    fn train(&mut self) {}

    /// Switch to inference behaviour. Called before every evaluation pass.
    fn eval(&mut self) {}

    /// Trainable parameters.
    fn parameters(&self) -> Vec<Var> {
        Vec::new()
    }
}

/// Loss function: `(output, target) -> scalar loss` with a gradient graph
/// attached to `output`.
pub trait Criterion {
    fn loss(&self, output: &Tensor, target: &Tensor) -> Result<Tensor>;
}

impl<F> Criterion for F
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    fn loss(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        self(output, target)
    }
}
