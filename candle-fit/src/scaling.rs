//! Loss scaling for reduced-precision training.
//!
//! The loss is multiplied by a scale factor before the backward pass and the
//! resulting gradients are divided by the same factor before the optimizer
//! sees them. [`ScaledLoss`] is the scope in which that happens: it is opened
//! on a loss and can only be closed by running the backward pass, which hands
//! back unscaled gradients.

use crate::error::Result;
use candle::backprop::GradStore;
use candle::{DType, Tensor, Var};

/// Strategy deciding the loss scale for each step.
pub trait GradScaling {
    fn loss_scale(&self) -> f64;

    /// Whether gradients must be checked for inf/NaN after unscaling.
    fn checks_overflow(&self) -> bool {
        false
    }

    /// Called once per scaled backward pass with the overflow verdict.
    fn update(&mut self, _found_overflow: bool) {}
}

/// Plain full-precision training: scale 1, no checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoScaling;

impl GradScaling for NoScaling {
    fn loss_scale(&self) -> f64 {
        1.0
    }
}

/// Fixed loss scale.
#[derive(Clone, Copy, Debug)]
pub struct StaticLossScale(pub f64);

impl GradScaling for StaticLossScale {
    fn loss_scale(&self) -> f64 {
        self.0
    }
}

/// Loss scale that backs off on overflow and grows again after a run of clean
/// steps. Steps whose gradients overflow are skipped.
#[derive(Clone, Debug)]
pub struct DynamicLossScaler {
    scale: f64,
    min_scale: f64,
    factor: f64,
    window: usize,
    clean_steps: usize,
}

impl DynamicLossScaler {
    pub fn new(init_scale: f64) -> Self {
        Self {
            scale: init_scale,
            min_scale: 1.0,
            factor: 2.0,
            window: 2000,
            clean_steps: 0,
        }
    }

    /// Consecutive clean steps before the scale is raised.
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn min_scale(mut self, min_scale: f64) -> Self {
        self.min_scale = min_scale;
        self
    }
}

impl Default for DynamicLossScaler {
    fn default() -> Self {
        Self::new(65536.0)
    }
}

impl GradScaling for DynamicLossScaler {
    fn loss_scale(&self) -> f64 {
        self.scale
    }

    fn checks_overflow(&self) -> bool {
        true
    }

    fn update(&mut self, found_overflow: bool) {
        if found_overflow {
            self.scale = (self.scale / self.factor).max(self.min_scale);
            self.clean_steps = 0;
            tracing::warn!(
                loss_scale = self.scale,
                "gradient overflow, skipping step and reducing loss scale"
            );
            return;
        }
        self.clean_steps += 1;
        if self.clean_steps >= self.window {
            self.scale *= self.factor;
            self.clean_steps = 0;
        }
    }
}

/// An open scaled-backward region bound to a loss and the optimizer's
/// variables.
pub struct ScaledLoss<'a> {
    scaler: &'a mut dyn GradScaling,
    vars: &'a [Var],
    scaled: Tensor,
    scale: f64,
}

impl<'a> ScaledLoss<'a> {
    pub fn begin(scaler: &'a mut dyn GradScaling, loss: &Tensor, vars: &'a [Var]) -> Result<Self> {
        let scale = scaler.loss_scale();
        let scaled = if scale == 1.0 {
            loss.clone()
        } else {
            loss.affine(scale, 0.0)?
        };
        Ok(Self {
            scaler,
            vars,
            scaled,
            scale,
        })
    }

    pub fn scaled(&self) -> &Tensor {
        &self.scaled
    }

    /// Runs the backward pass and closes the region.
    ///
    /// Returns the unscaled gradients, or `None` when the scaler detected an
    /// overflow and the update must be skipped.
    pub fn backward(self) -> Result<Option<GradStore>> {
        let Self {
            scaler,
            vars,
            scaled,
            scale,
        } = self;

        let mut grads = scaled.backward()?;
        let check = scaler.checks_overflow();
        let mut overflow = false;
        if scale != 1.0 || check {
            for var in vars {
                let Some(grad) = grads.remove(var.as_tensor()) else {
                    continue;
                };
                let grad = if scale == 1.0 {
                    grad
                } else {
                    grad.affine(1.0 / scale, 0.0)?
                };
                if check && !overflow {
                    overflow = !all_finite(&grad)?;
                }
                grads.insert(var.as_tensor(), grad);
            }
        }
        scaler.update(overflow);
        Ok((!overflow).then_some(grads))
    }
}

fn all_finite(t: &Tensor) -> Result<bool> {
    let total = t.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
    Ok(total.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    fn quadratic(var: &Var, coeff: f64) -> Result<Tensor> {
        Ok(var.as_tensor().sqr()?.affine(coeff, 0.0)?.sum_all()?)
    }

    #[test]
    fn static_scale_yields_unscaled_gradients() -> Result<()> {
        let var = Var::new(&[1f32, 2., 3.], &Device::Cpu)?;
        let loss = quadratic(&var, 1.0)?;
        let mut scaler = StaticLossScale(1024.0);
        let vars = [var.clone()];
        let scope = ScaledLoss::begin(&mut scaler, &loss, &vars)?;
        assert_eq!(scope.scaled().to_scalar::<f32>()?, 14.0 * 1024.0);
        let grads = scope.backward()?.expect("static scaling never skips");
        let grad = grads.get(var.as_tensor()).expect("grad").to_vec1::<f32>()?;
        assert_eq!(grad, vec![2.0, 4.0, 6.0]);
        Ok(())
    }

    #[test]
    fn dynamic_scaler_skips_and_backs_off_on_overflow() -> Result<()> {
        let var = Var::new(&[1f32], &Device::Cpu)?;
        let vars = [var.clone()];
        let mut scaler = DynamicLossScaler::new(8.0);

        let loss = quadratic(&var, f64::INFINITY)?;
        let grads = ScaledLoss::begin(&mut scaler, &loss, &vars)?.backward()?;
        assert!(grads.is_none());
        assert_eq!(scaler.loss_scale(), 4.0);

        let loss = quadratic(&var, 1.0)?;
        let grads = ScaledLoss::begin(&mut scaler, &loss, &vars)?.backward()?;
        assert!(grads.is_some());
        assert_eq!(scaler.loss_scale(), 4.0);
        Ok(())
    }

    #[test]
    fn dynamic_scaler_grows_after_window() {
        let mut scaler = DynamicLossScaler::new(2.0).window(3);
        for _ in 0..3 {
            scaler.update(false);
        }
        assert_eq!(scaler.loss_scale(), 4.0);
        scaler.update(true);
        scaler.update(true);
        scaler.update(true);
        assert_eq!(scaler.loss_scale(), 1.0);
    }
}
