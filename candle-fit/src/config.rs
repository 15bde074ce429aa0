//! Runner and fit configuration.

use crate::data::DataSource;
use crate::meter::DEFAULT_DECAY;
use candle::Device;

pub struct RunnerConfig {
    pub device: Device,
    /// Show a live progress bar with smoothed loss and metrics.
    pub verbose: bool,
    /// Decay of the smoothed averages kept by every meter.
    pub meter_decay: f64,
    /// Emit a debug log line every n steps; 0 disables it.
    pub log_every_n_steps: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            verbose: true,
            meter_decay: DEFAULT_DECAY,
            log_every_n_steps: 50,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn meter_decay(mut self, decay: f64) -> Self {
        self.meter_decay = decay;
        self
    }

    pub fn log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }
}

/// Arguments of [`Runner::fit`](crate::Runner::fit) beyond the training
/// source.
#[derive(Clone, Copy)]
pub struct FitOptions<'a> {
    /// Bound on batches per training epoch; overrides the source length.
    /// `Some(0)` means zero batches, it does not fall back to the length.
    pub steps_per_epoch: Option<usize>,
    pub val_source: Option<&'a dyn DataSource>,
    /// Bound on batches per validation pass.
    pub val_steps: Option<usize>,
    pub epochs: usize,
    /// First epoch index, for continuing an earlier run's numbering.
    pub start_epoch: usize,
}

impl Default for FitOptions<'_> {
    fn default() -> Self {
        Self {
            steps_per_epoch: None,
            val_source: None,
            val_steps: None,
            epochs: 1,
            start_epoch: 0,
        }
    }
}

impl<'a> FitOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn start_epoch(mut self, epoch: usize) -> Self {
        self.start_epoch = epoch;
        self
    }

    /// Caps every training epoch at `steps` batches. A cap of 0 runs no
    /// training batches at all.
    pub fn steps_per_epoch(mut self, steps: usize) -> Self {
        self.steps_per_epoch = Some(steps);
        self
    }

    pub fn validation(mut self, source: &'a dyn DataSource) -> Self {
        self.val_source = Some(source);
        self
    }

    pub fn val_steps(mut self, steps: usize) -> Self {
        self.val_steps = Some(steps);
        self
    }
}
