//! Callback-driven training and evaluation loop for Candle models.
//!
//! A [`Runner`] owns a [`RunContext`] (model, optimizer, criterion, metrics,
//! meters and run counters) and an ordered list of [`Callback`]s. Model code
//! only describes the forward pass; concerns such as logging or checkpointing
//! plug in as callbacks that read and write the shared context.

pub mod callbacks;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod grad;
pub mod meter;
pub mod metrics;
pub mod module;
pub mod optim;
pub mod runner;
pub mod scaling;
pub mod timer;

pub use callbacks::{Callback, Callbacks, ConsoleLogger, Mode, ModelCheckpoint, Monitor};
pub use config::{FitOptions, RunnerConfig};
pub use context::{ContextHandle, RunContext};
pub use data::{DataSource, IterSource, TensorBatches};
pub use error::{FitError, Result};
pub use meter::AverageMeter;
pub use metrics::{FnMetric, Metric};
pub use module::{Batch, Criterion, Model};
pub use optim::{CandleOptimizer, Optimizer};
pub use runner::{Runner, RunnerBuilder};
pub use scaling::{DynamicLossScaler, GradScaling, NoScaling, ScaledLoss, StaticLossScale};
pub use timer::Timer;
