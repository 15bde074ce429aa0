//! State shared between the runner and its callbacks.

use crate::meter::AverageMeter;
use crate::metrics::Metric;
use crate::module::{Batch, Criterion, Model};
use crate::optim::Optimizer;
use crate::scaling::GradScaling;
use crate::timer::Timer;
use candle::{Device, Tensor};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Everything the runner knows about the current run.
///
/// Callbacks read and write these fields from inside their hooks. The
/// `train_*` and `val_*` snapshots are copies taken at the end of each epoch
/// and are never touched by later meter resets.
pub struct RunContext {
    pub model: Box<dyn Model>,
    pub optimizer: Box<dyn Optimizer>,
    pub criterion: Box<dyn Criterion>,
    /// Metric functions; `metric_meters[i]` averages `metrics[i]`.
    pub metrics: Vec<Box<dyn Metric>>,
    pub metric_meters: Vec<AverageMeter>,
    pub loss_meter: AverageMeter,
    pub timer: Timer,
    pub scaler: Box<dyn GradScaling>,
    pub device: Device,

    pub epoch: usize,
    pub num_epochs: usize,
    /// Index of the current batch within the epoch.
    pub step: usize,
    /// Number of batches the current epoch is bounded to.
    pub ep_size: usize,
    pub is_train: bool,
    pub batch_size: usize,
    pub verbose: bool,

    /// Batch being processed by the current step.
    pub input: Option<Batch>,
    /// Model output of the current step.
    pub output: Option<Tensor>,

    pub train_loss: Option<AverageMeter>,
    pub train_metrics: Vec<AverageMeter>,
    pub val_loss: Option<AverageMeter>,
    pub val_metrics: Vec<AverageMeter>,
}

impl RunContext {
    pub(crate) fn snapshot_train(&mut self) {
        self.train_loss = Some(self.loss_meter.clone());
        self.train_metrics = self.metric_meters.clone();
    }

    pub(crate) fn snapshot_val(&mut self) {
        self.val_loss = Some(self.loss_meter.clone());
        self.val_metrics = self.metric_meters.clone();
    }

    pub(crate) fn reset_meters(&mut self) {
        self.loss_meter.reset();
        for meter in &mut self.metric_meters {
            meter.reset();
        }
        self.timer.reset();
    }

    /// Snapshot of a named training metric from the last finished epoch.
    pub fn train_metric(&self, name: &str) -> Option<&AverageMeter> {
        self.train_metrics.iter().find(|m| m.name() == name)
    }

    /// Snapshot of a named validation metric from the last finished epoch.
    pub fn val_metric(&self, name: &str) -> Option<&AverageMeter> {
        self.val_metrics.iter().find(|m| m.name() == name)
    }
}

/// Shared handle to the [`RunContext`] of one runner.
///
/// Runs are single-threaded: the runner never holds a borrow while a hook is
/// executing, so hooks may borrow mutably. Hooks must not keep a borrow alive
/// after they return.
#[derive(Clone)]
pub struct ContextHandle(Rc<RefCell<RunContext>>);

impl ContextHandle {
    pub(crate) fn new(ctx: RunContext) -> Self {
        Self(Rc::new(RefCell::new(ctx)))
    }

    pub fn borrow(&self) -> Ref<'_, RunContext> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, RunContext> {
        self.0.borrow_mut()
    }

    /// True when both handles point to the same context.
    pub fn ptr_eq(&self, other: &ContextHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
