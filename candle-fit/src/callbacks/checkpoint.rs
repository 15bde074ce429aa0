//! Model checkpointing callback.

use super::{Callback, Mode};
use crate::context::{ContextHandle, RunContext};
use crate::error::Result;
use candle_nn::VarMap;
use std::collections::BinaryHeap;
use std::fmt;
use std::path::PathBuf;

/// Epoch snapshot a callback can watch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Monitor {
    TrainLoss,
    ValLoss,
    TrainMetric(String),
    ValMetric(String),
}

impl Monitor {
    /// Current snapshot value, if the context has one.
    pub fn read(&self, ctx: &RunContext) -> Option<f64> {
        let meter = match self {
            Monitor::TrainLoss => ctx.train_loss.as_ref(),
            Monitor::ValLoss => ctx.val_loss.as_ref(),
            Monitor::TrainMetric(name) => ctx.train_metric(name),
            Monitor::ValMetric(name) => ctx.val_metric(name),
        };
        meter.map(|m| m.avg())
    }
}

impl fmt::Display for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Monitor::TrainLoss => f.write_str("train_loss"),
            Monitor::ValLoss => f.write_str("val_loss"),
            Monitor::TrainMetric(name) => write!(f, "train_{name}"),
            Monitor::ValMetric(name) => write!(f, "val_{name}"),
        }
    }
}

struct Saved {
    value: f64,
    path: PathBuf,
    mode: Mode,
}

impl PartialEq for Saved {
    fn eq(&self, other: &Self) -> bool {
        self.value.total_cmp(&other.value).is_eq()
    }
}

impl Eq for Saved {}

impl PartialOrd for Saved {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// The heap top is the worst checkpoint, the next one to prune.
impl Ord for Saved {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let ordering = self.value.total_cmp(&other.value);
        match self.mode {
            Mode::Min => ordering,
            Mode::Max => ordering.reverse(),
        }
    }
}

/// Saves a [`VarMap`] as safetensors at the end of every epoch whose monitored
/// snapshot beats the best one so far, keeping the `save_top_k` best files.
///
/// Epochs without the monitored snapshot (e.g. no validation source) or with
/// a non-finite value are skipped.
pub struct ModelCheckpoint {
    varmap: VarMap,
    dirpath: PathBuf,
    monitor: Monitor,
    save_top_k: usize,
    mode: Mode,
    saved: BinaryHeap<Saved>,
    best: Option<f64>,
    ctx: Option<ContextHandle>,
}

impl ModelCheckpoint {
    pub fn new(varmap: VarMap, dirpath: impl Into<PathBuf>) -> Self {
        Self {
            varmap,
            dirpath: dirpath.into(),
            monitor: Monitor::ValLoss,
            save_top_k: 1,
            mode: Mode::Min,
            saved: BinaryHeap::new(),
            best: None,
            ctx: None,
        }
    }

    pub fn monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn save_top_k(mut self, k: usize) -> Self {
        self.save_top_k = k;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    /// Paths of the checkpoints currently kept on disk, best first.
    pub fn saved_paths(&self) -> Vec<PathBuf> {
        let mut saved: Vec<&Saved> = self.saved.iter().collect();
        saved.sort();
        saved.into_iter().map(|s| s.path.clone()).collect()
    }

    fn is_better(&self, current: f64) -> bool {
        match (self.best, self.mode) {
            (None, _) => true,
            (Some(best), Mode::Min) => current < best,
            (Some(best), Mode::Max) => current > best,
        }
    }

    fn save(&mut self, epoch: usize, value: f64) -> Result<()> {
        std::fs::create_dir_all(&self.dirpath)?;
        let path = self
            .dirpath
            .join(format!("epoch_{epoch:04}_{}_{value:.4}.safetensors", self.monitor));
        self.varmap.save(&path)?;
        tracing::debug!(epoch, value, path = %path.display(), "saved checkpoint");

        self.saved.push(Saved {
            value,
            path,
            mode: self.mode,
        });
        while self.saved.len() > self.save_top_k {
            if let Some(worst) = self.saved.pop() {
                std::fs::remove_file(&worst.path)?;
            }
        }
        Ok(())
    }
}

impl Callback for ModelCheckpoint {
    fn set_context(&mut self, ctx: ContextHandle) {
        self.ctx = Some(ctx);
    }

    fn on_epoch_end(&mut self) -> Result<()> {
        let Some(handle) = self.ctx.clone() else {
            return Ok(());
        };
        let (epoch, current) = {
            let ctx = handle.borrow();
            (ctx.epoch, self.monitor.read(&ctx))
        };
        let Some(current) = current else {
            return Ok(());
        };
        if !current.is_finite() {
            tracing::warn!(epoch, monitor = %self.monitor, current, "non-finite value, not saving");
            return Ok(());
        }
        if self.is_better(current) {
            self.best = Some(current);
            self.save(epoch, current)?;
        }
        Ok(())
    }
}
