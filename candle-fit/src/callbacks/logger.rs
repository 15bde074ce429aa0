//! Epoch summaries through `tracing`.

use super::Callback;
use crate::context::ContextHandle;
use crate::error::Result;
use crate::meter::AverageMeter;
use std::time::Instant;

/// Logs one line per finished epoch with the train (and, when present,
/// validation) loss and metrics, and a summary when training ends.
#[derive(Default)]
pub struct ConsoleLogger {
    ctx: Option<ContextHandle>,
    epoch_start: Option<Instant>,
    train_start: Option<Instant>,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn describe(loss: Option<&AverageMeter>, metrics: &[AverageMeter]) -> String {
    let mut out = match loss {
        Some(loss) => format!("loss {:.4}", loss.avg()),
        None => String::from("loss n/a"),
    };
    for m in metrics {
        out.push_str(&format!(" {} {:.4}", m.name(), m.avg()));
    }
    out
}

impl Callback for ConsoleLogger {
    fn set_context(&mut self, ctx: ContextHandle) {
        self.ctx = Some(ctx);
    }

    fn on_train_begin(&mut self) -> Result<()> {
        self.train_start = Some(Instant::now());
        Ok(())
    }

    fn on_epoch_begin(&mut self) -> Result<()> {
        self.epoch_start = Some(Instant::now());
        Ok(())
    }

    fn on_epoch_end(&mut self) -> Result<()> {
        let Some(handle) = &self.ctx else {
            return Ok(());
        };
        let ctx = handle.borrow();
        let secs = self.epoch_start.map_or(0.0, |t| t.elapsed().as_secs_f64());
        let train = describe(ctx.train_loss.as_ref(), &ctx.train_metrics);
        match &ctx.val_loss {
            Some(val_loss) => {
                let val = describe(Some(val_loss), &ctx.val_metrics);
                tracing::info!(
                    epoch = ctx.epoch,
                    num_epochs = ctx.num_epochs,
                    "train: {train} | val: {val} | {secs:.1}s"
                );
            }
            None => {
                tracing::info!(
                    epoch = ctx.epoch,
                    num_epochs = ctx.num_epochs,
                    "train: {train} | {secs:.1}s"
                );
            }
        }
        Ok(())
    }

    fn on_train_end(&mut self) -> Result<()> {
        let secs = self.train_start.map_or(0.0, |t| t.elapsed().as_secs_f64());
        match &self.ctx {
            Some(handle) => {
                let ctx = handle.borrow();
                let last = ctx.val_loss.as_ref().or(ctx.train_loss.as_ref()).map(|m| m.avg());
                tracing::info!(epochs = ctx.num_epochs, final_loss = ?last, "training finished in {secs:.1}s");
            }
            None => tracing::info!("training finished in {secs:.1}s"),
        }
        Ok(())
    }
}
