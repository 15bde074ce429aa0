//! Fit/evaluate loop.

use crate::callbacks::{Callback, Callbacks};
use crate::config::{FitOptions, RunnerConfig};
use crate::context::{ContextHandle, RunContext};
use crate::data::DataSource;
use crate::error::{FitError, Result};
use crate::grad;
use crate::meter::AverageMeter;
use crate::metrics::Metric;
use crate::module::{Batch, Criterion, Model};
use crate::optim::Optimizer;
use crate::scaling::{GradScaling, NoScaling, ScaledLoss};
use crate::timer::Timer;
use candle::{DType, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use std::cell::Ref;
use std::fmt::Write;

/// Drives training and evaluation of one model.
///
/// The runner owns the [`RunContext`] and the callbacks. Every lifecycle event
/// is broadcast to the callbacks in registration order:
///
/// ```text
/// on_train_begin
///   per epoch: on_epoch_begin
///              (on_batch_begin, step, on_batch_end) per training batch
///              (on_batch_begin, step, on_batch_end) per validation batch
///              on_epoch_end
/// on_train_end
/// ```
///
/// Any error from a step, the data source or a hook aborts the call and is
/// returned as is; the interrupted epoch produces no snapshot.
pub struct Runner {
    ctx: ContextHandle,
    callbacks: Callbacks,
    log_every_n_steps: usize,
}

pub struct RunnerBuilder {
    model: Box<dyn Model>,
    optimizer: Box<dyn Optimizer>,
    criterion: Box<dyn Criterion>,
    metrics: Vec<Box<dyn Metric>>,
    callbacks: Vec<Box<dyn Callback>>,
    scaler: Box<dyn GradScaling>,
    config: RunnerConfig,
}

impl RunnerBuilder {
    /// Adds a metric. Metrics keep the order in which they are added.
    pub fn metric(mut self, metric: impl Metric + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    /// Adds a callback. Hooks fire in the order callbacks are added.
    pub fn callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn grad_scaler(mut self, scaler: impl GradScaling + 'static) -> Self {
        self.scaler = Box::new(scaler);
        self
    }

    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Runner {
        let decay = self.config.meter_decay;
        let metric_meters = self
            .metrics
            .iter()
            .map(|m| AverageMeter::with_decay(m.name(), decay))
            .collect();
        let ctx = RunContext {
            model: self.model,
            optimizer: self.optimizer,
            criterion: self.criterion,
            metrics: self.metrics,
            metric_meters,
            loss_meter: AverageMeter::with_decay("loss", decay),
            timer: Timer::new(),
            scaler: self.scaler,
            device: self.config.device,
            epoch: 0,
            num_epochs: 0,
            step: 0,
            ep_size: 0,
            is_train: false,
            batch_size: 1,
            verbose: self.config.verbose,
            input: None,
            output: None,
            train_loss: None,
            train_metrics: Vec::new(),
            val_loss: None,
            val_metrics: Vec::new(),
        };
        let ctx = ContextHandle::new(ctx);
        let mut callbacks = Callbacks::new(self.callbacks);
        callbacks.set_context(&ctx);
        Runner {
            ctx,
            callbacks,
            log_every_n_steps: self.config.log_every_n_steps,
        }
    }
}

impl Runner {
    pub fn builder(
        model: impl Model + 'static,
        optimizer: impl Optimizer + 'static,
        criterion: impl Criterion + 'static,
    ) -> RunnerBuilder {
        RunnerBuilder {
            model: Box::new(model),
            optimizer: Box::new(optimizer),
            criterion: Box::new(criterion),
            metrics: Vec::new(),
            callbacks: Vec::new(),
            scaler: Box::new(NoScaling),
            config: RunnerConfig::default(),
        }
    }

    pub fn context(&self) -> Ref<'_, RunContext> {
        self.ctx.borrow()
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.ctx
    }

    /// Trains for epochs `start_epoch..epochs`, validating after each epoch
    /// when a validation source is given.
    ///
    /// Results are left in the [`RunContext`] snapshots and whatever the
    /// callbacks collected.
    pub fn fit(&mut self, train: &dyn DataSource, opts: FitOptions<'_>) -> Result<()> {
        {
            let mut ctx = self.ctx.borrow_mut();
            ctx.num_epochs = opts.epochs;
            ctx.batch_size = train.batch_size().unwrap_or(1);
        }
        self.callbacks.on_train_begin()?;

        for epoch in opts.start_epoch..opts.epochs {
            {
                let mut ctx = self.ctx.borrow_mut();
                ctx.is_train = true;
                ctx.epoch = epoch;
            }
            tracing::debug!(epoch, num_epochs = opts.epochs, "epoch started");
            self.callbacks.on_epoch_begin()?;

            self.ctx.borrow_mut().model.train();
            self.run_one_epoch(train, opts.steps_per_epoch)?;
            self.ctx.borrow_mut().snapshot_train();

            if let Some(val) = opts.val_source {
                self.evaluate(val, opts.val_steps)?;
                self.ctx.borrow_mut().snapshot_val();
            }

            {
                let ctx = self.ctx.borrow();
                tracing::debug!(
                    epoch,
                    train_loss = ctx.train_loss.as_ref().map(|m| m.avg()),
                    val_loss = opts.val_source.and(ctx.val_loss.as_ref()).map(|m| m.avg()),
                    "epoch finished"
                );
            }
            self.callbacks.on_epoch_end()?;
        }

        self.callbacks.on_train_end()
    }

    /// One pass over `source` in evaluation mode. Returns the average loss and
    /// the average of every metric, in the order the metrics were added.
    ///
    /// The optimizer is never touched.
    pub fn evaluate(
        &mut self,
        source: &dyn DataSource,
        steps: Option<usize>,
    ) -> Result<(f64, Vec<f64>)> {
        {
            let mut ctx = self.ctx.borrow_mut();
            ctx.is_train = false;
            ctx.model.eval();
        }
        self.run_one_epoch(source, steps)?;
        let ctx = self.ctx.borrow();
        let metrics = ctx.metric_meters.iter().map(|m| m.avg()).collect();
        Ok((ctx.loss_meter.avg(), metrics))
    }

    fn run_one_epoch(&mut self, source: &dyn DataSource, steps: Option<usize>) -> Result<()> {
        let (ep_size, is_train, pb) = {
            let mut ctx = self.ctx.borrow_mut();
            ctx.reset_meters();
            let ep_size = steps
                .or_else(|| source.len())
                .ok_or(FitError::UnknownEpochSize)?;
            ctx.ep_size = ep_size;
            (ep_size, ctx.is_train, progress_bar(&ctx))
        };

        let _grad_mode = grad::set_enabled(is_train);
        for (step, batch) in source.batches().take(ep_size).enumerate() {
            let batch = batch?;
            {
                let mut ctx = self.ctx.borrow_mut();
                ctx.timer.data_ready();
                ctx.step = step;
            }
            self.callbacks.on_batch_begin()?;
            self.make_step(batch)?;
            {
                let mut ctx = self.ctx.borrow_mut();
                ctx.timer.batch_done();
                pb.inc(1);
                if ctx.verbose {
                    pb.set_message(progress_message(&ctx));
                }
                if self.log_every_n_steps > 0 && (step + 1) % self.log_every_n_steps == 0 {
                    tracing::debug!(
                        epoch = ctx.epoch,
                        step,
                        is_train,
                        loss = ctx.loss_meter.avg_smooth(),
                        "step"
                    );
                }
            }
            self.callbacks.on_batch_end()?;
        }
        pb.finish();
        Ok(())
    }

    fn make_step(&mut self, batch: Batch) -> Result<()> {
        let mut guard = self.ctx.borrow_mut();
        let ctx = &mut *guard;

        ctx.input = Some(batch.clone());
        let mut output = ctx.model.forward(&batch.input)?;
        if !grad::is_enabled() {
            output = output.detach();
        }
        ctx.output = Some(output.clone());
        let loss = ctx.criterion.loss(&output, &batch.target)?;

        if ctx.is_train {
            ctx.optimizer.zero_grad()?;
            let scaled = ScaledLoss::begin(ctx.scaler.as_mut(), &loss, ctx.optimizer.vars())?;
            if let Some(grads) = scaled.backward()? {
                ctx.optimizer.step(&grads)?;
            }
            ctx.device.synchronize()?;
        }

        ctx.loss_meter.update(host_scalar(&loss, "loss")?);
        for (metric, meter) in ctx.metrics.iter().zip(ctx.metric_meters.iter_mut()) {
            let value = metric.compute(&output, &batch.target)?;
            meter.update(host_scalar(&value, metric.name())?);
        }
        Ok(())
    }
}

fn host_scalar(t: &Tensor, what: &str) -> Result<f64> {
    if t.elem_count() != 1 {
        return Err(FitError::NonScalar {
            what: what.to_string(),
            shape: t.shape().clone(),
        });
    }
    let values = t.flatten_all()?.to_dtype(DType::F64)?.to_vec1::<f64>()?;
    Ok(values[0])
}

fn progress_bar(ctx: &RunContext) -> ProgressBar {
    if !ctx.verbose {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(ctx.ep_size as u64);
    let style = ProgressStyle::with_template(
        "{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    let phase = if ctx.is_train { "Training" } else { "Validating" };
    pb.set_prefix(format!("Epoch {:2}/{}. {phase}", ctx.epoch, ctx.num_epochs));
    pb
}

fn progress_message(ctx: &RunContext) -> String {
    let mut msg = format!("Loss {:.4}", ctx.loss_meter.avg_smooth());
    for m in &ctx.metric_meters {
        let _ = write!(msg, " {} {:.3}", m.name(), m.avg_smooth());
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FnMetric;
    use crate::optim::CandleOptimizer;
    use candle::Device;
    use candle_nn::SGD;

    struct Identity;

    impl Model for Identity {
        fn forward(&self, xs: &Tensor) -> candle::Result<Tensor> {
            Ok(xs.clone())
        }
    }

    fn runner(verbose: bool) -> candle::Result<Runner> {
        let optimizer = CandleOptimizer::<SGD>::new(vec![], 0.1)?;
        let mae = |o: &Tensor, t: &Tensor| o.sub(t)?.abs()?.mean_all();
        let runner = Runner::builder(Identity, optimizer, candle_nn::loss::mse)
            .metric(FnMetric::new("mae", mae))
            .config(RunnerConfig::new().device(Device::Cpu).verbose(verbose))
            .build();
        Ok(runner)
    }

    #[test]
    fn progress_message_shows_smoothed_loss_and_metrics() -> candle::Result<()> {
        let runner = runner(true)?;
        {
            let mut ctx = runner.ctx.borrow_mut();
            ctx.loss_meter.update(1.23451);
            ctx.metric_meters[0].update(0.12345);
        }
        assert_eq!(progress_message(&runner.context()), "Loss 1.2345 mae 0.123");
        Ok(())
    }

    #[test]
    fn progress_bar_tracks_the_epoch() -> candle::Result<()> {
        let runner = runner(true)?;
        {
            let mut ctx = runner.ctx.borrow_mut();
            ctx.epoch = 2;
            ctx.num_epochs = 5;
            ctx.ep_size = 7;
            ctx.is_train = false;
        }
        let pb = progress_bar(&runner.context());
        assert_eq!(pb.length(), Some(7));
        assert_eq!(pb.prefix(), "Epoch  2/5. Validating");
        Ok(())
    }

    #[test]
    fn quiet_runner_hides_the_bar() -> candle::Result<()> {
        let runner = runner(false)?;
        assert!(progress_bar(&runner.context()).is_hidden());
        Ok(())
    }
}
