//! Callback system for training hooks.

mod checkpoint;
mod logger;

pub use checkpoint::{ModelCheckpoint, Monitor};
pub use logger::ConsoleLogger;

use crate::context::ContextHandle;
use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

/// Lifecycle hooks. Every hook defaults to a no-op, so a callback implements
/// only the events it cares about.
///
/// A callback receives the run's [`ContextHandle`] once, through
/// [`set_context`](Self::set_context), before any hook fires, and reads or
/// writes run state through it.
pub trait Callback {
    fn set_context(&mut self, _ctx: ContextHandle) {}

    fn on_train_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_batch_begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_batch_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(&mut self) -> Result<()> {
        Ok(())
    }

    fn on_train_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ordered collection of callbacks; broadcasts each event in registration
/// order.
///
/// The first hook to fail stops the broadcast and its error is returned, so
/// callbacks registered after it do not see that event.
#[derive(Default)]
pub struct Callbacks {
    callbacks: Vec<Box<dyn Callback>>,
}

impl Callbacks {
    pub fn new(callbacks: Vec<Box<dyn Callback>>) -> Self {
        Self { callbacks }
    }

    pub fn set_context(&mut self, ctx: &ContextHandle) {
        for cb in &mut self.callbacks {
            cb.set_context(ctx.clone());
        }
    }

    fn broadcast(&mut self, hook: impl Fn(&mut dyn Callback) -> Result<()>) -> Result<()> {
        for cb in &mut self.callbacks {
            hook(cb.as_mut())?;
        }
        Ok(())
    }

    pub fn on_train_begin(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_train_begin())
    }

    pub fn on_epoch_begin(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_epoch_begin())
    }

    pub fn on_batch_begin(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_batch_begin())
    }

    pub fn on_batch_end(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_batch_end())
    }

    pub fn on_epoch_end(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_epoch_end())
    }

    pub fn on_train_end(&mut self) -> Result<()> {
        self.broadcast(|cb| cb.on_train_end())
    }
}
