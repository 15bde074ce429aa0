//! Error type for fit/evaluate runs.

use candle::Shape;
use thiserror::Error;

/// Everything that can abort a [`Runner`](crate::Runner) call.
///
/// The driver never catches or retries: the first failure in a step, a data
/// source or a callback hook is returned unchanged to the caller of `fit` or
/// `evaluate`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FitError {
    /// The data source has no length and no explicit step count was given.
    #[error(
        "cannot determine the epoch size: pass an explicit step count or use a data source with a known length"
    )]
    UnknownEpochSize,

    /// A loss or metric produced more than one value.
    #[error("{what} must reduce to a single value, got shape {shape:?}")]
    NonScalar { what: String, shape: Shape },

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure raised by user code inside a callback hook.
    #[error("callback failed: {0}")]
    Callback(Box<dyn std::error::Error + Send + Sync>),
}

impl FitError {
    pub fn callback(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Callback(err.into())
    }
}

pub type Result<T> = std::result::Result<T, FitError>;
