//! Data sources: restartable producers of [`Batch`]es.

use crate::error::Result;
use crate::module::Batch;
use candle::Tensor;
use rand::seq::SliceRandom;

/// A finite, restartable sequence of batches.
///
/// Every call to [`batches`](Self::batches) starts a new pass. The runner
/// blocks on the iterator and never looks behind it, so implementations are
/// free to prefetch.
pub trait DataSource {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;

    /// Number of batches in one pass, when known up front.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Samples per batch, when known.
    fn batch_size(&self) -> Option<usize> {
        None
    }
}

impl DataSource for [Batch] {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }

    fn len(&self) -> Option<usize> {
        Some(<[Batch]>::len(self))
    }

    fn batch_size(&self) -> Option<usize> {
        self.first().and_then(|b| b.input.dims().first().copied())
    }
}

impl DataSource for Vec<Batch> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        self.as_slice().batches()
    }

    fn len(&self) -> Option<usize> {
        DataSource::len(self.as_slice())
    }

    fn batch_size(&self) -> Option<usize> {
        self.as_slice().batch_size()
    }
}

/// Source backed by a closure that opens a new iterator for every pass.
///
/// Has no length unless one is supplied with [`with_len`](Self::with_len).
pub struct IterSource<F> {
    open: F,
    len: Option<usize>,
    batch_size: Option<usize>,
}

impl<F> IterSource<F> {
    pub fn new(open: F) -> Self {
        Self {
            open,
            len: None,
            batch_size: None,
        }
    }

    pub fn with_len(mut self, len: usize) -> Self {
        self.len = Some(len);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl<F, I> DataSource for IterSource<F>
where
    F: Fn() -> I,
    I: IntoIterator<Item = Result<Batch>>,
    I::IntoIter: 'static,
{
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new((self.open)().into_iter())
    }

    fn len(&self) -> Option<usize> {
        self.len
    }

    fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }
}

/// Splits in-memory input and target tensors along dim 0 into batches.
///
/// The last batch is shorter when the sample count is not a multiple of the
/// batch size, unless [`drop_last`](Self::drop_last) is set.
pub struct TensorBatches {
    inputs: Tensor,
    targets: Tensor,
    num_samples: usize,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
}

impl TensorBatches {
    pub fn new(inputs: Tensor, targets: Tensor, batch_size: usize) -> Result<Self> {
        let num_samples = inputs.dim(0)?;
        let num_targets = targets.dim(0)?;
        if num_samples != num_targets {
            return Err(candle::Error::Msg(format!(
                "inputs have {num_samples} samples but targets have {num_targets}"
            ))
            .into());
        }
        if batch_size == 0 {
            return Err(candle::Error::Msg("batch size must be at least 1".to_string()).into());
        }
        Ok(Self {
            inputs,
            targets,
            num_samples,
            batch_size,
            shuffle: false,
            drop_last: false,
        })
    }

    /// Draw a new sample order at the start of every pass.
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    fn num_batches(&self) -> usize {
        if self.drop_last {
            self.num_samples / self.batch_size
        } else {
            self.num_samples.div_ceil(self.batch_size)
        }
    }

    fn batch_bounds(&self, idx: usize) -> (usize, usize) {
        let start = idx * self.batch_size;
        (start, (start + self.batch_size).min(self.num_samples))
    }
}

/// Random permutation of `0..n` as `index_select` ids.
fn shuffled_order(n: usize) -> Result<Vec<u32>> {
    let n = u32::try_from(n).map_err(|_| {
        candle::Error::Msg(format!("cannot shuffle {n} samples, at most {} are indexable", u32::MAX))
    })?;
    let mut order: Vec<u32> = (0..n).collect();
    order.shuffle(&mut rand::rng());
    Ok(order)
}

impl DataSource for TensorBatches {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        let order = if self.shuffle {
            match shuffled_order(self.num_samples) {
                Ok(order) => Some(order),
                Err(e) => return Box::new(std::iter::once(Err::<Batch, _>(e))),
            }
        } else {
            None
        };

        Box::new((0..self.num_batches()).map(move |idx| -> Result<Batch> {
            let (start, end) = self.batch_bounds(idx);
            let batch = match &order {
                Some(order) => {
                    let ids = Tensor::new(&order[start..end], self.inputs.device())?;
                    Batch::new(
                        self.inputs.index_select(&ids, 0)?,
                        self.targets.index_select(&ids.to_device(self.targets.device())?, 0)?,
                    )
                }
                None => Batch::new(
                    self.inputs.narrow(0, start, end - start)?,
                    self.targets.narrow(0, start, end - start)?,
                ),
            };
            Ok(batch)
        }))
    }

    fn len(&self) -> Option<usize> {
        Some(self.num_batches())
    }

    fn batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle::Device;

    fn samples(n: usize) -> Result<(Tensor, Tensor)> {
        let xs = Tensor::arange(0f32, n as f32, &Device::Cpu)?.reshape((n, 1))?;
        let ys = xs.affine(2.0, 0.0)?;
        Ok((xs, ys))
    }

    #[test]
    fn tensor_batches_keep_partial_batch() -> Result<()> {
        let (xs, ys) = samples(10)?;
        let source = TensorBatches::new(xs, ys, 4)?;
        assert_eq!(source.len(), Some(3));
        let sizes: Vec<usize> = source
            .batches()
            .map(|b| b.and_then(|b| Ok(b.input.dim(0)?)))
            .collect::<Result<_>>()?;
        assert_eq!(sizes, vec![4, 4, 2]);
        Ok(())
    }

    #[test]
    fn tensor_batches_drop_last() -> Result<()> {
        let (xs, ys) = samples(10)?;
        let source = TensorBatches::new(xs, ys, 4)?.drop_last(true);
        assert_eq!(source.len(), Some(2));
        assert_eq!(source.batches().count(), 2);
        Ok(())
    }

    #[test]
    fn shuffled_batches_keep_pairs_aligned() -> Result<()> {
        let (xs, ys) = samples(9)?;
        let source = TensorBatches::new(xs, ys, 3)?.shuffle(true);
        let mut seen = Vec::new();
        for batch in source.batches() {
            let batch = batch?;
            let x = batch.input.flatten_all()?.to_vec1::<f32>()?;
            let y = batch.target.flatten_all()?.to_vec1::<f32>()?;
            for (x, y) in x.iter().zip(&y) {
                assert_eq!(*y, 2.0 * x);
            }
            seen.extend(x);
        }
        seen.sort_by(f32::total_cmp);
        assert_eq!(seen, (0..9).map(|v| v as f32).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn shuffled_order_is_a_permutation() -> Result<()> {
        let mut order = shuffled_order(7)?;
        order.sort_unstable();
        assert_eq!(order, (0..7).collect::<Vec<u32>>());
        Ok(())
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn shuffled_order_rejects_unindexable_counts() {
        let err = shuffled_order(u32::MAX as usize + 1).unwrap_err();
        assert!(err.to_string().contains("cannot shuffle"), "{err}");
    }

    #[test]
    fn mismatched_lengths_are_rejected() -> Result<()> {
        let (xs, _) = samples(4)?;
        let (_, ys) = samples(5)?;
        assert!(TensorBatches::new(xs, ys, 2).is_err());
        Ok(())
    }

    #[test]
    fn vec_source_reports_len_and_batch_size() -> Result<()> {
        let (xs, ys) = samples(6)?;
        let batches = vec![Batch::new(xs.narrow(0, 0, 3)?, ys.narrow(0, 0, 3)?); 2];
        assert_eq!(DataSource::len(&batches), Some(2));
        assert_eq!(batches.batch_size(), Some(3));
        Ok(())
    }

    #[test]
    fn iter_source_is_restartable_and_unsized() -> Result<()> {
        let (xs, ys) = samples(2)?;
        let batch = Batch::new(xs, ys);
        let source = IterSource::new(move || {
            (0..3)
                .map(|_| -> Result<Batch> { Ok(batch.clone()) })
                .collect::<Vec<_>>()
        });
        assert_eq!(source.len(), None);
        assert_eq!(source.batches().count(), 3);
        assert_eq!(source.batches().count(), 3);
        Ok(())
    }
}
