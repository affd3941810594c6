//! Batch sources feeding the statistics pass.
//!
//! A [`Sample`] maps a key (`real_imgs`, `metos`, ...) to one array. A
//! [`Batch`] has the same layout with a leading batch axis on every array.

use async_trait::async_trait;
use ndarray::{ArrayD, ArrayViewD, Axis};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::MlError;

pub type Sample = BTreeMap<String, ArrayD<f32>>;
pub type Batch = BTreeMap<String, ArrayD<f32>>;

/// Number of items along the leading axis of a batch.
pub fn batch_len(batch: &Batch) -> usize {
    batch
        .values()
        .next()
        .and_then(|v| v.shape().first().copied())
        .unwrap_or(0)
}

/// Anything that yields batches one at a time.
#[async_trait]
pub trait BatchSource: Send {
    /// Total number of batches, if the source knows it up front.
    fn num_batches(&self) -> Option<usize>;

    /// Next batch, or `None` once the source is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Batch>, MlError>;
}

// ---------------------------------------------------------------------------
// InMemorySource
// ---------------------------------------------------------------------------

/// Batches held in memory, served in order.
#[derive(Debug, Default)]
pub struct InMemorySource {
    batches: VecDeque<Batch>,
    total: usize,
}

impl InMemorySource {
    pub fn new(batches: Vec<Batch>) -> Self {
        let total = batches.len();
        Self {
            batches: batches.into(),
            total,
        }
    }

    /// Group samples into batches of `batch_size`, stacking each key along a
    /// new leading axis. The last batch may be shorter.
    pub fn from_samples(samples: &[Sample], batch_size: usize) -> Result<Self, MlError> {
        if batch_size == 0 {
            return Err(MlError::invalid_input("batch_size must be at least 1"));
        }
        let batches = samples
            .chunks(batch_size)
            .map(stack_samples)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(batches))
    }
}

#[async_trait]
impl BatchSource for InMemorySource {
    fn num_batches(&self) -> Option<usize> {
        Some(self.total)
    }

    async fn next_batch(&mut self) -> Result<Option<Batch>, MlError> {
        Ok(self.batches.pop_front())
    }
}

fn stack_samples(samples: &[Sample]) -> Result<Batch, MlError> {
    let Some(first) = samples.first() else {
        return Ok(Batch::new());
    };
    let mut batch = Batch::new();
    for key in first.keys() {
        let views = samples
            .iter()
            .map(|s| {
                s.get(key)
                    .map(|a| a.view())
                    .ok_or_else(|| MlError::dataset(format!("sample is missing key '{key}'")))
            })
            .collect::<Result<Vec<ArrayViewD<'_, f32>>, _>>()?;
        let stacked = ndarray::stack(Axis(0), &views)
            .map_err(|e| MlError::shape(format!("cannot stack '{key}': {e}")))?;
        batch.insert(key.clone(), stacked);
    }
    Ok(batch)
}

// ---------------------------------------------------------------------------
// ChannelSource
// ---------------------------------------------------------------------------

/// Sending half handed to producer tasks.
pub type BatchSender = mpsc::Sender<Result<Batch, MlError>>;

/// Merges batches from any number of producers into one sequence.
///
/// The source ends once every [`BatchSender`] has been dropped. Batch order
/// across producers is whatever the channel delivers.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Batch, MlError>>,
    expected: Option<usize>,
}

impl ChannelSource {
    pub fn channel(capacity: usize, expected: Option<usize>) -> (BatchSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx, expected })
    }

    /// Spread `batches` round-robin over `workers` tasks that all feed one
    /// source. Must be called from within a tokio runtime.
    pub fn spawn_workers(batches: Vec<Batch>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let total = batches.len();
        let (tx, source) = Self::channel(capacity, Some(total));

        let mut shards: Vec<Vec<Batch>> = (0..workers).map(|_| Vec::new()).collect();
        for (i, batch) in batches.into_iter().enumerate() {
            shards[i % workers].push(batch);
        }

        for (worker, shard) in shards.into_iter().enumerate() {
            let tx = tx.clone();
            tokio::spawn(async move {
                for batch in shard {
                    if tx.send(Ok(batch)).await.is_err() {
                        debug!(worker, "Consumer went away, stopping");
                        return;
                    }
                }
            });
        }
        source
    }
}

#[async_trait]
impl BatchSource for ChannelSource {
    fn num_batches(&self) -> Option<usize> {
        self.expected
    }

    async fn next_batch(&mut self) -> Result<Option<Batch>, MlError> {
        match self.rx.recv().await {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
