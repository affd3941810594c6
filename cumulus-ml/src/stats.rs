//! Streaming dataset statistics.
//!
//! One pass over a [`BatchSource`] yields a running mean and the elementwise
//! min/max for every key. `range = max - min` is derived once at the end.

use ndarray::{Array1, ArrayD, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::MlError;
use crate::source::{Batch, BatchSource, batch_len};

/// How statistics are gathered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsMode {
    /// No pass over the data: mean 0, range 1.
    Off,
    /// Reduce over the batch axis only; one value per element of a sample.
    #[default]
    On,
    /// Reduce over batch and spatial axes; one value per channel.
    PerChannel,
}

impl fmt::Display for StatsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsMode::Off => write!(f, "off"),
            StatsMode::On => write!(f, "on"),
            StatsMode::PerChannel => write!(f, "per_channel"),
        }
    }
}

impl FromStr for StatsMode {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(StatsMode::Off),
            "on" => Ok(StatsMode::On),
            "per_channel" => Ok(StatsMode::PerChannel),
            other => Err(MlError::invalid_input(format!(
                "unknown stats mode '{other}' (expected off, on or per_channel)"
            ))),
        }
    }
}

/// Per-key mean and range, immutable once computed.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStatistics {
    pub mode: StatsMode,
    pub means: BTreeMap<String, ArrayD<f32>>,
    pub ranges: BTreeMap<String, ArrayD<f32>>,
    /// Number of samples the statistics were computed over.
    pub samples: usize,
}

impl DatasetStatistics {
    /// Statistics for [`StatsMode::Off`].
    pub fn identity() -> Self {
        Self {
            mode: StatsMode::Off,
            means: BTreeMap::new(),
            ranges: BTreeMap::new(),
            samples: 0,
        }
    }

    pub fn mean(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.means.get(key)
    }

    pub fn range(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.ranges.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.means.keys().map(String::as_str)
    }
}

/// Progress of a statistics pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsProgress {
    pub batches: usize,
    pub total: Option<usize>,
    /// Completion percentage (0.0 to 100.0), when the total is known.
    pub percent: Option<f32>,
}

#[derive(Debug)]
struct Accumulator {
    mean: ArrayD<f32>,
    min: ArrayD<f32>,
    max: ArrayD<f32>,
}

/// Reduced view of one key of one batch.
struct Reduced {
    sum: ArrayD<f32>,
    min: ArrayD<f32>,
    max: ArrayD<f32>,
    /// Elements folded into each `sum` entry per sample.
    per_sample: usize,
}

/// Computes [`DatasetStatistics`] from a batch source.
#[derive(Debug, Clone, Default)]
pub struct StatsCollector {
    mode: StatsMode,
    progress_tx: Option<mpsc::UnboundedSender<StatsProgress>>,
}

impl StatsCollector {
    pub fn new(mode: StatsMode) -> Self {
        Self {
            mode,
            progress_tx: None,
        }
    }

    /// Also report progress through `tx` after every batch.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<StatsProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    /// Consume `source` and compute statistics. In [`StatsMode::Off`] the
    /// source is left untouched.
    pub async fn collect<S>(&self, source: &mut S) -> Result<DatasetStatistics, MlError>
    where
        S: BatchSource + ?Sized,
    {
        if self.mode == StatsMode::Off {
            return Ok(DatasetStatistics::identity());
        }

        let total = source.num_batches();
        let mut accumulators: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut seen = 0usize;
        let mut batches = 0usize;

        while let Some(batch) = source.next_batch().await? {
            let m = batch_len(&batch);
            if m == 0 {
                debug!(batch = batches, "Skipping empty batch");
            } else {
                self.update(&mut accumulators, &batch, seen, m)?;
                seen += m;
            }
            batches += 1;
            self.report(batches, total);
        }

        if seen == 0 {
            return Err(MlError::dataset(
                "cannot compute statistics over an empty dataset",
            ));
        }

        let mut means = BTreeMap::new();
        let mut ranges = BTreeMap::new();
        for (key, acc) in accumulators {
            ranges.insert(key.clone(), &acc.max - &acc.min);
            means.insert(key, acc.mean);
        }
        info!(
            mode = %self.mode,
            samples = seen,
            batches,
            keys = means.len(),
            "Dataset statistics ready"
        );

        Ok(DatasetStatistics {
            mode: self.mode,
            means,
            ranges,
            samples: seen,
        })
    }

    fn update(
        &self,
        accumulators: &mut BTreeMap<String, Accumulator>,
        batch: &Batch,
        n: usize,
        m: usize,
    ) -> Result<(), MlError> {
        let first = n == 0;
        for (key, values) in batch {
            if values.shape().first().copied() != Some(m) {
                return Err(MlError::shape(format!(
                    "'{key}' has {:?} items along the batch axis, expected {m}",
                    values.shape().first()
                )));
            }
            let reduced = self.reduce(key, values)?;
            let total = (n + m) as f32;

            match accumulators.get_mut(key) {
                Some(acc) => {
                    if acc.mean.shape() != reduced.sum.shape() {
                        return Err(MlError::shape(format!(
                            "'{key}' changed shape between batches: {:?} then {:?}",
                            acc.mean.shape(),
                            reduced.sum.shape()
                        )));
                    }
                    let keep = n as f32 / total;
                    let scale = total * reduced.per_sample as f32;
                    acc.mean.zip_mut_with(&reduced.sum, |mean, &sum| {
                        *mean = *mean * keep + sum / scale
                    });
                    acc.min.zip_mut_with(&reduced.min, |a, &b| *a = a.min(b));
                    acc.max.zip_mut_with(&reduced.max, |a, &b| *a = a.max(b));
                }
                None if first => {
                    let scale = total * reduced.per_sample as f32;
                    accumulators.insert(
                        key.clone(),
                        Accumulator {
                            mean: reduced.sum.mapv(|s| s / scale),
                            min: reduced.min,
                            max: reduced.max,
                        },
                    );
                }
                None => {
                    return Err(MlError::stats(format!(
                        "key '{key}' is missing from the first batch"
                    )));
                }
            }
        }
        if let Some(missing) = accumulators.keys().find(|k| !batch.contains_key(*k)) {
            return Err(MlError::stats(format!(
                "key '{missing}' is missing from a batch"
            )));
        }
        Ok(())
    }

    fn reduce(&self, key: &str, values: &ArrayD<f32>) -> Result<Reduced, MlError> {
        match self.mode {
            StatsMode::PerChannel => {
                if values.ndim() != 4 {
                    return Err(MlError::shape(format!(
                        "per_channel statistics need (N, C, H, W) batches, '{key}' has shape {:?}",
                        values.shape()
                    )));
                }
                let per_sample = values.shape()[2] * values.shape()[3];
                let channels = values.axis_iter(Axis(1));
                let mut sum = Vec::with_capacity(channels.len());
                let mut min = Vec::with_capacity(channels.len());
                let mut max = Vec::with_capacity(channels.len());
                for channel in channels {
                    sum.push(channel.sum());
                    min.push(channel.fold(f32::INFINITY, |a, &b| a.min(b)));
                    max.push(channel.fold(f32::NEG_INFINITY, |a, &b| a.max(b)));
                }
                Ok(Reduced {
                    sum: Array1::from(sum).into_dyn(),
                    min: Array1::from(min).into_dyn(),
                    max: Array1::from(max).into_dyn(),
                    per_sample,
                })
            }
            _ => {
                if values.ndim() == 0 {
                    return Err(MlError::shape(format!("'{key}' has no batch axis")));
                }
                Ok(Reduced {
                    sum: values.sum_axis(Axis(0)),
                    min: values.fold_axis(Axis(0), f32::INFINITY, |a, &b| a.min(b)),
                    max: values.fold_axis(Axis(0), f32::NEG_INFINITY, |a, &b| a.max(b)),
                    per_sample: 1,
                })
            }
        }
    }

    fn report(&self, batches: usize, total: Option<usize>) {
        let percent = total
            .filter(|&t| t > 0)
            .map(|t| (batches as f32 / t as f32 * 100.0).min(100.0));
        match percent {
            Some(p) => debug!(batches, percent = p, "Statistics progress"),
            None => debug!(batches, "Statistics progress"),
        }
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(StatsProgress {
                batches,
                total,
                percent,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use ndarray::{Array, IxDyn, array};
    use pretty_assertions::assert_eq;

    fn batch_of(key: &str, values: ArrayD<f32>) -> Batch {
        let mut b = Batch::new();
        b.insert(key.into(), values);
        b
    }

    #[test]
    fn test_mode_parse_and_display() {
        for mode in [StatsMode::Off, StatsMode::On, StatsMode::PerChannel] {
            assert_eq!(mode.to_string().parse::<StatsMode>().unwrap(), mode);
        }
        assert!("global".parse::<StatsMode>().is_err());
        assert_eq!(StatsMode::default(), StatsMode::On);
    }

    #[tokio::test]
    async fn test_on_mode_matches_full_mean_with_uneven_batches() {
        // 3 samples of shape (2,), split 2 + 1.
        let first = array![[1.0f32, 10.0], [3.0, 20.0]].into_dyn();
        let second = array![[5.0f32, 60.0]].into_dyn();
        let mut source =
            InMemorySource::new(vec![batch_of("x", first), batch_of("x", second)]);

        let stats = StatsCollector::new(StatsMode::On)
            .collect(&mut source)
            .await
            .unwrap();
        let mean = stats.mean("x").unwrap();
        assert!((mean[[0]] - 3.0).abs() < 1e-5);
        assert!((mean[[1]] - 30.0).abs() < 1e-4);
        assert_eq!(stats.range("x").unwrap(), &array![4.0f32, 50.0].into_dyn());
        assert_eq!(stats.samples, 3);
    }

    #[tokio::test]
    async fn test_per_channel_reduces_spatial_axes() {
        // (N=2, C=2, H=1, W=2)
        let values = Array::from_shape_vec(
            IxDyn(&[2, 2, 1, 2]),
            vec![0.0, 2.0, 5.0, 5.0, 4.0, 6.0, 5.0, 5.0],
        )
        .unwrap();
        let mut source = InMemorySource::new(vec![batch_of("metos", values)]);

        let stats = StatsCollector::new(StatsMode::PerChannel)
            .collect(&mut source)
            .await
            .unwrap();
        assert_eq!(stats.mean("metos").unwrap(), &array![3.0f32, 5.0].into_dyn());
        assert_eq!(stats.range("metos").unwrap(), &array![6.0f32, 0.0].into_dyn());
        assert_eq!(stats.mean("metos").unwrap().shape(), &[2]);
    }

    #[tokio::test]
    async fn test_per_channel_rejects_non_image_batches() {
        let mut source = InMemorySource::new(vec![batch_of("x", Array::zeros(IxDyn(&[2, 3])))]);
        let err = StatsCollector::new(StatsMode::PerChannel)
            .collect(&mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Shape(_)));
    }

    #[tokio::test]
    async fn test_empty_dataset_is_error() {
        let mut source = InMemorySource::new(Vec::new());
        let err = StatsCollector::new(StatsMode::On)
            .collect(&mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Dataset(_)));
    }

    #[tokio::test]
    async fn test_off_mode_does_not_read_source() {
        let mut source = InMemorySource::new(vec![batch_of("x", Array::zeros(IxDyn(&[1, 1])))]);
        let stats = StatsCollector::new(StatsMode::Off)
            .collect(&mut source)
            .await
            .unwrap();
        assert_eq!(stats, DatasetStatistics::identity());
        assert!(source.next_batch().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_error_aborts_the_pass() {
        let (tx, mut source) = crate::source::ChannelSource::channel(4, Some(3));
        tx.send(Ok(batch_of("x", Array::from_elem(IxDyn(&[2, 2]), 1.0))))
            .await
            .unwrap();
        tx.send(Err(MlError::dataset("truncated file")))
            .await
            .unwrap();
        tx.send(Ok(batch_of("x", Array::from_elem(IxDyn(&[2, 2]), 3.0))))
            .await
            .unwrap();
        drop(tx);

        let result = StatsCollector::new(StatsMode::On).collect(&mut source).await;
        match result {
            Err(MlError::Dataset(msg)) => assert_eq!(msg, "truncated file"),
            other => panic!("expected a dataset error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shape_change_between_batches_is_error() {
        let mut source = InMemorySource::new(vec![
            batch_of("x", Array::zeros(IxDyn(&[1, 2]))),
            batch_of("x", Array::zeros(IxDyn(&[1, 3]))),
        ]);
        let err = StatsCollector::new(StatsMode::On)
            .collect(&mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Shape(_)));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_100() {
        let batches = (0..4)
            .map(|i| batch_of("x", Array::from_elem(IxDyn(&[2, 1]), i as f32)))
            .collect();
        let mut source = InMemorySource::new(batches);
        let (tx, mut rx) = mpsc::unbounded_channel();

        StatsCollector::new(StatsMode::On)
            .with_progress(tx)
            .collect(&mut source)
            .await
            .unwrap();

        let mut percents = Vec::new();
        while let Ok(update) = rx.try_recv() {
            percents.push(update.percent.unwrap());
        }
        assert_eq!(percents, vec![25.0, 50.0, 75.0, 100.0]);
    }
}
