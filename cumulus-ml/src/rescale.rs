//! Normalization transform built on [`DatasetStatistics`].

use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::error::MlError;
use crate::source::{BatchSource, Sample};
use crate::stats::{DatasetStatistics, StatsCollector, StatsMode};

/// `(x - mean) / range` per key, with non-finite results replaced by 0.
#[derive(Debug, Clone)]
pub struct Rescale {
    stats: DatasetStatistics,
}

impl Default for Rescale {
    fn default() -> Self {
        Self::identity()
    }
}

impl Rescale {
    /// Mean 0 and range 1 for every key.
    pub fn identity() -> Self {
        Self {
            stats: DatasetStatistics::identity(),
        }
    }

    pub fn from_statistics(stats: DatasetStatistics) -> Self {
        Self { stats }
    }

    /// Run a statistics pass over `source` and build the transform.
    pub async fn fit<S>(source: &mut S, mode: StatsMode) -> Result<Self, MlError>
    where
        S: BatchSource + ?Sized,
    {
        Self::fit_with(&StatsCollector::new(mode), source).await
    }

    pub async fn fit_with<S>(collector: &StatsCollector, source: &mut S) -> Result<Self, MlError>
    where
        S: BatchSource + ?Sized,
    {
        Ok(Self::from_statistics(collector.collect(source).await?))
    }

    pub fn mode(&self) -> StatsMode {
        self.stats.mode
    }

    pub fn statistics(&self) -> &DatasetStatistics {
        &self.stats
    }

    /// Normalize every key of `sample`, returning a new sample.
    ///
    /// Keys without statistics are passed through unchanged, except in
    /// [`StatsMode::Off`] where every key gets mean 0 / range 1.
    pub fn normalize(&self, sample: &Sample) -> Result<Sample, MlError> {
        sample
            .iter()
            .map(|(key, values)| Ok((key.clone(), self.normalize_key(key, values)?)))
            .collect()
    }

    fn normalize_key(&self, key: &str, values: &ArrayD<f32>) -> Result<ArrayD<f32>, MlError> {
        if self.stats.mode == StatsMode::Off {
            return Ok(values.mapv(finite_or_zero));
        }
        let (Some(mean), Some(range)) = (self.stats.mean(key), self.stats.range(key)) else {
            debug!(key, "No statistics for key, passing through");
            return Ok(values.clone());
        };

        let (mean, range) = match self.stats.mode {
            StatsMode::PerChannel => (
                expand_channels(values, mean, key)?,
                expand_channels(values, range, key)?,
            ),
            _ => (
                broadcast_to(values, mean, key)?,
                broadcast_to(values, range, key)?,
            ),
        };

        let mut out = values - &mean;
        out /= &range;
        out.mapv_inplace(finite_or_zero);
        Ok(out)
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() { v } else { 0.0 }
}

/// Broadcast sample-shaped statistics onto `values`, which may carry an extra
/// leading batch axis.
fn broadcast_to(
    values: &ArrayD<f32>,
    stat: &ArrayD<f32>,
    key: &str,
) -> Result<ArrayD<f32>, MlError> {
    stat.broadcast(values.raw_dim())
        .map(|v| v.to_owned())
        .ok_or_else(|| {
            MlError::shape(format!(
                "statistics for '{key}' have shape {:?}, which does not fit sample shape {:?}",
                stat.shape(),
                values.shape()
            ))
        })
}

/// Repeat a per-channel vector across the spatial axes of a `(C, H, W)` or
/// `(N, C, H, W)` array.
fn expand_channels(
    values: &ArrayD<f32>,
    channels: &ArrayD<f32>,
    key: &str,
) -> Result<ArrayD<f32>, MlError> {
    let c = channels.len();
    let (view_shape, axis) = match values.ndim() {
        3 => (vec![c, 1, 1], 0),
        4 => (vec![1, c, 1, 1], 1),
        n => {
            return Err(MlError::shape(format!(
                "'{key}' should have 3 or 4 dimensions, not {n} ({:?})",
                values.shape()
            )));
        }
    };
    if values.shape()[axis] != c {
        return Err(MlError::shape(format!(
            "'{key}' has {} channels but statistics have {c}",
            values.shape()[axis]
        )));
    }
    let column = ArrayD::from_shape_vec(IxDyn(&view_shape), channels.iter().copied().collect())?;
    broadcast_to(values, &column, key)
}
