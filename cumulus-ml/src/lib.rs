//! # cumulus-ml
//!
//! Dataset statistics and normalization for the clouds training pipeline.
//!
//! - [`source`]: the [`BatchSource`] trait plus in-memory and channel-backed
//!   sources
//! - [`stats`]: one streaming pass producing per-key mean and range
//! - [`rescale`]: the [`Rescale`] transform applying those statistics

pub mod error;
pub mod rescale;
pub mod source;
pub mod stats;

pub use error::MlError;
pub use rescale::Rescale;
pub use source::{Batch, BatchSource, ChannelSource, InMemorySource, Sample};
pub use stats::{DatasetStatistics, StatsCollector, StatsMode, StatsProgress};
