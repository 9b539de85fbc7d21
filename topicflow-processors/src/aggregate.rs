//! Windowed aggregation of metric observations.
//!
//! An [`Aggregator`] keeps one [`Bucket`] per entity, each bucket keeps one time bin per
//! period. The [`Flusher`] moves the acceptance window forward with the clock; bins that fall
//! behind it are emitted as derived [`MetricEvent`](crate::event::MetricEvent)s with a `count`
//! and, per metric, the [`Meter`] summary fields (`<metric>_<field>`).

pub mod aggregator;
pub mod bucket;
pub mod flusher;
pub mod meter;

pub use aggregator::Aggregator;
pub use bucket::{Borders, Bucket, BucketCounters, normalize};
pub use flusher::Flusher;
pub use meter::Meter;
