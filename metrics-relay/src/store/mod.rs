//! Aggregation stores.
//!
//! A store maps metric names to their current value, one mapping per kind. Gauge updates
//! overwrite, counter updates accumulate. [`MemoryStore`] keeps both mappings behind a single
//! reader/writer lock; [`SqliteStore`] persists them and relies on transactions for batch
//! atomicity.
use std::collections::HashMap;

use crate::{
    common::StoreError,
    metric::{Metric, MetricValue},
};

mod memory;
pub use self::memory::MemoryStore;

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub use self::sqlite::SqliteStore;

/// A point-in-time copy of every stored metric.
///
/// The snapshot owns its maps. Changing them has no effect on the store it came from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Gauges, by name.
    pub gauges: HashMap<String, f64>,
    /// Counters, by name.
    pub counters: HashMap<String, i64>,
}

/// Concurrent metric aggregation storage.
///
/// Reads of an absent name return `Ok(None)`. Write errors only occur on durable backends.
/// Counter arithmetic wraps on overflow in every implementation.
pub trait Store: Send + Sync {
    /// Overwrites the value of a gauge, creating it if needed.
    fn update_gauge(&self, name: &str, value: f64) -> Result<(), StoreError>;

    /// Adds `delta` to a counter, starting from zero if it does not exist yet.
    fn update_counter(&self, name: &str, delta: i64) -> Result<(), StoreError>;

    /// Applies a single metric and returns the value it merged into.
    ///
    /// The returned value reflects this update and nothing applied after it.
    fn update(&self, metric: &Metric) -> Result<MetricValue, StoreError>;

    /// Applies every metric in order.
    ///
    /// Durable implementations apply the whole batch or none of it.
    fn batch_update(&self, metrics: &[Metric]) -> Result<(), StoreError>;

    /// Gets the current value of a gauge.
    fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError>;

    /// Gets the current value of a counter.
    fn counter(&self, name: &str) -> Result<Option<i64>, StoreError>;

    /// Copies out every gauge and counter.
    fn snapshot(&self) -> Result<Snapshot, StoreError>;

    /// Checks that the store is reachable.
    fn ping(&self) -> Result<(), StoreError>;
}
