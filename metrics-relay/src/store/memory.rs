use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use crate::{
    common::StoreError,
    metric::{Metric, MetricValue},
    store::{Snapshot, Store},
};

#[derive(Default)]
struct Inner {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Inner {
    fn apply(&mut self, name: &str, value: MetricValue) -> MetricValue {
        match value {
            MetricValue::Gauge(v) => {
                if let Some(slot) = self.gauges.get_mut(name) {
                    *slot = v;
                } else {
                    self.gauges.insert(name.to_string(), v);
                }
                MetricValue::Gauge(v)
            }
            MetricValue::Counter(d) => {
                let merged = match self.counters.get_mut(name) {
                    Some(slot) => {
                        *slot = slot.wrapping_add(d);
                        *slot
                    }
                    None => {
                        self.counters.insert(name.to_string(), d);
                        d
                    }
                };
                MetricValue::Counter(merged)
            }
        }
    }
}

/// An in-memory metric store.
///
/// Both mappings live behind one reader/writer lock, so a batch is applied under a single write
/// acquisition and readers never observe it half-applied. Counter overflow wraps.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn update_gauge(&self, name: &str, value: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.apply(name, MetricValue::Gauge(value));
        Ok(())
    }

    fn update_counter(&self, name: &str, delta: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.apply(name, MetricValue::Counter(delta));
        Ok(())
    }

    fn update(&self, metric: &Metric) -> Result<MetricValue, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.apply(metric.name(), metric.value()))
    }

    fn batch_update(&self, metrics: &[Metric]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for metric in metrics {
            inner.apply(metric.name(), metric.value());
        }
        Ok(())
    }

    fn gauge(&self, name: &str) -> Result<Option<f64>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.gauges.get(name).copied())
    }

    fn counter(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.counters.get(name).copied())
    }

    fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(Snapshot { gauges: inner.gauges.clone(), counters: inner.counters.clone() })
    }

    fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
