use std::{ops::Deref, sync::Arc, time::Instant};

use crate::metric::Metric;

/// An ordered, immutable group of metrics sealed for delivery.
///
/// Cloning a batch is cheap: the metrics are shared, so a batch can be retried as a whole without
/// copying its contents.
#[derive(Clone, Debug)]
pub struct Batch {
    metrics: Arc<[Metric]>,
    sealed_at: Instant,
}

impl Batch {
    /// Seals the given metrics into a batch.
    pub fn seal(metrics: Vec<Metric>) -> Self {
        Self { metrics: metrics.into(), sealed_at: Instant::now() }
    }

    /// Returns the metrics in this batch, in the order they were collected.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Returns the instant at which this batch was sealed.
    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }
}

impl Deref for Batch {
    type Target = [Metric];

    fn deref(&self) -> &Self::Target {
        &self.metrics
    }
}
