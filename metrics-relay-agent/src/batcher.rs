use std::time::Duration;

use metrics_relay::{Batch, Metric};
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a producer does when the queue is full.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Backpressure {
    /// Wait until there is room. No metric is ever dropped.
    #[default]
    Block,

    /// Drop the metric and return immediately.
    Drop,
}

/// Errors returned when a metric could not be queued.
#[derive(Debug, Error)]
pub enum PushError {
    /// The queue was full and the backpressure mode is [`Backpressure::Drop`].
    #[error("queue is full, metric '{}' dropped", .0.name())]
    Full(Metric),

    /// The batcher has shut down.
    #[error("queue is closed, metric '{}' dropped", .0.name())]
    Closed(Metric),
}

/// Producer side of the metric queue.
#[derive(Clone, Debug)]
pub struct MetricQueue {
    tx: mpsc::Sender<Metric>,
    backpressure: Backpressure,
}

impl MetricQueue {
    /// Queues a single metric for batching.
    ///
    /// With [`Backpressure::Block`] this waits for room in the queue.
    ///
    /// # Errors
    ///
    /// Returns the metric back if the queue is full (in [`Backpressure::Drop`] mode) or closed.
    pub async fn push(&self, metric: Metric) -> Result<(), PushError> {
        match self.backpressure {
            Backpressure::Block => self.tx.send(metric).await.map_err(|e| PushError::Closed(e.0)),
            Backpressure::Drop => self.tx.try_send(metric).map_err(|e| match e {
                TrySendError::Full(m) => PushError::Full(m),
                TrySendError::Closed(m) => PushError::Closed(m),
            }),
        }
    }
}

/// Groups queued metrics into batches.
///
/// A batch starts with the first metric received and is sealed once it holds `max_batch_size`
/// metrics or `batch_timeout` has passed since it started, whichever comes first.
#[derive(Debug)]
pub struct Batcher {
    rx: mpsc::Receiver<Metric>,
    max_batch_size: usize,
    batch_timeout: Duration,
}

/// Creates a bounded metric queue and the batcher draining it.
pub fn queue(
    capacity: usize,
    backpressure: Backpressure,
    max_batch_size: usize,
    batch_timeout: Duration,
) -> (MetricQueue, Batcher) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        MetricQueue { tx, backpressure },
        Batcher { rx, max_batch_size: max_batch_size.max(1), batch_timeout },
    )
}

impl Batcher {
    /// Waits for the next batch.
    ///
    /// Returns `None` once `shutdown` is cancelled before a batch has started, or once every
    /// producer is gone and the queue is empty. If `shutdown` is cancelled while a batch is being
    /// filled, the partial batch is returned.
    pub async fn next_batch(&mut self, shutdown: &CancellationToken) -> Option<Batch> {
        let first = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            metric = self.rx.recv() => metric?,
        };

        let mut metrics = Vec::with_capacity(self.max_batch_size);
        metrics.push(first);

        let deadline = tokio::time::sleep_until(Instant::now() + self.batch_timeout);
        tokio::pin!(deadline);

        while metrics.len() < self.max_batch_size {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(metrics = metrics.len(), "Shutdown while filling batch, flushing it.");
                    break;
                }
                _ = &mut deadline => break,
                metric = self.rx.recv() => match metric {
                    Some(metric) => metrics.push(metric),
                    None => break,
                },
            }
        }

        Some(Batch::seal(metrics))
    }

    /// Closes the queue and returns how many metrics were still waiting in it.
    ///
    /// Producers blocked on a full queue are released with [`PushError::Closed`].
    pub fn close(mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
