use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use metrics::{counter, Counter};

use crate::retry::Delivery;

/// Agent telemetry.
///
/// Every event is emitted through the `metrics` facade, so an installed recorder picks them up,
/// and is also tallied locally so the agent can report totals when it stops.
#[derive(Clone)]
pub struct Telemetry {
    metrics_queued: Counter,
    metrics_dropped: Counter,
    metrics_discarded: Counter,
    batches_sent: Counter,
    batches_rejected: Counter,
    batches_exhausted: Counter,
    batches_lost: Counter,
    send_attempts: Counter,
    tallies: Arc<Tallies>,
}

#[derive(Default)]
struct Tallies {
    metrics_queued: AtomicU64,
    metrics_dropped: AtomicU64,
    metrics_discarded: AtomicU64,
    batches_sent: AtomicU64,
    batches_rejected: AtomicU64,
    batches_exhausted: AtomicU64,
    batches_lost: AtomicU64,
    send_attempts: AtomicU64,
}

/// Totals recorded by [`Telemetry`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TelemetrySnapshot {
    /// Metrics accepted by the queue.
    pub metrics_queued: u64,
    /// Metrics dropped because the queue was full.
    pub metrics_dropped: u64,
    /// Metrics still queued at shutdown and discarded.
    pub metrics_discarded: u64,
    /// Batches delivered.
    pub batches_sent: u64,
    /// Batches dropped after a permanent failure.
    pub batches_rejected: u64,
    /// Batches dropped after running out of attempts.
    pub batches_exhausted: u64,
    /// Batches aborted or never started because shutdown ran out of time.
    pub batches_lost: u64,
    /// Send attempts across all batches.
    pub send_attempts: u64,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new() -> Self {
        Self {
            metrics_queued: counter!("metrics_relay.agent.metrics_queued"),
            metrics_dropped: counter!("metrics_relay.agent.metrics_dropped"),
            metrics_discarded: counter!("metrics_relay.agent.metrics_discarded"),
            batches_sent: counter!("metrics_relay.agent.batches", "outcome" => "sent"),
            batches_rejected: counter!("metrics_relay.agent.batches", "outcome" => "rejected"),
            batches_exhausted: counter!("metrics_relay.agent.batches", "outcome" => "exhausted"),
            batches_lost: counter!("metrics_relay.agent.batches", "outcome" => "lost"),
            send_attempts: counter!("metrics_relay.agent.send_attempts"),
            tallies: Arc::default(),
        }
    }

    /// Tracks a metric accepted by the queue.
    pub fn track_metric_queued(&self) {
        self.metrics_queued.increment(1);
        self.tallies.metrics_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Tracks a metric dropped because the queue was full.
    pub fn track_metric_dropped(&self) {
        self.metrics_dropped.increment(1);
        self.tallies.metrics_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Tracks metrics left in the queue at shutdown.
    pub fn track_metrics_discarded(&self, count: usize) {
        self.metrics_discarded.increment(count as u64);
        self.tallies.metrics_discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Tracks the end of a batch delivery.
    pub fn track_delivery(&self, delivery: &Delivery) {
        let attempts = u64::from(delivery.attempts());
        self.send_attempts.increment(attempts);
        self.tallies.send_attempts.fetch_add(attempts, Ordering::Relaxed);

        let (counter, tally) = match delivery {
            Delivery::Delivered { .. } => (&self.batches_sent, &self.tallies.batches_sent),
            Delivery::Rejected { .. } => (&self.batches_rejected, &self.tallies.batches_rejected),
            Delivery::Exhausted { .. } => {
                (&self.batches_exhausted, &self.tallies.batches_exhausted)
            }
        };
        counter.increment(1);
        tally.fetch_add(1, Ordering::Relaxed);
    }

    /// Tracks batches lost at shutdown.
    pub fn track_batches_lost(&self, count: usize) {
        self.batches_lost.increment(count as u64);
        self.tallies.batches_lost.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns the totals recorded so far.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let t = &self.tallies;
        TelemetrySnapshot {
            metrics_queued: t.metrics_queued.load(Ordering::Relaxed),
            metrics_dropped: t.metrics_dropped.load(Ordering::Relaxed),
            metrics_discarded: t.metrics_discarded.load(Ordering::Relaxed),
            batches_sent: t.batches_sent.load(Ordering::Relaxed),
            batches_rejected: t.batches_rejected.load(Ordering::Relaxed),
            batches_exhausted: t.batches_exhausted.load(Ordering::Relaxed),
            batches_lost: t.batches_lost.load(Ordering::Relaxed),
            send_attempts: t.send_attempts.load(Ordering::Relaxed),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
