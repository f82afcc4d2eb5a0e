use std::{collections::HashMap, sync::Arc, time::Duration};

use metrics_relay::{Metric, MetricValue};
use tokio::{
    task::JoinHandle,
    time::{interval, interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    batcher::{Batcher, MetricQueue, PushError},
    dispatcher::Dispatcher,
    sampler::Sampler,
    telemetry::{Telemetry, TelemetrySnapshot},
    transport::Transport,
};

/// A configured agent, ready to run.
///
/// Created by [`AgentBuilder`](crate::AgentBuilder).
pub struct Agent {
    sampler: Arc<Sampler>,
    queue: MetricQueue,
    batcher: Batcher,
    dispatcher: Dispatcher<dyn Transport>,
    poll_interval: Duration,
    report_interval: Duration,
    telemetry: Telemetry,
}

impl Agent {
    pub(crate) fn new(
        sampler: Arc<Sampler>,
        queue: MetricQueue,
        batcher: Batcher,
        dispatcher: Dispatcher<dyn Transport>,
        poll_interval: Duration,
        report_interval: Duration,
        telemetry: Telemetry,
    ) -> Self {
        Self { sampler, queue, batcher, dispatcher, poll_interval, report_interval, telemetry }
    }

    /// Returns the sampler feeding this agent.
    pub fn sampler(&self) -> Arc<Sampler> {
        Arc::clone(&self.sampler)
    }

    /// Returns a handle to the agent's telemetry.
    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.clone()
    }

    /// Runs the agent until `shutdown` is cancelled.
    ///
    /// Polling, reporting and batching run concurrently. On shutdown the batch being filled is
    /// flushed, metrics still queued behind it are discarded, and in-flight deliveries get the
    /// configured grace period to finish.
    pub async fn run(self, shutdown: CancellationToken) -> TelemetrySnapshot {
        let Agent {
            sampler,
            queue,
            mut batcher,
            mut dispatcher,
            poll_interval,
            report_interval,
            telemetry,
        } = self;

        info!(?poll_interval, ?report_interval, "Agent started.");

        let poller = tokio::spawn(poll_loop(Arc::clone(&sampler), poll_interval, shutdown.clone()));
        let reporter = tokio::spawn(report_loop(
            sampler,
            queue,
            report_interval,
            telemetry.clone(),
            shutdown.clone(),
        ));

        let mut last = None;
        while let Some(batch) = batcher.next_batch(&shutdown).await {
            if shutdown.is_cancelled() {
                last = Some(batch);
                break;
            }

            tokio::select! {
                biased;
                () = dispatcher.dispatch(batch.clone()) => {}
                () = shutdown.cancelled() => {
                    last = Some(batch);
                    break;
                }
            }
        }

        let discarded = batcher.close();
        if discarded > 0 {
            warn!(discarded, "Discarding metrics still queued at shutdown.");
            telemetry.track_metrics_discarded(discarded);
        }

        dispatcher.shutdown(last).await;
        join_loop("poll", poller).await;
        join_loop("report", reporter).await;

        let totals = telemetry.snapshot();
        let batches_dropped =
            totals.batches_rejected + totals.batches_exhausted + totals.batches_lost;
        info!(
            batches_sent = totals.batches_sent,
            batches_dropped,
            metrics_discarded = totals.metrics_discarded,
            "Agent stopped."
        );
        totals
    }
}

async fn join_loop(name: &'static str, handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        error!(error = %e, task = name, "Agent task failed.");
    }
}

async fn poll_loop(sampler: Arc<Sampler>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // sysinfo reads procfs synchronously.
        let sampler = Arc::clone(&sampler);
        if let Err(e) = tokio::task::spawn_blocking(move || sampler.poll()).await {
            error!(error = %e, "Sampling failed.");
        }
    }
}

async fn report_loop(
    sampler: Arc<Sampler>,
    queue: MetricQueue,
    period: Duration,
    telemetry: Telemetry,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut deltas = CounterDeltas::default();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut dropped = 0;
        for (metric, total) in deltas.pending(sampler.metrics()) {
            let name = total.map(|_| metric.name().to_string());
            let pushed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                pushed = queue.push(metric) => pushed,
            };

            match pushed {
                Ok(()) => {
                    telemetry.track_metric_queued();
                    if let (Some(name), Some(total)) = (name, total) {
                        deltas.commit(name, total);
                    }
                }
                Err(PushError::Full(_)) => {
                    telemetry.track_metric_dropped();
                    dropped += 1;
                }
                Err(PushError::Closed(_)) => return,
            }
        }

        if dropped > 0 {
            warn!(dropped, "Metric queue full, dropped metrics.");
        } else {
            debug!("Queued latest readings.");
        }
    }
}

/// Turns the sampler's running counter totals into deltas since the last queued report.
#[derive(Default)]
struct CounterDeltas {
    reported: HashMap<String, i64>,
}

impl CounterDeltas {
    /// Returns the metrics to queue, each counter paired with the total it brings the server to.
    ///
    /// Counters that have not moved since the last committed report are skipped.
    fn pending(&self, metrics: Vec<Metric>) -> Vec<(Metric, Option<i64>)> {
        metrics
            .into_iter()
            .filter_map(|metric| match metric.value() {
                MetricValue::Gauge(_) => Some((metric, None)),
                MetricValue::Counter(total) => {
                    let previous = self.reported.get(metric.name()).copied().unwrap_or(0);
                    let delta = total.wrapping_sub(previous);
                    (delta != 0).then(|| {
                        let (name, _) = metric.into_parts();
                        (Metric::counter(name, delta), Some(total))
                    })
                }
            })
            .collect()
    }

    /// Records that the server has been sent everything up to `total` for `name`.
    fn commit(&mut self, name: String, total: i64) {
        self.reported.insert(name, total);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use metrics_relay::{Batch, Metric, MetricValue};
    use tokio_util::sync::CancellationToken;

    use super::CounterDeltas;
    use crate::{
        transport::{SendFuture, Transport},
        AgentBuilder,
    };

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<Batch>>,
    }

    impl Transport for RecordingTransport {
        fn send<'a>(&'a self, batch: &'a Batch) -> SendFuture<'a> {
            self.batches.lock().unwrap().push(batch.clone());
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn counter_deltas_since_last_commit() {
        let mut deltas = CounterDeltas::default();

        let first = deltas.pending(vec![Metric::gauge("g", 1.0), Metric::counter("PollCount", 3)]);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1], (Metric::counter("PollCount", 3), Some(3)));
        deltas.commit("PollCount".to_string(), 3);

        let second = deltas.pending(vec![Metric::counter("PollCount", 5)]);
        assert_eq!(second, vec![(Metric::counter("PollCount", 2), Some(5))]);

        // Not committed, so the next report still carries the full difference.
        let third = deltas.pending(vec![Metric::counter("PollCount", 8)]);
        assert_eq!(third, vec![(Metric::counter("PollCount", 5), Some(8))]);

        deltas.commit("PollCount".to_string(), 8);
        assert!(deltas.pending(vec![Metric::counter("PollCount", 8)]).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pipeline_delivers_batches() {
        let transport = Arc::new(RecordingTransport::default());
        let agent = AgentBuilder::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_report_interval(Duration::from_millis(100))
            .with_max_batch_size(5)
            .with_batch_timeout(Duration::from_millis(10))
            .with_rate_limit(2)
            .build_with_transport(Arc::clone(&transport))
            .unwrap();
        let sampler = agent.sampler();
        let telemetry = agent.telemetry();

        let shutdown = CancellationToken::new();
        let running = tokio::spawn(agent.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(550)).await;
        shutdown.cancel();
        let totals = running.await.unwrap();
        assert_eq!(telemetry.snapshot(), totals);

        let batches = transport.batches.lock().unwrap();
        assert!(!batches.is_empty());
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 5));
        assert_eq!(totals.batches_sent, batches.len() as u64);

        let poll_count_sent: i64 = batches
            .iter()
            .flat_map(|b| b.iter())
            .filter(|m| m.name() == "PollCount")
            .map(|m| match m.value() {
                MetricValue::Counter(delta) => delta,
                MetricValue::Gauge(_) => panic!("PollCount must be a counter"),
            })
            .sum();
        assert!(poll_count_sent > 0);
        assert!(poll_count_sent <= sampler.counters()["PollCount"]);
        assert!(batches.iter().flat_map(|b| b.iter()).any(|m| m.name() == "RandomValue"));
    }
}
