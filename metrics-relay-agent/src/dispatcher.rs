use std::{sync::Arc, time::Duration};

use metrics_relay::Batch;
use tokio::{
    sync::Semaphore,
    task::{JoinError, JoinSet},
    time::Instant,
};
use tracing::{debug, error, warn};

use crate::{
    retry::{deliver, RetryPolicy},
    telemetry::Telemetry,
    transport::Transport,
};

/// Sends batches with at most `rate_limit` deliveries in flight.
///
/// Each batch gets its own task holding one permit for as long as its delivery (retries included)
/// runs.
pub struct Dispatcher<T: ?Sized> {
    transport: Arc<T>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    telemetry: Telemetry,
    grace_period: Duration,
}

impl<T> Dispatcher<T>
where
    T: Transport + ?Sized,
{
    /// Creates a new `Dispatcher`.
    pub fn new(
        transport: Arc<T>,
        policy: RetryPolicy,
        rate_limit: usize,
        grace_period: Duration,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            transport,
            policy,
            permits: Arc::new(Semaphore::new(rate_limit.max(1))),
            tasks: JoinSet::new(),
            telemetry,
            grace_period,
        }
    }

    /// Hands `batch` to a new delivery task, waiting for a free permit first.
    pub async fn dispatch(&mut self, batch: Batch) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!(metrics = batch.len(), "Send permits closed, dropping batch.");
                self.telemetry.track_batches_lost(1);
                return;
            }
        };

        while let Some(result) = self.tasks.try_join_next() {
            log_join_result(result);
        }

        let transport = Arc::clone(&self.transport);
        let policy = self.policy.clone();
        let telemetry = self.telemetry.clone();
        self.tasks.spawn(async move {
            let delivery = deliver(transport.as_ref(), &batch, &policy).await;
            telemetry.track_delivery(&delivery);
            drop(permit);
        });
    }

    /// Waits for in-flight deliveries, then aborts whatever is left after the grace period.
    ///
    /// `last` is a final batch to send within the same grace period, such as the partial batch
    /// flushed at shutdown. Returns the number of batches lost.
    pub async fn shutdown(mut self, mut last: Option<Batch>) -> usize {
        let deadline = Instant::now() + self.grace_period;

        let drained = tokio::time::timeout_at(deadline, async {
            if let Some(batch) = last.clone() {
                self.dispatch(batch).await;
                last = None;
            }
            while let Some(result) = self.tasks.join_next().await {
                log_join_result(result);
            }
        })
        .await;

        if drained.is_ok() {
            debug!("All in-flight batches finished.");
            return 0;
        }

        let lost = self.tasks.len() + usize::from(last.is_some());
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}

        error!(
            lost,
            grace_period = ?self.grace_period,
            "Shutdown grace period elapsed, batches lost."
        );
        self.telemetry.track_batches_lost(lost);
        lost
    }
}

fn log_join_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "Delivery task panicked.");
        } else {
            warn!(error = %e, "Delivery task cancelled.");
        }
    }
}
