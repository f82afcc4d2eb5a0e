use std::{sync::Arc, time::Duration};

use hyper::Uri;
use metrics_relay::codec::Signer;
use thiserror::Error;

use crate::{
    agent::Agent,
    batcher::{self, Backpressure},
    dispatcher::Dispatcher,
    retry::RetryPolicy,
    sampler::Sampler,
    telemetry::Telemetry,
    transport::{endpoint_from_address, HttpTransport, Transport},
};

const DEFAULT_ENDPOINT: &str = "http://localhost:8080/updates/";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MAX_BATCH_SIZE: usize = 20;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_QUEUE_CAPACITY: usize = 1000;
const DEFAULT_RATE_LIMIT: usize = 1;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Errors that could occur while building an agent.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the server address.
    #[error("invalid server address: {reason}")]
    InvalidAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The signing key was rejected.
    #[error("invalid signing key")]
    InvalidKey,

    /// A setting is out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Which setting, and why.
        reason: String,
    },
}

/// Builder for an [`Agent`].
pub struct AgentBuilder {
    endpoint: Uri,
    key: Option<Vec<u8>>,
    poll_interval: Duration,
    report_interval: Duration,
    max_batch_size: usize,
    batch_timeout: Duration,
    queue_capacity: usize,
    backpressure: Backpressure,
    rate_limit: usize,
    request_timeout: Duration,
    retry_policy: RetryPolicy,
    grace_period: Duration,
}

impl AgentBuilder {
    /// Creates a new `AgentBuilder` with the default configuration.
    pub fn new() -> Self {
        Self {
            endpoint: Uri::from_static(DEFAULT_ENDPOINT),
            key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::default(),
            rate_limit: DEFAULT_RATE_LIMIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry_policy: RetryPolicy::default(),
            grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
        }
    }

    /// Sets the server address.
    ///
    /// Either `<host>:<port>`, or a full `http://` URL. When no path is given, batches are posted
    /// to `/updates/`.
    ///
    /// Defaults to `localhost:8080`.
    ///
    /// # Errors
    ///
    /// If the address cannot be parsed, an error is returned indicating the reason.
    pub fn with_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.endpoint = endpoint_from_address(addr.as_ref())
            .map_err(|reason| BuildError::InvalidAddress { reason })?;
        Ok(self)
    }

    /// Sets the key used to sign payloads.
    ///
    /// An empty key disables signing. Defaults to no key.
    #[must_use]
    pub fn with_signing_key<K>(mut self, key: K) -> Self
    where
        K: Into<Vec<u8>>,
    {
        let key = key.into();
        self.key = if key.is_empty() { None } else { Some(key) };
        self
    }

    /// Sets how often local measurements are taken.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how often the latest measurements are queued for sending.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Sets the maximum number of metrics per batch.
    ///
    /// Defaults to 20.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets how long a batch may stay open waiting for more metrics.
    ///
    /// Defaults to 500 milliseconds.
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Sets the capacity of the queue between reporting and batching.
    ///
    /// Defaults to 1,000.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets what reporting does when the queue is full.
    ///
    /// Defaults to [`Backpressure::Block`].
    #[must_use]
    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Sets the maximum number of batches being delivered at once.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: usize) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sets the timeout of a single send attempt.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the retry policy for failed sends.
    ///
    /// Defaults to [`RetryPolicy::default`]: three attempts, one second initial delay, doubling up
    /// to five seconds.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Sets how long shutdown waits for in-flight batches before aborting them.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_shutdown_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Builds an agent sending over HTTP.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn build(self) -> Result<Agent, BuildError> {
        self.validate()?;

        let signer = match &self.key {
            Some(key) => Some(Signer::new(key).map_err(|_| BuildError::InvalidKey)?),
            None => None,
        };
        let transport = HttpTransport::new(self.endpoint.clone(), signer, self.request_timeout);
        Ok(self.assemble(Arc::new(transport)))
    }

    /// Builds an agent sending through the given transport.
    ///
    /// The address, signing key and request timeout are not used.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, an error is returned.
    pub fn build_with_transport<T>(self, transport: Arc<T>) -> Result<Agent, BuildError>
    where
        T: Transport,
    {
        self.validate()?;
        Ok(self.assemble(transport))
    }

    fn assemble(self, transport: Arc<dyn Transport>) -> Agent {
        let telemetry = Telemetry::new();
        let (queue, batcher) = batcher::queue(
            self.queue_capacity,
            self.backpressure,
            self.max_batch_size,
            self.batch_timeout,
        );
        let dispatcher = Dispatcher::new(
            transport,
            self.retry_policy,
            self.rate_limit,
            self.grace_period,
            telemetry.clone(),
        );

        Agent::new(
            Arc::new(Sampler::new()),
            queue,
            batcher,
            dispatcher,
            self.poll_interval,
            self.report_interval,
            telemetry,
        )
    }

    fn validate(&self) -> Result<(), BuildError> {
        let invalid =
            |reason: &str| Err(BuildError::InvalidConfiguration { reason: reason.to_string() });

        if self.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero");
        }
        if self.report_interval.is_zero() {
            return invalid("report interval must be greater than zero");
        }
        if self.max_batch_size == 0 {
            return invalid("max batch size must be greater than zero");
        }
        if self.queue_capacity == 0 {
            return invalid("queue capacity must be greater than zero");
        }
        if self.rate_limit == 0 {
            return invalid("rate limit must be greater than zero");
        }
        if self.retry_policy.max_attempts == 0 {
            return invalid("retry policy must allow at least one attempt");
        }
        if self.retry_policy.multiplier.is_nan() || self.retry_policy.multiplier < 1.0 {
            return invalid("retry multiplier must be at least 1.0");
        }
        Ok(())
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{AgentBuilder, BuildError};
    use crate::retry::RetryPolicy;

    #[test]
    fn rejects_invalid_address() {
        let result = AgentBuilder::new().with_address("https://secure:443");
        assert!(matches!(result, Err(BuildError::InvalidAddress { .. })));
    }

    #[test]
    fn rejects_zero_settings() {
        let cases = [
            AgentBuilder::new().with_poll_interval(Duration::ZERO),
            AgentBuilder::new().with_report_interval(Duration::ZERO),
            AgentBuilder::new().with_max_batch_size(0),
            AgentBuilder::new().with_queue_capacity(0),
            AgentBuilder::new().with_rate_limit(0),
            AgentBuilder::new()
                .with_retry_policy(RetryPolicy { max_attempts: 0, ..RetryPolicy::default() }),
            AgentBuilder::new()
                .with_retry_policy(RetryPolicy { multiplier: 0.5, ..RetryPolicy::default() }),
        ];

        for builder in cases {
            assert!(matches!(builder.build(), Err(BuildError::InvalidConfiguration { .. })));
        }
    }

    #[test]
    fn empty_key_disables_signing() {
        let builder = AgentBuilder::new().with_signing_key("");
        assert!(builder.key.is_none());

        let builder = AgentBuilder::new().with_signing_key("secret");
        assert_eq!(builder.key.as_deref(), Some(&b"secret"[..]));
    }
}
