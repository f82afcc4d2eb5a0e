//! Collects local runtime measurements and forwards them to a metrics-relay server.
//!
//! The agent is a pipeline of four stages, each running on its own task:
//!
//! - a [`Sampler`] takes host and process readings on every poll tick;
//! - on every report tick the latest readings are pushed into a bounded queue, counters as the
//!   delta since the last report;
//! - a [`Batcher`] drains the queue into batches of at most `max_batch_size` metrics, sealing a
//!   batch early once `batch_timeout` has passed since it started;
//! - a [`Dispatcher`] delivers sealed batches with at most `rate_limit` in flight, retrying
//!   retryable failures with exponential backoff ([`RetryPolicy`]).
//!
//! Batches are sent as gzip-compressed JSON. When a signing key is configured, each request carries
//! the hex-encoded HMAC-SHA256 of the uncompressed payload in the `HashSHA256` header.
//!
//! ## Delivery guarantees
//!
//! Delivery is at-least-once per attempt and best effort overall: a batch that is rejected, or
//! that still fails after the last attempt, is logged and dropped. Failures never stop the
//! pipeline.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use metrics_relay_agent::AgentBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let agent = AgentBuilder::new()
//!     .with_address("localhost:8080")?
//!     .with_signing_key("secret")
//!     .with_poll_interval(Duration::from_secs(2))
//!     .with_report_interval(Duration::from_secs(10))
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! let totals = agent.run(shutdown).await;
//! println!("sent {} batches", totals.batches_sent);
//! # Ok(())
//! # }
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod agent;
pub use self::agent::Agent;

mod batcher;
pub use self::batcher::{queue, Backpressure, Batcher, MetricQueue, PushError};

mod builder;
pub use self::builder::{AgentBuilder, BuildError};

mod dispatcher;
pub use self::dispatcher::Dispatcher;

pub mod retry;
pub use self::retry::RetryPolicy;

mod sampler;
pub use self::sampler::Sampler;

mod telemetry;
pub use self::telemetry::{Telemetry, TelemetrySnapshot};

mod transport;
pub use self::transport::{HttpTransport, SendFuture, Transport, TransportError};
