//! Shared building blocks for the metrics relay.
//!
//! This crate holds everything that both sides of the relay agree on:
//!
//! - [`Metric`], a named measurement that is either a gauge or a counter, and [`Batch`], an
//!   immutable ordered group of metrics sealed for delivery;
//! - the JSON [wire format][wire] used between the agent and the server, and the
//!   [compression and signing][codec] applied to it;
//! - the [`Store`] trait, with an in-memory implementation ([`MemoryStore`]) and a durable one
//!   backed by SQLite ([`SqliteStore`], behind the default `sqlite` feature).
//!
//! # Merge semantics
//!
//! Gauges are last-write-wins. Counters accumulate: every update adds its delta to the stored
//! value, starting from zero. Stores never delete entries.
//!
//! ```
//! use metrics_relay::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! store.update_gauge("Alloc", 123.45).unwrap();
//! store.update_counter("PollCount", 1).unwrap();
//! store.update_counter("PollCount", 1).unwrap();
//!
//! assert_eq!(store.gauge("Alloc").unwrap(), Some(123.45));
//! assert_eq!(store.counter("PollCount").unwrap(), Some(2));
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod batch;
pub use self::batch::Batch;

pub mod codec;

mod common;
pub use self::common::{StoreError, ValidationError};

mod metric;
pub use self::metric::{Metric, MetricKind, MetricValue};

mod store;
#[cfg(feature = "sqlite")]
pub use self::store::SqliteStore;
pub use self::store::{MemoryStore, Snapshot, Store};

pub mod wire;
