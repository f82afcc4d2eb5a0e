//! HTTP aggregation server for metrics-relay agents.
//!
//! The server accepts metric updates over HTTP and merges them into a [`Store`]: gauges keep the
//! newest value, counters accumulate. Updates arrive either as path segments or as JSON, singly or
//! in batches, optionally gzip-compressed and signed with HMAC-SHA256.
//!
//! ## Routes
//!
//! | method | path                            | body                               |
//! |--------|---------------------------------|------------------------------------|
//! | `POST` | `/update/{type}/{name}/{value}` | none, replies `OK`                 |
//! | `POST` | `/update`                       | one JSON metric, replies stored    |
//! | `POST` | `/updates`                      | JSON array of metrics              |
//! | `POST` | `/value`                        | `{"id","type"}`, replies metric    |
//! | `GET`  | `/value/{type}/{name}`          | replies the value as text          |
//! | `GET`  | `/ping`                         | replies 500 if the store is down   |
//! | `GET`  | `/`                             | lists every stored metric          |
//!
//! JSON routes also accept a trailing slash. Invalid input is rejected with 400, unknown metrics
//! with 404. A request carrying a `HashSHA256` header must be signed with the server's key.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use metrics_relay::MemoryStore;
//! use metrics_relay_server::ServerBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ServerBuilder::new()
//!     .with_listen_address("0.0.0.0:8080")
//!     .with_signing_key("secret")
//!     .build(Arc::new(MemoryStore::new()))?;
//!
//! server.serve(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Store`]: metrics_relay::Store
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod body;

mod builder;
pub use self::builder::{BuildError, ServerBuilder};

mod routes;

mod server;
pub use self::server::Server;
