use thiserror::Error as ThisError;

use crate::metric::MetricKind;

/// Errors produced when a metric fails validation.
///
/// Validation errors are never retried: the input itself is wrong.
#[derive(Clone, Debug, PartialEq, ThisError)]
pub enum ValidationError {
    /// The metric kind is neither `gauge` nor `counter`.
    #[error("unknown metric type '{0}' (expected 'gauge' or 'counter')")]
    UnknownKind(String),

    /// The metric name is empty.
    #[error("metric name must not be empty")]
    EmptyName,

    /// A gauge arrived without a `value` field.
    #[error("gauge '{name}' is missing its value")]
    MissingValue {
        /// Name of the offending metric.
        name: String,
    },

    /// A counter arrived without a `delta` field.
    #[error("counter '{name}' is missing its delta")]
    MissingDelta {
        /// Name of the offending metric.
        name: String,
    },

    /// The raw value could not be parsed as the type required by the kind.
    #[error("invalid {kind} value '{raw}'")]
    InvalidValue {
        /// Kind that was requested.
        kind: MetricKind,
        /// The raw value as received.
        raw: String,
    },
}

/// Errors returned by a [`Store`][crate::Store].
#[derive(Debug, ThisError)]
pub enum StoreError {
    /// The durable backend failed to execute a statement or is unreachable.
    #[cfg(feature = "sqlite")]
    #[error("sqlite backend error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A blocking store call could not be completed.
    #[error("store operation aborted: {0}")]
    Aborted(String),
}
