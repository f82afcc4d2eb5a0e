//! JSON wire format.
//!
//! A metric travels as `{"id": ..., "type": "gauge"|"counter", "value": f64, "delta": i64}` where
//! only the field matching the type is present. A batch is a JSON array of those objects.
//!
//! [`Metric`] serializes and deserializes through [`WireMetric`], so decoding a payload also
//! validates it: an unknown type or a missing value/delta fails deserialization.
use serde::{Deserialize, Serialize};

use crate::{
    common::ValidationError,
    metric::{Metric, MetricKind, MetricValue},
};

/// The on-the-wire representation of a metric.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct WireMetric {
    /// Metric name.
    pub id: String,

    /// Metric type, `gauge` or `counter`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Gauge value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Counter delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        let kind = metric.kind().as_str().to_string();
        let (id, value) = metric.into_parts();
        match value {
            MetricValue::Gauge(v) => WireMetric { id, kind, value: Some(v), delta: None },
            MetricValue::Counter(d) => WireMetric { id, kind, value: None, delta: Some(d) },
        }
    }
}

impl TryFrom<WireMetric> for Metric {
    type Error = ValidationError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        match wire.kind.parse::<MetricKind>()? {
            MetricKind::Gauge => match wire.value {
                Some(v) => Ok(Metric::gauge(wire.id, v)),
                None => Err(ValidationError::MissingValue { name: wire.id }),
            },
            MetricKind::Counter => match wire.delta {
                Some(d) => Ok(Metric::counter(wire.id, d)),
                None => Err(ValidationError::MissingDelta { name: wire.id }),
            },
        }
    }
}

impl Serialize for Metric {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        WireMetric::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = WireMetric::deserialize(deserializer)?;
        Metric::try_from(wire).map_err(serde::de::Error::custom)
    }
}

/// A read request for a single metric: `{"id": ..., "type": ...}`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MetricQuery {
    /// Metric name.
    pub id: String,

    /// Metric type, `gauge` or `counter`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl MetricQuery {
    /// Validates the query, returning the requested kind.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the name is empty or the kind is unknown.
    pub fn kind(&self) -> Result<MetricKind, ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        self.kind.parse()
    }
}

/// Encodes a sequence of metrics as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization fails. Non-finite gauge values serialize as `null`, which the
/// receiving side rejects.
pub fn encode_batch(metrics: &[Metric]) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(metrics)
}

/// Decodes a JSON array of metrics, validating every entry.
///
/// # Errors
///
/// Returns an error if the payload is not a JSON array of valid metrics.
pub fn decode_batch(payload: &[u8]) -> serde_json::Result<Vec<Metric>> {
    serde_json::from_slice(payload)
}
