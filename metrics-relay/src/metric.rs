use std::{fmt, str::FromStr};

use crate::common::ValidationError;

/// The kind of a metric.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MetricKind {
    /// A point-in-time value where the newest write wins.
    Gauge,
    /// An accumulated value that merges by summation.
    Counter,
}

impl MetricKind {
    /// Returns the wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// The value carried by a metric.
///
/// Exactly one payload exists per metric, and which one is decided by the variant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MetricValue {
    /// Gauge value.
    Gauge(f64),
    /// Counter delta.
    Counter(i64),
}

impl MetricValue {
    /// Returns the kind of this value.
    pub const fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

/// A single named measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    name: String,
    value: MetricValue,
}

impl Metric {
    /// Creates a new `Metric` from a name and a value.
    pub fn new<N>(name: N, value: MetricValue) -> Self
    where
        N: Into<String>,
    {
        Self { name: name.into(), value }
    }

    /// Creates a gauge metric.
    pub fn gauge<N>(name: N, value: f64) -> Self
    where
        N: Into<String>,
    {
        Self::new(name, MetricValue::Gauge(value))
    }

    /// Creates a counter metric.
    pub fn counter<N>(name: N, delta: i64) -> Self
    where
        N: Into<String>,
    {
        Self::new(name, MetricValue::Counter(delta))
    }

    /// Parses a metric from its textual parts, as used by path-style update routes.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the kind is unknown, the name is empty, or the raw value
    /// cannot be parsed as the type required by the kind. Gauges must be finite.
    pub fn parse(kind: &str, name: &str, raw_value: &str) -> Result<Self, ValidationError> {
        let kind = kind.parse::<MetricKind>()?;
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let value = match kind {
            MetricKind::Gauge => {
                raw_value.parse::<f64>().ok().filter(|v| v.is_finite()).map(MetricValue::Gauge)
            }
            MetricKind::Counter => raw_value.parse::<i64>().map(MetricValue::Counter).ok(),
        };

        value.map(|value| Self::new(name, value)).ok_or_else(|| ValidationError::InvalidValue {
            kind,
            raw: raw_value.to_string(),
        })
    }

    /// Returns the name of this metric.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this metric.
    pub const fn value(&self) -> MetricValue {
        self.value
    }

    /// Returns the kind of this metric.
    pub const fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    /// Consumes the metric, returning its name and value.
    pub fn into_parts(self) -> (String, MetricValue) {
        (self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::{Metric, MetricKind, MetricValue};
    use crate::common::ValidationError;

    #[test]
    fn parse_gauge_and_counter() {
        let gauge = Metric::parse("gauge", "Alloc", "123.45").expect("valid gauge");
        assert_eq!(gauge.name(), "Alloc");
        assert_eq!(gauge.value(), MetricValue::Gauge(123.45));

        let counter = Metric::parse("counter", "PollCount", "-3").expect("valid counter");
        assert_eq!(counter.kind(), MetricKind::Counter);
        assert_eq!(counter.value(), MetricValue::Counter(-3));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!(
            Metric::parse("histogram", "x", "1"),
            Err(ValidationError::UnknownKind("histogram".to_string()))
        );
        assert_eq!(Metric::parse("gauge", "", "1"), Err(ValidationError::EmptyName));
        assert_eq!(
            Metric::parse("counter", "x", "1.5"),
            Err(ValidationError::InvalidValue { kind: MetricKind::Counter, raw: "1.5".into() })
        );
        assert!(Metric::parse("gauge", "x", "none").is_err());
        assert!(Metric::parse("gauge", "x", "NaN").is_err());
        assert!(Metric::parse("gauge", "x", "inf").is_err());
    }
}
