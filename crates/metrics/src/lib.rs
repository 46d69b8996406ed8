//! Weir Metrics - instrumentation primitives
//!
//! Components expose point-in-time metric snapshots through the
//! `Instrumentable` trait. A snapshot is a named `Context` holding plain
//! counter and gauge values; collectors read snapshots without knowing the
//! concrete component types.
//!
//! Counter names that carry a configuration-derived prefix (the listener's
//! `<contextName>.receivedMessageCount` family) are formed once at component
//! construction and never mutated afterwards.

/// A single metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricValue {
    /// Monotonically increasing count
    Counter(u64),
    /// Point-in-time level
    Gauge(i64),
}

/// A named metric inside a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

impl Metric {
    /// Create a counter metric
    pub fn counter(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(value),
        }
    }

    /// Create a gauge metric
    pub fn gauge(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }
}

/// A point-in-time snapshot of one component's metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub name: String,
    pub metrics: Vec<Metric>,
}

impl Context {
    /// Create an empty context
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metrics: Vec::new(),
        }
    }

    /// Create a context with metrics
    pub fn with_metrics(name: impl Into<String>, metrics: Vec<Metric>) -> Self {
        Self {
            name: name.into(),
            metrics,
        }
    }

    /// Look up a metric by name
    pub fn metric(&self, name: &str) -> Option<MetricValue> {
        self.metrics
            .iter()
            .find(|metric| metric.name == name)
            .map(|metric| metric.value)
    }
}

/// Capability to emit a metrics snapshot
pub trait Instrumentable: Send + Sync {
    fn emit(&self) -> Context;
}
