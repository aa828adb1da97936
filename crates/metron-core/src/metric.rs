//! The metric model shared by agent and server.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Discriminant between overwrite and accumulate semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("unknown metric kind: {0:?}")]
pub struct UnknownKind(pub String);

/// A single named measurement. Exactly one of `delta`/`value` is populated,
/// matching `kind`: counters carry `delta`, gauges carry `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Metric {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Metric {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Merge an incoming observation into this metric. A gauge is overwritten;
    /// a counter accumulates (an absent stored delta counts as zero). The
    /// field that does not match `kind` is cleared.
    pub fn set_value(&mut self, delta: Option<i64>, value: Option<f64>) {
        match self.kind {
            MetricKind::Gauge => {
                self.delta = None;
                self.value = value;
            }
            MetricKind::Counter => {
                self.value = None;
                match (self.delta, delta) {
                    (Some(current), Some(incoming)) => {
                        self.delta = Some(current.wrapping_add(incoming));
                    }
                    (None, Some(incoming)) => self.delta = Some(incoming),
                    _ => {}
                }
            }
        }
    }

    /// Drop whichever payload field does not match `kind`, restoring the
    /// one-populated-field invariant after deserializing untrusted input.
    pub fn normalize(&mut self) {
        match self.kind {
            MetricKind::Gauge => self.delta = None,
            MetricKind::Counter => self.value = None,
        }
    }

    /// Plaintext rendering: shortest decimal for gauges, integer for counters.
    pub fn value_string(&self) -> String {
        match self.kind {
            MetricKind::Gauge => self.value.unwrap_or(0.0).to_string(),
            MetricKind::Counter => self.delta.unwrap_or(0).to_string(),
        }
    }
}

/// Collapse a batch with duplicate ids into one entry per id using the merge
/// rule. The earliest occurrence claims the slot; later ones merge into it.
/// Relative order of first occurrences is preserved.
pub fn collapse(batch: &[Metric]) -> Vec<Metric> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(batch.len());
    let mut out: Vec<Metric> = Vec::with_capacity(batch.len());

    for metric in batch {
        match index.get(metric.id.as_str()) {
            Some(&slot) => out[slot].set_value(metric.delta, metric.value),
            None => {
                index.insert(metric.id.as_str(), out.len());
                out.push(metric.clone());
            }
        }
    }

    out
}
