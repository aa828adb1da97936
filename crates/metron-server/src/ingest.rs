//! Request validation and the merge pipeline between handlers and storage.
//!
//! Validation failures are typed separately from storage failures so the
//! handlers can answer 400 for the former and 500 for the latter.

use std::collections::HashMap;
use std::sync::Arc;

use metron_core::{Metric, MetricKind, collapse};
use serde::Deserialize;
use tracing::debug;

use crate::storage::{MetricStorage, StorageError};

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("unknown metric kind {0:?}")]
    UnknownKind(String),

    #[error("metric id must not be empty")]
    EmptyId,

    #[error("cannot parse {value:?} as a {kind} value")]
    BadNumber { kind: MetricKind, value: String },

    #[error("{kind} metric {id:?} is missing its payload field")]
    MissingPayload { id: String, kind: MetricKind },

    #[error("metric {id:?} is registered as {stored}, got {incoming}")]
    KindConflict {
        id: String,
        stored: MetricKind,
        incoming: MetricKind,
    },

    #[error("malformed body: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Identifies a metric in a `/value/` JSON lookup.
#[derive(Debug, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

/// Build a metric from `/update/{kind}/{id}/{value}` path variables. Numeric
/// parse failures are validation errors, never server errors.
pub fn metric_from_path(kind: &str, id: &str, value: &str) -> Result<Metric, ValidationError> {
    let kind: MetricKind = kind
        .parse()
        .map_err(|_| ValidationError::UnknownKind(kind.to_string()))?;

    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }

    match kind {
        MetricKind::Counter => {
            let delta: i64 = value.parse().map_err(|_| ValidationError::BadNumber {
                kind,
                value: value.to_string(),
            })?;
            Ok(Metric::counter(id, delta))
        }
        MetricKind::Gauge => {
            let value: f64 = value.parse().map_err(|_| ValidationError::BadNumber {
                kind,
                value: value.to_string(),
            })?;
            Ok(Metric::gauge(id, value))
        }
    }
}

/// Parse one JSON metric document, normalize it to the one-populated-field
/// invariant, and check it carries the payload its kind requires.
pub fn metric_from_json(body: &[u8]) -> Result<Metric, ValidationError> {
    let mut metric: Metric = serde_json::from_slice(body)?;
    metric.normalize();
    validate(&metric)?;
    Ok(metric)
}

/// Parse a JSON array of metrics; every element is normalized and validated.
pub fn batch_from_json(body: &[u8]) -> Result<Vec<Metric>, ValidationError> {
    let mut batch: Vec<Metric> = serde_json::from_slice(body)?;
    for metric in &mut batch {
        metric.normalize();
        validate(metric)?;
    }
    Ok(batch)
}

pub fn query_from_json(body: &[u8]) -> Result<MetricQuery, ValidationError> {
    let query: MetricQuery = serde_json::from_slice(body)?;
    if query.id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(query)
}

fn validate(metric: &Metric) -> Result<(), ValidationError> {
    if metric.id.is_empty() {
        return Err(ValidationError::EmptyId);
    }

    let populated = match metric.kind {
        MetricKind::Counter => metric.delta.is_some(),
        MetricKind::Gauge => metric.value.is_some(),
    };
    if !populated {
        return Err(ValidationError::MissingPayload {
            id: metric.id.clone(),
            kind: metric.kind,
        });
    }

    Ok(())
}

/// Merge pipeline over the storage contract.
#[derive(Clone)]
pub struct Ingestor {
    storage: Arc<dyn MetricStorage>,
}

impl Ingestor {
    pub fn new(storage: Arc<dyn MetricStorage>) -> Self {
        Ingestor { storage }
    }

    /// Merge one incoming metric with its stored counterpart and persist
    /// the result. Counters accumulate, gauges overwrite; an id may never
    /// change kind.
    pub async fn set(&self, incoming: Metric) -> Result<Metric, IngestError> {
        match self.storage.read(&incoming.id).await? {
            Some(mut stored) => {
                check_kind(&stored, &incoming)?;
                stored.set_value(incoming.delta, incoming.value);
                Ok(self.storage.update(&stored).await?)
            }
            None => Ok(self.storage.create(&incoming).await?),
        }
    }

    /// Batch ingest: collapse duplicates within the batch, merge the result
    /// with stored state read in one query, install atomically.
    pub async fn set_many(&self, incoming: Vec<Metric>) -> Result<(), IngestError> {
        if incoming.is_empty() {
            debug!("empty batch, nothing to do");
            return Ok(());
        }

        let collapsed = collapse(&incoming);
        let ids: Vec<String> = collapsed.iter().map(|m| m.id.clone()).collect();

        let stored = self.storage.read_many(&ids).await?;
        let stored: HashMap<&str, &Metric> = stored.iter().map(|m| (m.id.as_str(), m)).collect();

        let mut merged = Vec::with_capacity(collapsed.len());
        for metric in collapsed {
            match stored.get(metric.id.as_str()) {
                Some(current) => {
                    check_kind(current, &metric)?;
                    let mut current = (*current).clone();
                    current.set_value(metric.delta, metric.value);
                    merged.push(current);
                }
                None => merged.push(metric),
            }
        }

        Ok(self.storage.upsert_many(&merged).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Metric>, IngestError> {
        Ok(self.storage.read(id).await?)
    }

    pub async fn ids(&self) -> Result<Vec<String>, IngestError> {
        Ok(self.storage.read_all_ids().await?)
    }

    pub async fn healthy(&self) -> bool {
        self.storage.ping().await
    }
}

fn check_kind(stored: &Metric, incoming: &Metric) -> Result<(), ValidationError> {
    if stored.kind != incoming.kind {
        return Err(ValidationError::KindConflict {
            id: incoming.id.clone(),
            stored: stored.kind,
            incoming: incoming.kind,
        });
    }
    Ok(())
}
