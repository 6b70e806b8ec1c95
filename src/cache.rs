//! `MetricCache`: the current flush window's measurements, keyed
//! hierarchically by origin -> instance-key -> [`Resource`].
//!
//! Ingest, snapshot, and clear are mutually exclusive under a single
//! `parking_lot::Mutex` guarding the two-level map. No handler may hold this
//! mutex across an `.await` or a blocking call — critical sections here are
//! plain map mutation only.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::firehose::{Envelope, EventPayload};
use crate::metrics::{record_cache_flush, record_envelope_ingested, record_unknown_envelope};

/// The per-instance aggregate held in the cache.
///
/// Field names and casing match the JSON shape scrapers expect
/// (`Deployment`, `Job`, `Index`, `IP`, `ValueMetrics`, `CounterMetrics`).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Resource {
    #[serde(rename = "Deployment")]
    pub deployment: String,
    #[serde(rename = "Job")]
    pub job: String,
    #[serde(rename = "Index")]
    pub index: String,
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(rename = "ValueMetrics")]
    pub value_metrics: HashMap<String, f64>,
    #[serde(rename = "CounterMetrics")]
    pub counter_metrics: HashMap<String, f64>,
}

impl Resource {
    fn new(deployment: String, job: String, index: String, ip: String) -> Self {
        Resource {
            deployment,
            job,
            index,
            ip,
            value_metrics: HashMap::new(),
            counter_metrics: HashMap::new(),
        }
    }
}

/// Tuple (deployment, job, index, ip) rendered as `"deployment | job | index | ip"`.
fn instance_key(envelope: &Envelope) -> String {
    format!(
        "{} | {} | {} | {}",
        envelope.deployment, envelope.job, envelope.index, envelope.ip
    )
}

type OriginMap = HashMap<String, HashMap<String, Resource>>;

/// Thread-safe origin-keyed cache of the current flush window.
#[derive(Default)]
pub struct MetricCache {
    inner: Mutex<OriginMap>,
}

impl MetricCache {
    pub fn new() -> Self {
        MetricCache {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Classify and fold one envelope into the cache. Never fails: an
    /// unrecognized event type is logged and dropped.
    pub fn ingest(&self, envelope: &Envelope) {
        let key = instance_key(envelope);

        match &envelope.payload {
            EventPayload::ValueMetric { name, value } => {
                let mut guard = self.inner.lock();
                let origin_map = guard.entry(envelope.origin.clone()).or_default();
                let resource = origin_map.entry(key).or_insert_with(|| {
                    Resource::new(
                        envelope.deployment.clone(),
                        envelope.job.clone(),
                        envelope.index.clone(),
                        envelope.ip.clone(),
                    )
                });
                resource.value_metrics.insert(name.clone(), *value);
                drop(guard);
                record_envelope_ingested(&envelope.origin, "value");
            }
            EventPayload::CounterEvent { name, total } => {
                let mut guard = self.inner.lock();
                let origin_map = guard.entry(envelope.origin.clone()).or_default();
                let resource = origin_map.entry(key).or_insert_with(|| {
                    Resource::new(
                        envelope.deployment.clone(),
                        envelope.job.clone(),
                        envelope.index.clone(),
                        envelope.ip.clone(),
                    )
                });
                resource.counter_metrics.insert(name.clone(), *total as f64);
                drop(guard);
                record_envelope_ingested(&envelope.origin, "counter");
            }
            EventPayload::Other => {
                tracing::warn!(origin = %envelope.origin, "unknown envelope event type, dropping");
                record_unknown_envelope(&envelope.origin);
            }
        }
    }

    /// Snapshot the resources for one origin. `None` means "no content":
    /// the origin has no entries in the current window.
    pub fn snapshot_origin(&self, origin: &str) -> Option<Vec<Resource>> {
        let guard = self.inner.lock();
        guard
            .get(origin)
            .map(|instances| instances.values().cloned().collect())
    }

    /// Replace the two-level mapping with empty mappings, releasing all
    /// inner resources atomically.
    pub fn clear(&self) {
        let mut guard = self.inner.lock();
        guard.clear();
        drop(guard);
        record_cache_flush();
    }
}
