//! In-memory stats store and the field registry that names what the agent
//! can collect.
//!
//! Each collectable field maps to a source group and an extractor over one
//! [`SourceSample`] (the per-tick harvest of process and host statistics).
//! The registry is a static table; selection names are resolved against it
//! at every tick, and unknown names are logged and skipped without faulting
//! the sampler.

use std::collections::BTreeMap;
use std::sync::RwLock;

use metron_core::Metric;
use tracing::warn;

/// Counter incremented once per sampling tick, reset after a successful report.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge refreshed with a pseudo-random value every tick.
pub const RANDOM_VALUE: &str = "RandomValue";

/// Per-core CPU utilisation; expands to `CPUutilization1..N` in the store.
pub const CPU_UTILIZATION: &str = "CPUutilization";

/// Where a registry field reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceGroup {
    /// The agent process itself
    Runtime,
    /// Host virtual memory
    HostMemory,
    /// Per-core host CPU utilisation
    HostCpu,
}

/// One named, collectable gauge field.
pub struct FieldSpec {
    pub name: &'static str,
    pub group: SourceGroup,
    /// Accessor in the source this field reads; diagnostics only
    pub source_field: &'static str,
    pub read: fn(&SourceSample) -> f64,
}

/// One tick's worth of raw readings, produced by the sampler.
#[derive(Debug, Clone, Default)]
pub struct SourceSample {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub process_cpu_percent: f32,
    pub run_time_seconds: u64,
    pub start_time_seconds: u64,
    pub disk_read_bytes: u64,
    pub disk_written_bytes: u64,

    pub total_memory: u64,
    pub free_memory: u64,
    pub available_memory: u64,
    pub used_memory: u64,
    pub total_swap: u64,
    pub free_swap: u64,
    pub used_swap: u64,

    pub per_cpu_percent: Vec<f32>,
}

/// Everything the agent knows how to collect. Integer sources are widened
/// to f64 by their extractors.
pub static REGISTRY: &[FieldSpec] = &[
    FieldSpec {
        name: "ResidentMemory",
        group: SourceGroup::Runtime,
        source_field: "memory",
        read: |s| s.resident_memory as f64,
    },
    FieldSpec {
        name: "VirtualMemory",
        group: SourceGroup::Runtime,
        source_field: "virtual_memory",
        read: |s| s.virtual_memory as f64,
    },
    FieldSpec {
        name: "ProcessCpuPercent",
        group: SourceGroup::Runtime,
        source_field: "cpu_usage",
        read: |s| s.process_cpu_percent as f64,
    },
    FieldSpec {
        name: "RunTimeSeconds",
        group: SourceGroup::Runtime,
        source_field: "run_time",
        read: |s| s.run_time_seconds as f64,
    },
    FieldSpec {
        name: "StartTimeSeconds",
        group: SourceGroup::Runtime,
        source_field: "start_time",
        read: |s| s.start_time_seconds as f64,
    },
    FieldSpec {
        name: "DiskReadBytes",
        group: SourceGroup::Runtime,
        source_field: "disk_usage",
        read: |s| s.disk_read_bytes as f64,
    },
    FieldSpec {
        name: "DiskWrittenBytes",
        group: SourceGroup::Runtime,
        source_field: "disk_usage",
        read: |s| s.disk_written_bytes as f64,
    },
    FieldSpec {
        name: "TotalMemory",
        group: SourceGroup::HostMemory,
        source_field: "total_memory",
        read: |s| s.total_memory as f64,
    },
    FieldSpec {
        name: "FreeMemory",
        group: SourceGroup::HostMemory,
        source_field: "free_memory",
        read: |s| s.free_memory as f64,
    },
    FieldSpec {
        name: "AvailableMemory",
        group: SourceGroup::HostMemory,
        source_field: "available_memory",
        read: |s| s.available_memory as f64,
    },
    FieldSpec {
        name: "UsedMemory",
        group: SourceGroup::HostMemory,
        source_field: "used_memory",
        read: |s| s.used_memory as f64,
    },
    FieldSpec {
        name: "TotalSwap",
        group: SourceGroup::HostMemory,
        source_field: "total_swap",
        read: |s| s.total_swap as f64,
    },
    FieldSpec {
        name: "FreeSwap",
        group: SourceGroup::HostMemory,
        source_field: "free_swap",
        read: |s| s.free_swap as f64,
    },
    FieldSpec {
        name: "UsedSwap",
        group: SourceGroup::HostMemory,
        source_field: "used_swap",
        read: |s| s.used_swap as f64,
    },
    FieldSpec {
        name: CPU_UTILIZATION,
        group: SourceGroup::HostCpu,
        source_field: "cpus",
        read: |_| 0.0, // expanded per core, never read directly
    },
];

pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Expand a configured selection, resolving `*` to every registry name.
pub fn expand_selection(configured: &[String]) -> Vec<String> {
    if configured.iter().any(|name| name == "*") {
        REGISTRY.iter().map(|spec| spec.name.to_string()).collect()
    } else {
        configured.to_vec()
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    gauges: BTreeMap<String, f64>,
    poll_count: i64,
    random_value: f64,
}

/// Shared stats store. The sampler is the sole writer and holds the write
/// lock for a whole tick; delivery workers read snapshots under the read
/// lock.
#[derive(Debug, Default)]
pub struct Stats {
    inner: RwLock<StatsInner>,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    /// Fold one tick's readings into the store for the selected names.
    pub fn apply_sample(&self, selection: &[String], sample: &SourceSample) {
        let mut inner = self.inner.write().unwrap();

        for name in selection {
            match lookup(name) {
                Some(spec) if spec.group == SourceGroup::HostCpu => {
                    for (core, pct) in sample.per_cpu_percent.iter().enumerate() {
                        inner
                            .gauges
                            .insert(format!("{}{}", spec.name, core + 1), *pct as f64);
                    }
                }
                Some(spec) => {
                    inner.gauges.insert(name.clone(), (spec.read)(sample));
                }
                None => warn!("unknown metric {name:?} in selection, skipping"),
            }
        }

        inner.random_value = fastrand::f64();
        inner.poll_count += 1;
    }

    /// Snapshot the store as a wire batch: gauges in id order, then
    /// `RandomValue`, then the `PollCount` counter. Empty until the first
    /// sampling tick has run.
    pub fn as_batch(&self) -> Vec<Metric> {
        let inner = self.inner.read().unwrap();

        if inner.poll_count == 0 {
            return Vec::new();
        }

        let mut batch: Vec<Metric> = inner
            .gauges
            .iter()
            .map(|(id, value)| Metric::gauge(id.clone(), *value))
            .collect();
        batch.push(Metric::gauge(RANDOM_VALUE, inner.random_value));
        batch.push(Metric::counter(POLL_COUNT, inner.poll_count));
        batch
    }

    /// Called by a worker after a successful report.
    pub fn reset_poll_count(&self) {
        self.inner.write().unwrap().poll_count = 0;
    }

    #[cfg(test)]
    pub fn poll_count(&self) -> i64 {
        self.inner.read().unwrap().poll_count
    }
}
