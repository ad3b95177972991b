//! Execution counters for one query.
//!
//! The pipeline bumps a handful of built-in counters while it runs (rows read
//! from storage, rows materialized into sets, spill files written, ...).
//! Callers may also register their own [`Metric`]s. Everything can be
//! exported as JSON after the query finishes.
//!
//! ```
//! use blockflow::metrics::{names, MetricsCollector};
//!
//! let m = MetricsCollector::new();
//! m.increment_counter(names::ROWS_READ, 10);
//! m.increment_counter(names::ROWS_READ, 5);
//! assert_eq!(m.counter(names::ROWS_READ), 15);
//! assert_eq!(m.to_json()[names::ROWS_READ]["value"], 15);
//! ```

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Built-in counter names.
pub mod names {
    pub const ROWS_READ: &str = "rows_read";
    pub const BYTES_READ: &str = "bytes_read";
    pub const SET_ROWS: &str = "set_rows";
    pub const JOIN_ROWS: &str = "join_build_rows";
    pub const SORT_SPILLED_FILES: &str = "external_sort_files";
    pub const SORT_SPILLED_BYTES: &str = "external_sort_bytes";
    pub const AGGREGATION_SPILLED_FILES: &str = "external_aggregation_files";
    pub const AGGREGATION_SPILLED_BYTES: &str = "external_aggregation_bytes";
    pub const TWO_LEVEL_CONVERSIONS: &str = "two_level_conversions";
}

/// A user-defined metric.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    fn value(&self) -> Value;

    fn description(&self) -> Option<&str> {
        None
    }
}

#[derive(Default)]
struct MetricsInner {
    counters: BTreeMap<String, u64>,
    custom: BTreeMap<String, Box<dyn Metric>>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
}

/// Thread-safe, cheaply clonable metrics sink shared by all streams of a query.
#[derive(Clone, Default)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsInner>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Replaces a metric with the same name.
    pub fn register(&self, metric: Box<dyn Metric>) {
        self.lock().custom.insert(metric.name().to_string(), metric);
    }

    pub fn record_start(&self) {
        self.lock().start_time = Some(Instant::now());
    }

    pub fn record_end(&self) {
        self.lock().end_time = Some(Instant::now());
    }

    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.start_time, inner.end_time) {
            (Some(start), Some(end)) => Some(end.duration_since(start)),
            _ => None,
        }
    }

    pub fn increment_counter(&self, name: &str, value: u64) {
        *self.lock().counters.entry(name.to_string()).or_insert(0) += value;
    }

    /// Current value of a counter, `0` if never incremented.
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.lock().counters.get(name).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let inner = self.lock();
        let mut out = serde_json::Map::new();
        for (name, value) in &inner.counters {
            out.insert(name.clone(), json!({ "value": value }));
        }
        for (name, metric) in &inner.custom {
            let mut obj = serde_json::Map::new();
            obj.insert("value".to_string(), metric.value());
            if let Some(desc) = metric.description() {
                obj.insert("description".to_string(), json!(desc));
            }
            out.insert(name.clone(), Value::Object(obj));
        }
        if let (Some(start), Some(end)) = (inner.start_time, inner.end_time) {
            out.insert(
                "execution_time_ms".to_string(),
                json!({
                    "value": end.duration_since(start).as_millis(),
                    "description": "Total query execution time in milliseconds",
                }),
            );
        }
        Value::Object(out)
    }

    /// Write [`Self::to_json`] pretty-printed to `path`.
    ///
    /// # Errors
    /// If the file cannot be created or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path)?;
        file.write_all(formatted.as_bytes())?;
        Ok(())
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").field("counters", &self.lock().counters).finish()
    }
}

/// A fixed numeric value with an optional description.
pub struct GaugeMetric {
    name: String,
    value: f64,
    description: Option<String>,
}

impl GaugeMetric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, description: None }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Metric for GaugeMetric {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        json!(self.value)
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}
