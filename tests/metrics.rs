use anyhow::Result;
use blockflow::metrics::{names, GaugeMetric, MetricsCollector};
use blockflow::query::*;
use blockflow::testing::{grouped_sample, test_context};
use blockflow::{InterpreterSelect, ProcessingStage};

#[macro_use]
mod macros;

#[test]
fn counters_accumulate() {
    let metrics = MetricsCollector::new();
    assert_eq!(metrics.counter(names::SET_ROWS), 0);
    metrics.increment_counter(names::SET_ROWS, 2);
    metrics.increment_counter(names::SET_ROWS, 3);
    assert_eq!(metrics.counter(names::SET_ROWS), 5);
}

#[test]
fn gauges_are_exported_with_descriptions() {
    let metrics = MetricsCollector::new();
    metrics.register(Box::new(GaugeMetric::new("hit_ratio", 0.75).with_description("cache hits")));
    let json = metrics.to_json();
    assert_approx_eq!(json["hit_ratio"]["value"].as_f64().unwrap_or(f64::NAN), 0.75);
    assert_eq!(json["hit_ratio"]["description"], "cache hits");
}

#[test]
fn clones_share_counters() {
    let metrics = MetricsCollector::new();
    let clone = metrics.clone();
    clone.increment_counter(names::ROWS_READ, 7);
    assert_eq!(metrics.counter(names::ROWS_READ), 7);
}

#[test]
fn query_metrics_are_saved_as_json() -> Result<()> {
    let ctx = test_context([grouped_sample("t")?]);
    let query = SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]);
    InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.json");
    ctx.metrics.save_to_file(&path)?;
    let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(saved[names::ROWS_READ]["value"], 3);
    assert!(saved["execution_time_ms"]["value"].is_u64());
    Ok(())
}
