//! External sort and aggregation through temporary files.
#![cfg(feature = "spilling")]

use anyhow::Result;
use blockflow::context::HookPoint;
use blockflow::metrics::names;
use blockflow::query::*;
use blockflow::testing::{assert_rows_equal, context_with, int_rows, memory_table, HookRecorder};
use blockflow::{ErrorKind, InterpreterSelect, ProcessingStage, QueryContext};
use std::path::Path;

#[macro_use]
mod macros;

fn scattered(dir: &Path, settings: blockflow::Settings) -> Result<QueryContext> {
    let blocks = (0..16).map(|i| vec![vec![(i * 7) % 16, i % 3]]).collect();
    let table = memory_table("t", &["v", "g"], blocks)?;
    let settings = blockflow::Settings { tmp_path: Some(dir.to_path_buf()), ..settings };
    Ok(context_with(settings, [table]))
}

#[test]
fn external_sort_matches_in_memory_sort() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let query = SelectQuery::new().select([col("v")]).from_table("t").order_by([col("v").desc()]).limit(5);

    let ctx = scattered(dir.path(), settings! { max_threads: 2, max_bytes_before_external_sort: 16 })?;
    let spilled = InterpreterSelect::new(query.clone(), ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?;
    assert!(ctx.metrics.counter(names::SORT_SPILLED_FILES) >= 1);
    assert!(ctx.metrics.counter(names::SORT_SPILLED_BYTES) > 0);

    let ctx = scattered(dir.path(), settings! { max_threads: 2 })?;
    let in_memory = InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?;
    assert_eq!(ctx.metrics.counter(names::SORT_SPILLED_FILES), 0);

    assert_rows_equal(&spilled.rows(), &in_memory.rows());
    assert_rows_equal(&spilled.rows(), &int_rows(&[&[15], &[14], &[13], &[12], &[11]]));
    Ok(())
}

#[test]
fn temporary_files_are_removed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = scattered(dir.path(), settings! { max_threads: 1, max_bytes_before_external_sort: 16 })?;
    let query = SelectQuery::new().select([col("v")]).from_table("t").order_by([col("v").asc()]);
    let output = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?.read_all()?;
    assert_eq!(output.row_count(), 16);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn external_group_by_over_parallel_chains() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let ctx = scattered(dir.path(), settings! { max_threads: 3, max_bytes_before_external_group_by: 1 })?;
    let query = SelectQuery::new()
        .select([col("g"), count()])
        .from_table("t")
        .group_by([col("g")])
        .order_by([col("g").asc()]);
    let output = InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?;
    let counts: Vec<Option<i128>> = output.rows().iter().map(|r| r[1].as_i128()).collect();
    assert_eq!(counts, vec![Some(6), Some(5), Some(5)]);
    assert!(ctx.metrics.counter(names::AGGREGATION_SPILLED_FILES) >= 1);
    Ok(())
}

#[test]
fn failing_spill_fails_the_query() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let recorder = HookRecorder::new().fail_at(HookPoint::Spill);
    let ctx = scattered(dir.path(), settings! { max_threads: 1, max_bytes_before_external_sort: 16 })?
        .with_hook(recorder.hook());
    let query = SelectQuery::new().select([col("v")]).from_table("t").order_by([col("v").asc()]);
    let result = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?.read_all();
    assert_error_kind!(result, ErrorKind::External);
    assert_eq!(recorder.count(HookPoint::Spill), 1);
    Ok(())
}
