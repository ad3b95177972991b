use anyhow::Result;
use blockflow::query::*;
use blockflow::settings::{OverflowMode, TotalsMode};
use blockflow::testing::{context_with, int_rows, memory_table};
use blockflow::{ErrorKind, InterpreterSelect, ProcessingStage, Settings};

#[macro_use]
mod macros;

#[test]
fn json_overrides_keep_other_defaults() -> Result<()> {
    let settings = Settings::from_json_str(
        r#"{
            "max_threads": 3,
            "max_rows_to_read": 100,
            "read_overflow_mode": "break",
            "totals_mode": "before_having",
            "extremes": true
        }"#,
    )?;
    assert_eq!(settings.max_threads, 3);
    assert_eq!(settings.read_limits().max_rows, 100);
    assert_eq!(settings.read_overflow_mode, OverflowMode::Break);
    assert_eq!(settings.totals_mode, TotalsMode::BeforeHaving);
    assert!(settings.extremes);
    assert_eq!(settings.max_block_size, Settings::default().max_block_size);
    assert_eq!(settings.max_subquery_depth, 100);
    Ok(())
}

#[test]
fn unknown_enum_values_are_rejected() {
    let result = Settings::from_json_str(r#"{ "sort_overflow_mode": "sometimes" }"#);
    assert_error_kind!(result, ErrorKind::Configuration);
}

#[test]
fn zero_threads_is_a_configuration_error() -> Result<()> {
    let table = memory_table("t", &["v"], vec![vec![vec![1]]])?;
    let ctx = context_with(settings! { max_threads: 0 }, [table]);
    let query = SelectQuery::new().select([col("v")]).from_table("t");
    assert_error_kind!(InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn stream_ratio_scales_the_read() -> Result<()> {
    let blocks = (0..8).map(|i| vec![vec![i]]).collect();
    let table = memory_table("t", &["v"], blocks)?;
    let ctx = context_with(settings! { max_threads: 2, max_streams_to_max_threads_ratio: 2.0 }, [table]);
    let query = SelectQuery::new().select([col("v")]).from_table("t");
    let streams = InterpreterSelect::new(query.clone(), ctx.clone(), ProcessingStage::Complete)
        .execute_with_multiple_streams()?;
    assert_eq!(streams.len(), 4);

    let output = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?.read_all()?;
    let mut rows = output.rows();
    rows.sort();
    assert_eq!(rows, int_rows(&[&[0], &[1], &[2], &[3], &[4], &[5], &[6], &[7]]));
    Ok(())
}
