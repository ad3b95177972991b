//! WITH TOTALS and extremes.

use anyhow::Result;
use blockflow::query::*;
use blockflow::settings::{OverflowMode, TotalsMode};
use blockflow::testing::{assert_rows_unordered_equal, context_with, grouped_sample, int_rows, memory_table};
use blockflow::{explain_stream, InterpreterSelect, ProcessingStage, QueryContext, QueryOutput, Settings, Value};

#[macro_use]
mod macros;

fn run(query: SelectQuery, ctx: &QueryContext) -> Result<QueryOutput> {
    Ok(InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?)
}

fn totals_query() -> SelectQuery {
    SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]).with_totals()
}

#[test]
fn totals_row_has_default_keys() -> Result<()> {
    for threads in [1, 3] {
        let ctx = context_with(settings! { max_threads: threads }, [grouped_sample("t")?]);
        let output = run(totals_query(), &ctx)?;
        assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 30], &[2, 5]]));
        let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
        assert_eq!(totals.rows(), 1);
        assert_eq!(totals.row(0), vec![Value::Int(0), Value::Int(35)]);
    }
    Ok(())
}

#[test]
fn totals_follow_the_having_mode() -> Result<()> {
    let query = totals_query().having(sum(col("v")).gt(lit(10)));
    let cases = [(TotalsMode::AfterHavingExclusive, 30), (TotalsMode::BeforeHaving, 35)];
    for (mode, expected) in cases {
        let ctx = context_with(settings! { totals_mode: mode }, [grouped_sample("t")?]);
        let output = run(query.clone(), &ctx)?;
        assert_eq!(output.rows(), int_rows(&[&[1, 30]]));
        let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
        assert_eq!(totals.row(0)[1], Value::Int(expected), "mode {mode:?}");
    }
    Ok(())
}

#[test]
fn totals_with_order_and_limit() -> Result<()> {
    let ctx = context_with(Settings::default(), [grouped_sample("t")?]);
    let query = totals_query().order_by([col("k").desc()]).limit(1);
    let output = run(query, &ctx)?;
    assert_eq!(output.rows(), int_rows(&[&[2, 5]]));
    let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
    assert_eq!(totals.row(0)[1], Value::Int(35));
    Ok(())
}

#[test]
fn totals_of_a_from_subquery_cover_every_group() -> Result<()> {
    let ctx = context_with(settings! { max_threads: 1, group_by_two_level_threshold: 1 }, [grouped_sample("t")?]);
    let query = SelectQuery::new().select([col("k"), col("sum(v)")]).from_subquery(totals_query()).limit(1);

    let io = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?;
    assert!(explain_stream(io.stream.as_ref()).contains("read till end"));
    let output = io.read_all()?;
    assert_eq!(output.row_count(), 1);
    let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
    assert_eq!(totals.row(0), vec![Value::Int(0), Value::Int(35)]);
    Ok(())
}

#[test]
fn overflow_row_is_folded_into_totals() -> Result<()> {
    let blocks = (0..10).map(|i| vec![vec![i, 1]]).collect();
    let table = memory_table("t", &["k", "v"], blocks)?;
    let capped = |mode: TotalsMode| settings! {
        max_threads: 1,
        max_rows_to_group_by: 3,
        group_by_overflow_mode: OverflowMode::Any,
        totals_mode: mode,
    };

    // The fourth key trips the cap; keys 4..9 land in the overflow row.
    let ctx = context_with(capped(TotalsMode::AfterHavingInclusive), [table.clone()]);
    let output = run(totals_query(), &ctx)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[0, 1], &[1, 1], &[2, 1], &[3, 1]]));
    let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
    assert_eq!(totals.row(0)[1], Value::Int(10));

    let ctx = context_with(capped(TotalsMode::AfterHavingExclusive), [table]);
    let output = run(totals_query(), &ctx)?;
    assert_eq!(output.row_count(), 4);
    let totals = output.totals.ok_or_else(|| anyhow::anyhow!("no totals"))?;
    assert_eq!(totals.row(0)[1], Value::Int(4));
    Ok(())
}

#[test]
fn without_with_totals_there_is_no_totals_row() -> Result<()> {
    let ctx = context_with(Settings::default(), [grouped_sample("t")?]);
    let query = SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]);
    assert!(run(query, &ctx)?.totals.is_none());
    Ok(())
}

#[test]
fn extremes_are_per_column_min_and_max() -> Result<()> {
    let table = memory_table("t", &["a", "b"], vec![vec![vec![3, -1], vec![7, 4]], vec![vec![1, 9]]])?;
    let ctx = context_with(settings! { extremes: true, max_threads: 2 }, [table]);
    let query = SelectQuery::new().select([col("a"), col("b")]).from_table("t");
    let output = run(query, &ctx)?;
    let extremes = output.extremes.ok_or_else(|| anyhow::anyhow!("no extremes"))?;
    assert_eq!(extremes.rows(), 2);
    assert_eq!(extremes.row(0), vec![Value::Int(1), Value::Int(-1)]);
    assert_eq!(extremes.row(1), vec![Value::Int(7), Value::Int(9)]);
    Ok(())
}

#[test]
fn extremes_of_an_empty_result_are_defaults() -> Result<()> {
    let table = memory_table("t", &["a"], vec![vec![vec![3]]])?;
    let ctx = context_with(settings! { extremes: true }, [table]);
    let query = SelectQuery::new().select([col("a")]).from_table("t").filter(col("a").gt(lit(100)));
    let output = run(query, &ctx)?;
    assert_eq!(output.row_count(), 0);
    let extremes = output.extremes.ok_or_else(|| anyhow::anyhow!("no extremes"))?;
    assert_eq!(extremes.columns[0].values, vec![Value::Int(0), Value::Int(0)]);
    Ok(())
}

#[test]
fn extremes_are_off_by_default_and_in_subqueries() -> Result<()> {
    let table = memory_table("t", &["a"], vec![vec![vec![3], vec![5]]])?;
    let ctx = context_with(Settings::default(), [table]);
    let query = SelectQuery::new().select([col("a")]).from_table("t");
    assert!(run(query.clone(), &ctx)?.extremes.is_none());

    let ctx = ctx.with_settings(settings! { extremes: true });
    let outer = SelectQuery::new().select([col("a")]).from_subquery(query).filter(col("a").gt(lit(3)));
    let extremes = run(outer, &ctx)?.extremes.ok_or_else(|| anyhow::anyhow!("no extremes"))?;
    assert_eq!(extremes.columns[0].values, vec![Value::Int(5), Value::Int(5)]);
    Ok(())
}
