//! Shape of built pipelines.

use anyhow::Result;
use blockflow::explain::operator_count;
use blockflow::query::*;
use blockflow::testing::{context_with, grouped_sample, memory_table};
use blockflow::{explain_stream, InterpreterSelect, ProcessingStage, QueryContext};

#[macro_use]
mod macros;

fn explain(query: SelectQuery, ctx: QueryContext) -> Result<String> {
    let io = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?;
    Ok(explain_stream(io.stream.as_ref()))
}

#[test]
fn sort_with_limit_on_one_chain() -> Result<()> {
    let table = memory_table("numbers", &["v"], vec![vec![vec![3], vec![1]]])?;
    let ctx = context_with(settings! { max_threads: 1 }, [table]);
    let query = SelectQuery::new().select([col("v")]).from_table("numbers").order_by([col("v").desc()]).limit(2);
    let text = explain(query, ctx)?;
    let lines: Vec<&str> = text.lines().collect();

    assert!(lines[0].starts_with("Limit"), "{text}");
    let position = |name: &str| lines.iter().position(|l| l.contains(name));
    let merge = position("MergeSorting").ok_or_else(|| anyhow::anyhow!("no merge sort in\n{text}"))?;
    let partial = position("PartialSorting").ok_or_else(|| anyhow::anyhow!("no partial sort in\n{text}"))?;
    let source = position("Blocks").ok_or_else(|| anyhow::anyhow!("no source in\n{text}"))?;
    assert!(merge < partial && partial < source);
    assert!(lines.last().is_some_and(|l| l.trim_start_matches([' ', '│', '└', '├', '─']).starts_with("Blocks")));
    Ok(())
}

#[test]
fn group_by_on_one_chain_uses_a_single_aggregator() -> Result<()> {
    let ctx = context_with(settings! { max_threads: 1 }, [grouped_sample("t")?]);
    let query = SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]);
    let text = explain(query, ctx)?;
    assert!(text.contains("Aggregating"), "{text}");
    assert!(!text.contains("ParallelAggregating"), "{text}");
    Ok(())
}

#[test]
fn group_by_on_several_chains_aggregates_in_parallel() -> Result<()> {
    let ctx = context_with(settings! { max_threads: 3 }, [grouped_sample("t")?]);
    let query = SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]);
    let text = explain(query, ctx)?;
    assert!(text.contains("ParallelAggregating"), "{text}");
    Ok(())
}

#[test]
fn in_subquery_puts_set_creation_on_top() -> Result<()> {
    let ctx = context_with(settings! { max_threads: 1 }, [grouped_sample("t")?]);
    let keys = SelectQuery::new().select([col("k")]).from_table("t");
    let query = SelectQuery::new().select([col("v")]).from_table("t").filter(col("k").in_subquery(keys));
    let text = explain(query, ctx)?;
    assert!(text.starts_with("CreatingSets"), "{text}");
    assert!(text.contains("Filter"), "{text}");
    Ok(())
}

#[test]
fn totals_and_extremes_operators() -> Result<()> {
    let ctx = context_with(settings! { max_threads: 1, extremes: true }, [grouped_sample("t")?]);
    let query =
        SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]).with_totals();
    let io = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?;
    let text = explain_stream(io.stream.as_ref());
    assert!(text.contains("TotalsHaving"), "{text}");
    assert!(text.starts_with("Extremes"), "{text}");
    assert_eq!(operator_count(io.stream.as_ref()), text.lines().count());
    Ok(())
}
