//! Hash joins and `IN` sets.

use anyhow::Result;
use blockflow::context::HookPoint;
use blockflow::metrics::names;
use blockflow::query::*;
use blockflow::testing::{assert_rows_unordered_equal, int_rows, memory_table, test_context, HookRecorder};
use blockflow::{ErrorKind, InterpreterSelect, ProcessingStage, QueryContext, QueryOutput, Value};

#[macro_use]
mod macros;

fn run(query: SelectQuery, ctx: &QueryContext) -> Result<QueryOutput> {
    Ok(InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?)
}

/// `l(k, a)`: `(1,10), (2,20), (3,30)`; `r(k, b)`: `(1,100), (3,300), (4,400)`.
fn join_ctx() -> Result<QueryContext> {
    let left = memory_table("l", &["k", "a"], vec![vec![vec![1, 10], vec![2, 20]], vec![vec![3, 30]]])?;
    let right = memory_table("r", &["k", "b"], vec![vec![vec![1, 100], vec![3, 300], vec![4, 400]]])?;
    Ok(test_context([left, right]))
}

fn joined(kind: JoinKind) -> SelectQuery {
    SelectQuery::new()
        .select([col("k"), col("a"), col("b")])
        .from_table("l")
        .join(kind, TableExpr::Table("r".to_string()), ["k"])
}

#[test]
fn inner_join() -> Result<()> {
    let ctx = join_ctx()?;
    let output = run(joined(JoinKind::Inner), &ctx)?;
    assert_eq!(output.header.names(), vec!["k", "a", "b"]);
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 10, 100], &[3, 30, 300]]));
    assert_eq!(ctx.metrics.counter(names::JOIN_ROWS), 3);
    Ok(())
}

#[test]
fn left_join_fills_defaults() -> Result<()> {
    let output = run(joined(JoinKind::Left), &join_ctx()?)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 10, 100], &[2, 20, 0], &[3, 30, 300]]));
    Ok(())
}

#[test]
fn right_join_emits_non_joined_rows() -> Result<()> {
    let output = run(joined(JoinKind::Right), &join_ctx()?)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 10, 100], &[3, 30, 300], &[4, 0, 400]]));
    Ok(())
}

#[test]
fn full_join() -> Result<()> {
    let output = run(joined(JoinKind::Full), &join_ctx()?)?;
    assert_rows_unordered_equal(
        &output.rows(),
        &int_rows(&[&[1, 10, 100], &[2, 20, 0], &[3, 30, 300], &[4, 0, 400]]),
    );
    Ok(())
}

#[test]
fn aggregation_over_a_right_join_sees_non_joined_rows() -> Result<()> {
    let query = SelectQuery::new()
        .select([sum(col("b")), count()])
        .from_table("l")
        .join(JoinKind::Right, TableExpr::Table("r".to_string()), ["k"]);
    let output = run(query, &join_ctx()?)?;
    assert_eq!(output.rows(), vec![vec![Value::Int(800), Value::UInt(3)]]);
    Ok(())
}

#[test]
fn join_with_subquery_on_the_right() -> Result<()> {
    let right = SelectQuery::new().select([col("k"), col("b")]).from_table("r").filter(col("b").gt(lit(100)));
    let query = SelectQuery::new()
        .select([col("a"), col("b")])
        .from_table("l")
        .join(JoinKind::Inner, TableExpr::Subquery(Box::new(right.into())), ["k"]);
    let output = run(query, &join_ctx()?)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[30, 300]]));
    Ok(())
}

#[test]
fn clashing_join_columns_are_rejected() -> Result<()> {
    let ctx = join_ctx()?;
    let query = SelectQuery::new().select([col("k")]).from_table("l").join(
        JoinKind::Inner,
        TableExpr::Table("l".to_string()),
        ["k"],
    );
    assert_error_kind!(InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute(), ErrorKind::Planning);
    Ok(())
}

#[test]
fn in_subquery() -> Result<()> {
    let ctx = join_ctx()?;
    let keys = SelectQuery::new().select([col("k")]).from_table("r");
    let query = SelectQuery::new().select([col("a")]).from_table("l").filter(col("k").in_subquery(keys.clone()));
    assert_rows_unordered_equal(&run(query, &ctx)?.rows(), &int_rows(&[&[10], &[30]]));
    assert_eq!(ctx.metrics.counter(names::SET_ROWS), 3);

    let query = SelectQuery::new().select([col("a")]).from_table("l").filter(col("k").not_in_subquery(keys));
    assert_rows_unordered_equal(&run(query, &ctx)?.rows(), &int_rows(&[&[20]]));
    Ok(())
}

#[test]
fn in_list() -> Result<()> {
    let query = SelectQuery::new()
        .select([col("a")])
        .from_table("l")
        .filter(col("k").in_list([Value::Int(1), Value::Int(2)]));
    assert_rows_unordered_equal(&run(query, &join_ctx()?)?.rows(), &int_rows(&[&[10], &[20]]));
    Ok(())
}

#[test]
fn sets_are_built_before_the_first_row() -> Result<()> {
    let recorder = HookRecorder::new();
    let ctx = join_ctx()?.with_hook(recorder.hook());
    let keys = SelectQuery::new().select([col("k")]).from_table("r");
    let query = SelectQuery::new().select([col("a")]).from_table("l").filter(col("k").in_subquery(keys));
    let io = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?;
    assert_eq!(recorder.count(HookPoint::CreatingSet), 0);
    io.read_all()?;
    assert_eq!(recorder.count(HookPoint::CreatingSet), 1);
    Ok(())
}

#[test]
fn failing_set_materialization_fails_the_query() -> Result<()> {
    let recorder = HookRecorder::new().fail_at(HookPoint::CreatingSet);
    let ctx = join_ctx()?.with_hook(recorder.hook());
    let result = InterpreterSelect::new(joined(JoinKind::Inner), ctx, ProcessingStage::Complete).execute()?.read_all();
    assert_error_kind!(result, ErrorKind::External);
    Ok(())
}
