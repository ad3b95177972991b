//! UNION ALL and FROM subqueries.

use anyhow::Result;
use blockflow::query::*;
use blockflow::testing::{assert_rows_equal, assert_rows_unordered_equal, int_rows, memory_table, test_context};
use blockflow::{ErrorKind, InterpreterSelect, InterpreterSelectWithUnion, ProcessingStage, QueryContext};

#[macro_use]
mod macros;

fn ctx() -> Result<QueryContext> {
    let a = memory_table("a", &["x", "y"], vec![vec![vec![1, 10], vec![2, 20]]])?;
    let b = memory_table("b", &["p", "q"], vec![vec![vec![3, 30]], vec![vec![4, 40]]])?;
    Ok(test_context([a, b]))
}

fn from_a() -> SelectQuery {
    SelectQuery::new().select([col("x"), col("y")]).from_table("a")
}

fn from_b() -> SelectQuery {
    SelectQuery::new().select([col("p"), col("q")]).from_table("b")
}

#[test]
fn union_all_concatenates_under_the_first_names() -> Result<()> {
    let query = SelectWithUnionQuery::new([from_a()]).union_all(from_b());
    let output = InterpreterSelectWithUnion::new(query, ctx()?, ProcessingStage::Complete).execute()?.read_all()?;
    assert_eq!(output.header.names(), vec!["x", "y"]);
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 10], &[2, 20], &[3, 30], &[4, 40]]));
    Ok(())
}

#[test]
fn union_all_keeps_duplicates() -> Result<()> {
    let query = SelectWithUnionQuery::new([from_a(), from_a()]);
    let output = InterpreterSelectWithUnion::new(query, ctx()?, ProcessingStage::Complete).execute()?.read_all()?;
    assert_eq!(output.row_count(), 4);
    Ok(())
}

#[test]
fn union_all_with_different_column_counts_is_rejected() -> Result<()> {
    let narrow = SelectQuery::new().select([col("p")]).from_table("b");
    let query = SelectWithUnionQuery::new([from_a(), narrow]);
    let interpreter = InterpreterSelectWithUnion::new(query, ctx()?, ProcessingStage::Complete);
    assert_error_kind!(interpreter.sample_header(), ErrorKind::Planning);
    assert_error_kind!(interpreter.execute(), ErrorKind::Planning);
    Ok(())
}

#[test]
fn order_and_limit_over_a_union_subquery() -> Result<()> {
    let union = SelectWithUnionQuery::new([from_a(), from_b()]);
    let query = SelectQuery::new().select([col("y")]).from_subquery(union).order_by([col("y").desc()]).limit(3);
    let output = InterpreterSelect::new(query, ctx()?, ProcessingStage::Complete).execute()?.read_all()?;
    assert_rows_equal(&output.rows(), &int_rows(&[&[40], &[30], &[20]]));
    Ok(())
}

#[test]
fn outer_query_prunes_subquery_columns() -> Result<()> {
    let inner = SelectQuery::new()
        .select([col("x"), col("y").multiply(lit(2)).alias("twice"), col("y").divide(lit(0)).alias("unused")])
        .from_table("a");
    let query = SelectQuery::new().select([col("twice")]).from_subquery(inner.clone());
    let analysis =
        InterpreterSelectWithUnion::new(inner.into(), ctx()?, ProcessingStage::Complete)
            .required_result_columns(vec!["twice".to_string()])
            .analysis()?;
    assert_eq!(analysis[0].selected_columns, vec!["twice"]);

    let output = InterpreterSelect::new(query, ctx()?, ProcessingStage::Complete).execute()?.read_all()?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[20], &[40]]));
    Ok(())
}

#[test]
fn required_columns_map_by_position_across_selects() -> Result<()> {
    let union = SelectWithUnionQuery::new([from_a(), from_b()]);
    let interpreter = InterpreterSelectWithUnion::new(union, ctx()?, ProcessingStage::Complete)
        .required_result_columns(vec!["y".to_string()]);
    let plans = interpreter.analysis()?;
    assert_eq!(plans[0].selected_columns, vec!["y"]);
    assert_eq!(plans[1].selected_columns, vec!["q"]);
    assert_eq!(interpreter.sample_header()?.names(), vec!["y"]);
    Ok(())
}

#[test]
fn aggregation_over_a_union() -> Result<()> {
    let union = SelectWithUnionQuery::new([from_a(), from_b()]);
    let query = SelectQuery::new().select([sum(col("x")), count()]).from_subquery(union);
    let output = InterpreterSelect::new(query, ctx()?, ProcessingStage::Complete).execute()?.read_all()?;
    assert_eq!(output.rows(), vec![vec![blockflow::Value::Int(10), blockflow::Value::UInt(4)]]);
    Ok(())
}
