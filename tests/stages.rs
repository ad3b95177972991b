//! Stage splitting, distributed tables and planning-time checks.

use anyhow::Result;
use blockflow::metrics::names;
use blockflow::query::*;
use blockflow::settings::Settings;
use blockflow::storage::{
    AliasColumn, ColumnsDescription, DistributedTable, MemoryTable, SelectQueryInfo, Storage, TableLock,
};
use blockflow::streams::{BlocksStream, BoxedStream};
use blockflow::testing::{
    assert_rows_equal, assert_rows_unordered_equal, context_with, int_block, int_header, int_rows, memory_table,
    test_context,
};
use blockflow::{
    DataType, ErrorKind, InterpreterSelect, ProcessingStage, QueryContext, QueryError, QueryOutput, Value,
};
use std::sync::Arc;

#[macro_use]
mod macros;

fn run(query: SelectQuery, ctx: &QueryContext) -> Result<QueryOutput> {
    Ok(InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute()?.read_all()?)
}

/// `(k, v)` spread over two shards: `(1,10), (2,5)` and `(1,20), (3,1)`.
fn distributed(settings: Settings) -> Result<QueryContext> {
    let a = memory_table("shard_a", &["k", "v"], vec![vec![vec![1, 10], vec![2, 5]]])?;
    let b = memory_table("shard_b", &["k", "v"], vec![vec![vec![1, 20]], vec![vec![3, 1]]])?;
    let table: Arc<dyn Storage> = Arc::new(DistributedTable::new("dist", vec![a, b])?);
    Ok(context_with(settings, [table]))
}

fn sum_by_k() -> SelectQuery {
    SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("dist").group_by([col("k")])
}

#[test]
fn mergeable_state_to_mergeable_state_is_rejected() -> Result<()> {
    let ctx = distributed(Settings::default())?;
    let result = InterpreterSelect::new(sum_by_k(), ctx, ProcessingStage::WithMergeableState).execute();
    assert_error_kind!(result, ErrorKind::Configuration);
    Ok(())
}

#[test]
fn distributed_group_by_merges_shard_states() -> Result<()> {
    let ctx = distributed(Settings::default())?;
    let output = run(sum_by_k(), &ctx)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 30], &[2, 5], &[3, 1]]));
    Ok(())
}

#[test]
fn distributed_count_adds_shard_counts() -> Result<()> {
    let ctx = distributed(Settings::default())?;
    let query = SelectQuery::new().select([count()]).from_table("dist");
    assert_eq!(run(query, &ctx)?.rows(), vec![vec![Value::UInt(4)]]);
    Ok(())
}

#[test]
fn distributed_group_by_memory_efficient_merge() -> Result<()> {
    let settings = Settings {
        distributed_aggregation_memory_efficient: true,
        aggregation_memory_efficient_merge_threads: 2,
        ..Settings::default()
    };
    let ctx = distributed(settings)?;
    let output = run(sum_by_k().order_by([col("k").asc()]), &ctx)?;
    assert_rows_equal(&output.rows(), &int_rows(&[&[1, 30], &[2, 5], &[3, 1]]));
    Ok(())
}

#[test]
fn distributed_order_by_limit() -> Result<()> {
    let ctx = distributed(Settings::default())?;
    let query = SelectQuery::new().select([col("v")]).from_table("dist").order_by([col("v").desc()]).limit(2);
    let output = run(query, &ctx)?;
    assert_rows_equal(&output.rows(), &int_rows(&[&[20], &[10]]));
    Ok(())
}

#[test]
fn coordinator_plan_skips_the_first_stage() -> Result<()> {
    let ctx = distributed(Settings::default())?;
    let plan = InterpreterSelect::new(sum_by_k(), ctx, ProcessingStage::Complete).analysis()?;
    assert!(!plan.boundary.first_stage);
    assert!(plan.boundary.second_stage);
    assert_eq!(plan.boundary.from, ProcessingStage::WithMergeableState);
    Ok(())
}

#[test]
fn shard_stage_produces_mergeable_states() -> Result<()> {
    let table = memory_table("t", &["k", "v"], vec![vec![vec![1, 10], vec![1, 20]]])?;
    let ctx = test_context([table]);
    let query = SelectQuery::new().select([col("k"), sum(col("v"))]).from_table("t").group_by([col("k")]);
    let output =
        InterpreterSelect::new(query, ctx, ProcessingStage::WithMergeableState).execute()?.read_all()?;
    assert_eq!(output.header.names(), vec!["k", "sum(v)"]);
    assert!(matches!(output.header.fields()[1].data_type, DataType::AggregateState(_)));
    assert_eq!(output.row_count(), 1);
    Ok(())
}

#[test]
fn fetch_columns_stage_returns_source_columns() -> Result<()> {
    let table = memory_table("t", &["k", "v"], vec![vec![vec![1, 10], vec![2, 20]]])?;
    let ctx = test_context([table]);
    let query = SelectQuery::new().select([col("v").plus(lit(1))]).from_table("t");
    let output = InterpreterSelect::new(query, ctx, ProcessingStage::FetchColumns).execute()?.read_all()?;
    assert_eq!(output.header.names(), vec!["v"]);
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[10], &[20]]));
    Ok(())
}

#[test]
fn subquery_depth_is_capped() -> Result<()> {
    let table = memory_table("t", &["v"], vec![vec![vec![1]]])?;
    let ctx = context_with(Settings { max_subquery_depth: 2, ..Settings::default() }, [table]);
    let mut query = SelectQuery::new().select([col("v")]).from_table("t");
    for _ in 0..3 {
        query = SelectQuery::new().select([col("v")]).from_subquery(query);
    }
    let result = InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute();
    assert!(matches!(result, Err(QueryError::TooDeepSubqueries { max: 2, .. })));

    let shallow = SelectQuery::new()
        .select([col("v")])
        .from_subquery(SelectQuery::new().select([col("v")]).from_table("t"));
    assert_rows_equal(&run(shallow, &ctx)?.rows(), &int_rows(&[&[1]]));
    Ok(())
}

#[test]
fn column_cap_counts_required_columns() -> Result<()> {
    let table = memory_table("t", &["a", "b", "c"], vec![vec![vec![1, 2, 3]]])?;
    let ctx = context_with(Settings { max_columns_to_read: 2, ..Settings::default() }, [table]);

    let wide = SelectQuery::new().select([col("a"), col("b"), col("c")]).from_table("t");
    let result = InterpreterSelect::new(wide.clone(), ctx.clone(), ProcessingStage::Complete).execute();
    assert!(matches!(result, Err(QueryError::TooManyColumns { requested: 3, max: 2 })));

    // The dry run does not enforce the cap.
    let header = InterpreterSelect::new(wide, ctx.clone(), ProcessingStage::Complete).sample_header()?;
    assert_eq!(header.names(), vec!["a", "b", "c"]);

    let narrow = SelectQuery::new().select([col("a").plus(col("c"))]).from_table("t");
    assert_rows_equal(&run(narrow, &ctx)?.rows(), &int_rows(&[&[4]]));
    Ok(())
}

#[test]
fn sample_header_reads_nothing() -> Result<()> {
    let table = memory_table("t", &["k", "v"], vec![vec![vec![1, 10], vec![2, 20]]])?;
    let ctx = test_context([table]);
    let query = SelectQuery::new()
        .select([col("k"), sum(col("v")).alias("total")])
        .from_table("t")
        .group_by([col("k")])
        .order_by([col("total").desc()]);
    let header = InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).sample_header()?;
    assert_eq!(header.names(), vec!["k", "total"]);
    assert_eq!(header.fields()[1].data_type, DataType::Int64);
    assert_eq!(ctx.metrics.counter(names::ROWS_READ), 0);
    Ok(())
}

#[test]
fn sample_final_and_prewhere_need_storage_support() -> Result<()> {
    let ctx = test_context([memory_table("t", &["v"], vec![vec![vec![1]]])?]);
    let base = SelectQuery::new().select([col("v")]).from_table("t");
    for query in [base.clone().sample(0.5), base.clone().final_(), base.prewhere(col("v").gt(lit(0)))] {
        let result = InterpreterSelect::new(query, ctx.clone(), ProcessingStage::Complete).execute();
        assert_error_kind!(result, ErrorKind::Configuration);
    }
    Ok(())
}

#[test]
fn prewhere_filters_while_reading() -> Result<()> {
    let names = ["k", "v"];
    let block = int_block(&names, &[&[1, 1], &[2, 7], &[3, 9]])?;
    let table: Arc<dyn Storage> = Arc::new(MemoryTable::new("t", int_header(&names), vec![block])?.with_prewhere());
    let ctx = test_context([table]);
    let query = SelectQuery::new().select([col("k")]).from_table("t").prewhere(col("v").gt(lit(5)));
    let output = run(query, &ctx)?;
    assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[2], &[3]]));
    Ok(())
}

#[test]
fn alias_columns_are_computed_from_ordinary_ones() -> Result<()> {
    let block = int_block(&["v"], &[&[1], &[2]])?;
    let table = MemoryTable::new("t", int_header(&["v"]), vec![block])?.with_alias(AliasColumn {
        name: "double".to_string(),
        data_type: DataType::Int64,
        expr: col("v").multiply(lit(2)),
    });
    let ctx = test_context([Arc::new(table) as Arc<dyn Storage>]);
    let query = SelectQuery::new().select([col("double")]).from_table("t").order_by([col("double").asc()]);
    let output = run(query, &ctx)?;
    assert_rows_equal(&output.rows(), &int_rows(&[&[2], &[4]]));
    Ok(())
}

/// Announces `WithMergeableState` but delivers raw columns.
#[derive(Debug)]
struct LyingStorage {
    columns: ColumnsDescription,
    lock: TableLock,
}

impl Storage for LyingStorage {
    fn name(&self) -> &str {
        "liar"
    }

    fn columns(&self) -> ColumnsDescription {
        self.columns.clone()
    }

    fn processing_stage(&self, _to_stage: ProcessingStage) -> ProcessingStage {
        ProcessingStage::WithMergeableState
    }

    fn read(
        &self,
        columns: &[String],
        _info: &SelectQueryInfo,
        _ctx: &QueryContext,
        _to_stage: ProcessingStage,
        _max_block_size: usize,
        _num_streams: usize,
    ) -> blockflow::Result<(Vec<BoxedStream>, ProcessingStage)> {
        let header = self.sample_header(columns)?;
        Ok((vec![Box::new(BlocksStream::new(header, Vec::new()))], ProcessingStage::FetchColumns))
    }

    fn table_lock(&self) -> &TableLock {
        &self.lock
    }
}

#[test]
fn storage_stage_mismatch_is_a_logical_error() -> Result<()> {
    let liar = LyingStorage {
        columns: ColumnsDescription { ordinary: int_header(&["v"]), aliases: Vec::new() },
        lock: TableLock::new(),
    };
    let ctx = test_context([Arc::new(liar) as Arc<dyn Storage>]);
    let query = SelectQuery::new().select([col("v")]).from_table("liar");
    let result = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute();
    assert_error_kind!(result, ErrorKind::LogicalInconsistency);
    Ok(())
}

#[test]
fn table_lock_is_released_after_the_query() -> Result<()> {
    let table = Arc::new(MemoryTable::new("t", int_header(&["v"]), vec![int_block(&["v"], &[&[1]])?])?);
    let ctx = test_context([Arc::clone(&table) as Arc<dyn Storage>]);
    let io = InterpreterSelect::new(SelectQuery::new().select([col("v")]).from_table("t"), ctx, ProcessingStage::Complete)
        .execute()?;
    assert!(table.table_lock().readers() >= 1);
    io.read_all()?;
    assert_eq!(table.table_lock().readers(), 0);
    Ok(())
}
