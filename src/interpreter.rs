//! Pipeline builder.
//!
//! [`InterpreterSelect`] turns one [`SelectQuery`] into a tree of
//! [`BlockStream`](crate::streams::BlockStream)s. It resolves the source (a
//! given input stream, a storage, or a FROM subquery), asks the storage how
//! far it processes the query itself, compiles the query with the [`ExpressionAnalyzer`] and then
//! attaches operators stage by stage:
//!
//! * **fetch** -- source streams with read caps, the table lock and alias columns;
//! * **first stage** -- join, where, partial aggregation or the select
//!   expression, plus ORDER BY and LIMIT pushed down to a non-final stage;
//! * **second stage** -- merge of partial aggregates, totals and having,
//!   order or merge of sorted chains, distinct, limit by, the final
//!   projection, extremes and the final limit;
//! * **sets** -- materialization of `IN` subqueries and join tables before the
//!   first row is read.
//!
//! [`InterpreterSelectWithUnion`] runs the selects of a `UNION ALL` and
//! concatenates them under the first select's column names.

use crate::aggregate::{
    AggregatingStream, AggregatorParams, MergingAggregatedMemoryEfficientStream, MergingAggregatedStream,
    ParallelAggregatingStream,
};
use crate::block::{Block, Header};
use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::expression::{ExpressionActions, ExpressionProgram, SharedProgram};
use crate::metrics::MetricsCollector;
use crate::pipeline::Pipeline;
use crate::planner::{alias_actions, CompiledPlan, ExpressionAnalyzer};
use crate::query::{SelectQuery, SelectWithUnionQuery, TableExpr};
use crate::settings::{OverflowMode, Settings};
use crate::stage::{analyze_stages, ProcessingStage};
use crate::storage::{SelectQueryInfo, Storage, TableLockHolder, ONE_TABLE};
use crate::streams::{
    default_extremes, AsynchronousStream, BoxedStream, ConcatStream, ConvertingStream, CreatingSetsStream,
    DistinctSortedStream, DistinctStream, ExpressionStream, ExtremesStream, FilterStream, LimitByStream, LimitStream,
    LimitsStream, LocalLimits, MergeSortingStream, MergingSortedStream, NonJoinedStream, NullStream,
    PartialSortingStream, ProgressCounter, TotalsHavingStream, UnionStream,
};
use crate::types::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// The built stream of a query.
pub struct BlockIo {
    pub stream: BoxedStream,
    /// Set for outermost queries, which time themselves.
    metrics: Option<MetricsCollector>,
    /// Report default extremes when no chain saw a row.
    extremes: bool,
}

/// Everything a query produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutput {
    pub header: Header,
    pub blocks: Vec<Block>,
    pub totals: Option<Block>,
    pub extremes: Option<Block>,
}

impl QueryOutput {
    /// All result rows, in output order.
    #[must_use]
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.blocks.iter().flat_map(|b| (0..b.rows()).map(move |i| b.row(i))).collect()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.blocks.iter().map(Block::rows).sum()
    }
}

impl BlockIo {
    fn new(stream: BoxedStream, ctx: &QueryContext, depth: usize) -> Self {
        let outermost = depth == 0;
        Self {
            stream,
            metrics: outermost.then(|| ctx.metrics.clone()),
            extremes: outermost && ctx.settings.extremes,
        }
    }

    /// Pull the stream to the end and collect totals and extremes.
    ///
    /// # Errors
    /// The first error raised anywhere in the stream tree.
    pub fn read_all(mut self) -> Result<QueryOutput> {
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }
        let header = self.stream.header();
        let mut blocks = Vec::new();
        while let Some(block) = self.stream.read()? {
            if !block.is_empty() {
                blocks.push(block);
            }
        }
        let totals = self.stream.totals()?;
        let extremes = self.stream.extremes().or_else(|| self.extremes.then(|| default_extremes(&header)));
        if let Some(metrics) = &self.metrics {
            metrics.record_end();
        }
        Ok(QueryOutput { header, blocks, totals, extremes })
    }
}

enum SourceKind {
    Input,
    Subquery(SelectWithUnionQuery),
    Storage { storage: Arc<dyn Storage>, lock: Arc<TableLockHolder> },
}

struct ResolvedSource {
    kind: SourceKind,
    columns: Header,
}

impl ResolvedSource {
    fn storage(&self) -> Option<&Arc<dyn Storage>> {
        match &self.kind {
            SourceKind::Storage { storage, .. } => Some(storage),
            _ => None,
        }
    }
}

/// Builds the pipeline of one select.
pub struct InterpreterSelect {
    query: SelectQuery,
    ctx: QueryContext,
    to_stage: ProcessingStage,
    subquery_depth: usize,
    input: Option<BoxedStream>,
    input_header: Option<Header>,
    storage: Option<Arc<dyn Storage>>,
    required_result_columns: Vec<String>,
}

impl InterpreterSelect {
    #[must_use]
    pub fn new(query: SelectQuery, ctx: QueryContext, to_stage: ProcessingStage) -> Self {
        Self {
            query,
            ctx,
            to_stage,
            subquery_depth: 0,
            input: None,
            input_header: None,
            storage: None,
            required_result_columns: Vec::new(),
        }
    }

    /// Read from `input` instead of the FROM clause.
    #[must_use]
    pub fn with_input(mut self, input: BoxedStream) -> Self {
        self.input_header = Some(input.header());
        self.input = Some(input);
        self
    }

    /// Read from `storage` instead of the table the FROM clause names.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Only these result columns are read by the consumer.
    #[must_use]
    pub fn required_result_columns(mut self, columns: Vec<String>) -> Self {
        self.required_result_columns = columns;
        self
    }

    #[must_use]
    pub const fn subquery_depth(mut self, depth: usize) -> Self {
        self.subquery_depth = depth;
        self
    }

    /// Drop `WITH TOTALS`; the enclosing query aggregates anyway.
    #[must_use]
    pub fn ignore_with_totals(mut self) -> Self {
        self.query.with_totals = false;
        self
    }

    /// Build the pipeline and collapse it to one stream.
    ///
    /// # Errors
    /// Configuration, planning and resource errors raised while building.
    pub fn execute(mut self) -> Result<BlockIo> {
        let input = self.input.take();
        let (pipeline, max_streams) = self.execute_impl(input, false)?;
        let pipeline = Builder::union(pipeline, max_streams, &self.ctx);
        let header = pipeline.header();
        let mut stream: BoxedStream = match pipeline.streams.into_iter().next() {
            Some(stream) => stream,
            None => Box::new(NullStream::new(header)),
        };
        let result_limits = self.ctx.settings.result_limits();
        if self.subquery_depth == 0 && !result_limits.is_unlimited() {
            stream = Box::new(LimitsStream::for_result(stream, result_limits, &self.ctx));
        }
        Ok(BlockIo::new(stream, &self.ctx, self.subquery_depth))
    }

    /// Build the pipeline without collapsing its chains.
    ///
    /// # Errors
    /// As for [`Self::execute`].
    pub fn execute_with_multiple_streams(mut self) -> Result<Vec<BoxedStream>> {
        let input = self.input.take();
        let (mut pipeline, max_streams) = self.execute_impl(input, false)?;
        if !pipeline.streams_with_non_joined_data.is_empty() {
            pipeline = Builder::union(pipeline, max_streams, &self.ctx);
        }
        Ok(pipeline.streams)
    }

    /// Result header, from a dry run over empty sources.
    ///
    /// # Errors
    /// Planning errors of the query.
    pub fn sample_header(&self) -> Result<Header> {
        Ok(self.execute_impl(None, true)?.0.header())
    }

    /// The compiled plan for the stage split this query would run with.
    ///
    /// # Errors
    /// As for [`Self::execute`].
    pub fn analysis(&self) -> Result<CompiledPlan> {
        let source = self.resolve_source(false)?;
        let from_stage = source.storage().map_or(ProcessingStage::FetchColumns, |s| s.processing_stage(self.to_stage));
        self.analyze(&source, from_stage, false)
    }

    fn subquery_settings(&self) -> Settings {
        let mut settings = self.ctx.settings.clone();
        settings.max_result_rows = 0;
        settings.max_result_bytes = 0;
        settings.extremes = false;
        settings
    }

    fn resolve_source(&self, only_analyze: bool) -> Result<ResolvedSource> {
        let max_depth = self.ctx.settings.max_subquery_depth;
        if max_depth != 0 && self.subquery_depth > max_depth {
            return Err(QueryError::TooDeepSubqueries { depth: self.subquery_depth, max: max_depth });
        }

        let source = if let Some(header) = &self.input_header {
            ResolvedSource { kind: SourceKind::Input, columns: header.clone() }
        } else if let (None, Some(TableExpr::Subquery(subquery))) = (&self.storage, &self.query.from) {
            let columns = InterpreterSelectWithUnion::new(
                (**subquery).clone(),
                self.ctx.with_settings(self.subquery_settings()),
                ProcessingStage::Complete,
            )
            .subquery_depth(self.subquery_depth + 1)
            .sample_header()?;
            ResolvedSource { kind: SourceKind::Subquery((**subquery).clone()), columns }
        } else {
            let storage = match (&self.storage, &self.query.from) {
                (Some(storage), _) => Arc::clone(storage),
                (None, Some(TableExpr::Table(name))) => self.ctx.catalog.get(name)?,
                (None, _) => self.ctx.catalog.get(ONE_TABLE)?,
            };
            let lock = storage.lock_for_share();
            ResolvedSource { columns: storage.columns().all(), kind: SourceKind::Storage { storage, lock } }
        };

        if !only_analyze {
            let storage = source.storage();
            let unsupported = |supported: fn(&dyn Storage) -> bool| !storage.is_some_and(|s| supported(s.as_ref()));
            if self.query.sample.is_some() && unsupported(|s| s.supports_sampling()) {
                return Err(QueryError::Configuration("storage does not support sampling".to_string()));
            }
            if self.query.final_ && unsupported(|s| s.supports_final()) {
                return Err(QueryError::Configuration("storage does not support FINAL".to_string()));
            }
            if self.query.prewhere.is_some() && unsupported(|s| s.supports_prewhere()) {
                return Err(QueryError::Configuration("storage does not support PREWHERE".to_string()));
            }
        }
        Ok(source)
    }

    fn analyze(&self, source: &ResolvedSource, from_stage: ProcessingStage, dry_run: bool) -> Result<CompiledPlan> {
        let boundary = analyze_stages(from_stage, self.to_stage)?;
        let storage_columns = source.storage().filter(|s| s.supports_prewhere()).map(|s| s.columns());
        let plan = ExpressionAnalyzer::new(
            &self.query,
            source.columns.clone(),
            storage_columns,
            &self.required_result_columns,
            &self.ctx,
            self.subquery_depth,
        )?
        .analyze(boundary)?;

        let max_columns = self.ctx.settings.max_columns_to_read;
        if !dry_run && max_columns != 0 && plan.required_source_columns.len() > max_columns {
            return Err(QueryError::TooManyColumns { requested: plan.required_source_columns.len(), max: max_columns });
        }
        Ok(plan)
    }

    /// The built pipeline and the stream count the union steps use.
    fn execute_impl(&self, input: Option<BoxedStream>, dry_run: bool) -> Result<(Pipeline, usize)> {
        let source = self.resolve_source(dry_run)?;
        let from_stage = if dry_run {
            ProcessingStage::FetchColumns
        } else {
            source.storage().map_or(ProcessingStage::FetchColumns, |s| s.processing_stage(self.to_stage))
        };
        let plan = self.analyze(&source, from_stage, dry_run)?;
        trace!(from_stage = %from_stage, to_stage = %self.to_stage, depth = self.subquery_depth, "building pipeline");

        let mut builder = Builder {
            query: &self.query,
            ctx: &self.ctx,
            settings: &self.ctx.settings,
            plan: &plan,
            max_streams: self.ctx.settings.max_threads,
            depth: self.subquery_depth,
            to_stage: self.to_stage,
        };
        let mut pipeline = self.fetch_columns(&mut builder, &source, input, from_stage, dry_run)?;
        if self.to_stage > ProcessingStage::FetchColumns {
            pipeline = builder.build_stages(pipeline)?;
            if !dry_run && !plan.subqueries_for_sets.is_empty() {
                pipeline = builder.creating_sets(pipeline)?;
            }
        }
        Ok((pipeline, builder.max_streams))
    }

    fn fetch_columns(
        &self,
        builder: &mut Builder<'_>,
        source: &ResolvedSource,
        input: Option<BoxedStream>,
        from_stage: ProcessingStage,
        dry_run: bool,
    ) -> Result<Pipeline> {
        let plan = builder.plan;
        let mut required = plan.required_source_columns.clone();
        let aliases = match source.storage() {
            Some(storage) => alias_actions(&storage.columns(), &required)?,
            None => None,
        };
        if let Some(actions) = &aliases {
            required = actions.input().names();
        }

        let mut pipeline = match &source.kind {
            SourceKind::Input => match input {
                Some(stream) if !dry_run => Pipeline::new(vec![stream]),
                _ => Pipeline::new(vec![Box::new(NullStream::new(source.columns.clone()))]),
            },
            SourceKind::Subquery(subquery) => {
                let mut interpreter = InterpreterSelectWithUnion::new(
                    subquery.clone(),
                    self.ctx.with_settings(self.subquery_settings()),
                    ProcessingStage::Complete,
                )
                .subquery_depth(self.subquery_depth + 1)
                .required_result_columns(required.clone());
                if plan.need_aggregate {
                    interpreter = interpreter.ignore_with_totals();
                }
                if dry_run {
                    Pipeline::new(vec![Box::new(NullStream::new(interpreter.sample_header()?))])
                } else {
                    Pipeline::new(interpreter.execute_with_multiple_streams()?)
                }
            }
            SourceKind::Storage { storage, lock } => {
                if dry_run {
                    Pipeline::new(vec![Box::new(NullStream::new(storage.sample_header(&required)?))])
                } else {
                    self.read_storage(builder, storage, lock, &required, from_stage)?
                }
            }
        };

        if from_stage == ProcessingStage::FetchColumns
            && let Some(actions) = aliases
        {
            let program: SharedProgram = Arc::new(actions);
            pipeline = pipeline.transform(|s| Ok(Box::new(ExpressionStream::new(s, Arc::clone(&program))?)))?;
        }
        Ok(pipeline)
    }

    fn read_storage(
        &self,
        builder: &mut Builder<'_>,
        storage: &Arc<dyn Storage>,
        lock: &Arc<TableLockHolder>,
        columns: &[String],
        from_stage: ProcessingStage,
    ) -> Result<Pipeline> {
        let settings = &self.ctx.settings;
        let query = &self.query;
        let mut max_block_size = settings.max_block_size;
        let mut max_streams = settings.max_threads;
        if storage.is_remote() {
            max_streams = settings.max_distributed_connections;
        }

        let (limit_length, limit_offset) = query.limit_length_and_offset();
        let plain_limit = !query.distinct
            && query.prewhere.is_none()
            && query.where_.is_none()
            && query.group_by.is_empty()
            && query.having.is_none()
            && query.order_by.is_empty()
            && query.limit_by.is_none()
            && query.limit.is_some()
            && !builder.plan.need_aggregate
            && limit_length + limit_offset < max_block_size;
        if plain_limit {
            max_block_size = limit_length + limit_offset;
            max_streams = 1;
        }
        if max_streams == 0 {
            return Err(QueryError::Configuration("zero number of streams requested".to_string()));
        }
        if max_streams > 1 && !storage.is_remote() {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
            let scaled = (max_streams as f64 * settings.max_streams_to_max_threads_ratio) as usize;
            max_streams = scaled.max(1);
        }
        builder.max_streams = max_streams;

        let info = SelectQueryInfo { query: query.clone(), prewhere: builder.plan.prewhere.clone() };
        let (streams, stage) = storage.read(columns, &info, &self.ctx, self.to_stage, max_block_size, max_streams)?;
        if stage != from_stage {
            return Err(QueryError::LogicalInconsistency(format!(
                "storage {} delivered stage {stage}, announced {from_stage}",
                storage.name()
            )));
        }
        debug!(table = storage.name(), streams = streams.len(), max_block_size, "reading storage");

        let streams = if streams.is_empty() {
            vec![Box::new(NullStream::new(storage.sample_header(columns)?)) as BoxedStream]
        } else {
            streams
        };
        let limits = LocalLimits::for_read(settings, self.to_stage == ProcessingStage::Complete);
        let progress = ProgressCounter::new();
        Pipeline::new(streams).transform(|s| {
            Ok(Box::new(
                LimitsStream::new(s, limits, Arc::clone(&progress), &self.ctx).with_table_lock(Some(Arc::clone(lock))),
            ))
        })
    }
}

/// Per-execution state of the stage wiring.
struct Builder<'a> {
    query: &'a SelectQuery,
    ctx: &'a QueryContext,
    settings: &'a Settings,
    plan: &'a CompiledPlan,
    max_streams: usize,
    depth: usize,
    to_stage: ProcessingStage,
}

fn program(actions: &Arc<ExpressionActions>) -> SharedProgram {
    Arc::clone(actions) as SharedProgram
}

fn missing(step: &str) -> QueryError {
    QueryError::LogicalInconsistency(format!("{step} expression is missing from the plan"))
}

impl Builder<'_> {
    #[allow(clippy::too_many_lines)]
    fn build_stages(&mut self, mut pipeline: Pipeline) -> Result<Pipeline> {
        let plan = self.plan;
        let query = self.query;
        let settings = self.settings;
        let (limit_length, _) = query.limit_length_and_offset();
        let has_limit = query.limit.is_some();

        let aggregate_overflow_row = plan.need_aggregate
            && query.with_totals
            && settings.max_rows_to_group_by != 0
            && settings.group_by_overflow_mode == OverflowMode::Any
            && settings.totals_mode != crate::settings::TotalsMode::AfterHavingExclusive;
        let aggregate_final =
            plan.need_aggregate && self.to_stage > ProcessingStage::WithMergeableState && !query.with_totals;

        if plan.boundary.first_stage {
            if let Some(join_program) = &plan.before_join {
                if let Some(join) = &plan.join
                    && join.kind().emits_non_joined()
                {
                    let header = join_program.output_header(&pipeline.header())?;
                    pipeline
                        .streams_with_non_joined_data
                        .push(Box::new(NonJoinedStream::new(Arc::clone(join), header, settings.max_block_size)));
                }
                let join_program = program(join_program);
                pipeline = pipeline
                    .transform_main(|s| Ok(Box::new(ExpressionStream::new(s, Arc::clone(&join_program))?)))?;
            }
            if let Some(where_program) = &plan.before_where {
                let column = plan.where_column.clone().ok_or_else(|| missing("where"))?;
                let where_program = program(where_program);
                pipeline = pipeline.transform(|s| {
                    Ok(Box::new(FilterStream::new(s, Arc::clone(&where_program), column.clone())?))
                })?;
            }
            if plan.need_aggregate {
                pipeline = self.aggregation(pipeline, aggregate_overflow_row, aggregate_final)?;
            } else {
                pipeline = self.expression(pipeline, &plan.before_order_and_select)?;
                pipeline = self.distinct(pipeline, true)?;
            }

            if !plan.boundary.second_stage && !plan.need_aggregate && !plan.has_having {
                if plan.has_order_by {
                    pipeline = self.order(pipeline)?;
                }
                if plan.has_order_by && has_limit {
                    pipeline = self.distinct(pipeline, false)?;
                }
                if has_limit {
                    pipeline = self.pre_limit(pipeline)?;
                }
            }
        }

        if plan.boundary.second_stage {
            let need_second_distinct_pass;
            if plan.need_aggregate {
                if !plan.boundary.first_stage {
                    pipeline = self.merge_aggregated(pipeline, aggregate_overflow_row, aggregate_final)?;
                }
                if !aggregate_final {
                    pipeline = self.totals_and_having(pipeline, plan.has_having, aggregate_overflow_row)?;
                } else if plan.has_having {
                    pipeline = self.having(pipeline)?;
                }
                pipeline = self.expression(pipeline, &plan.before_order_and_select)?;
                pipeline = self.distinct(pipeline, true)?;
                need_second_distinct_pass = query.distinct && pipeline.has_more_than_one_stream();
            } else {
                need_second_distinct_pass = query.distinct && pipeline.has_more_than_one_stream();
                if query.with_totals && !aggregate_final {
                    pipeline = self.totals_and_having(pipeline, false, aggregate_overflow_row)?;
                }
            }

            if plan.has_order_by {
                if !plan.boundary.first_stage && !plan.need_aggregate && !(query.with_totals && !aggregate_final) {
                    pipeline = self.merge_sorted(pipeline)?;
                } else {
                    pipeline = self.order(pipeline)?;
                }
            }

            if has_limit
                && pipeline.has_more_than_one_stream()
                && !query.distinct
                && query.limit_by.is_none()
                && !settings.extremes
            {
                pipeline = self.pre_limit(pipeline)?;
            }

            let need_merge_streams = need_second_distinct_pass
                || has_limit
                || query.limit_by.is_some()
                || !pipeline.streams_with_non_joined_data.is_empty();
            if need_merge_streams {
                pipeline = Self::union(pipeline, self.max_streams, self.ctx);
            }
            if need_second_distinct_pass {
                pipeline = self.distinct(pipeline, false)?;
            }
            if let (Some(limit_by_program), Some(limit_by)) = (&plan.before_limit_by, &query.limit_by) {
                pipeline = self.expression(pipeline, limit_by_program)?;
                let columns = plan.limit_by_columns.clone();
                let length = limit_by.length;
                pipeline = pipeline.transform(|s| Ok(Box::new(LimitByStream::new(s, length, columns.clone()))))?;
            }
            pipeline = self.expression(pipeline, &plan.final_projection)?;
            if settings.extremes {
                pipeline = pipeline.transform(|s| Ok(Box::new(ExtremesStream::new(s))))?;
            }
            if has_limit {
                pipeline = self.limit(pipeline, limit_length)?;
            }
        }
        Ok(pipeline)
    }

    fn expression(&self, pipeline: Pipeline, actions: &Arc<ExpressionActions>) -> Result<Pipeline> {
        let shared = program(actions);
        pipeline.transform(|s| Ok(Box::new(ExpressionStream::new(s, Arc::clone(&shared))?)))
    }

    fn having(&self, pipeline: Pipeline) -> Result<Pipeline> {
        let actions = self.plan.before_having.as_ref().ok_or_else(|| missing("having"))?;
        let column = self.plan.having_column.clone().ok_or_else(|| missing("having"))?;
        let shared = program(actions);
        pipeline.transform(|s| Ok(Box::new(FilterStream::new(s, Arc::clone(&shared), column.clone())?)))
    }

    fn params(&self, src_header: Header, overflow_row: bool, allow_two_level: bool) -> Arc<AggregatorParams> {
        Arc::new(AggregatorParams::from_settings(
            src_header,
            self.plan.aggregation_keys.clone(),
            self.plan.aggregates.clone(),
            overflow_row,
            allow_two_level,
            self.settings,
            self.ctx.tmp_path(),
        ))
    }

    fn aggregation(&self, pipeline: Pipeline, overflow_row: bool, final_: bool) -> Result<Pipeline> {
        let actions = self.plan.before_aggregation.as_ref().ok_or_else(|| missing("aggregation"))?;
        let mut pipeline = self.expression(pipeline, actions)?;
        let allow_two_level = pipeline.streams.len() > 1 || self.settings.max_bytes_before_external_group_by != 0;
        let params = self.params(pipeline.header(), overflow_row, allow_two_level);
        let merge_threads = self.settings.memory_efficient_merge_threads();
        debug!(
            streams = pipeline.streams.len(),
            non_joined = pipeline.streams_with_non_joined_data.len(),
            allow_two_level,
            final_,
            overflow_row,
            "aggregating"
        );

        let non_joined = std::mem::take(&mut pipeline.streams_with_non_joined_data);
        let stream: BoxedStream = if pipeline.streams.len() > 1 {
            Box::new(ParallelAggregatingStream::new(
                std::mem::take(&mut pipeline.streams),
                non_joined,
                params,
                final_,
                self.max_streams,
                merge_threads,
                self.ctx,
            ))
        } else {
            let mut inputs = std::mem::take(&mut pipeline.streams);
            inputs.extend(non_joined);
            let input: BoxedStream = if inputs.len() == 1 {
                inputs.remove(0)
            } else {
                Box::new(ConcatStream::new(inputs))
            };
            Box::new(AggregatingStream::new(input, params, final_, self.ctx))
        };
        Ok(Pipeline::new(vec![stream]))
    }

    fn merge_aggregated(&self, pipeline: Pipeline, overflow_row: bool, final_: bool) -> Result<Pipeline> {
        let params = self.params(self.plan.aggregation_header.clone(), overflow_row, false);
        let stream: BoxedStream = if self.settings.distributed_aggregation_memory_efficient {
            let mut inputs = pipeline.streams;
            inputs.extend(pipeline.streams_with_non_joined_data);
            debug!(inputs = inputs.len(), final_, "merging partial aggregates memory-efficiently");
            Box::new(MergingAggregatedMemoryEfficientStream::new(
                inputs,
                params,
                final_,
                self.max_streams,
                self.settings.memory_efficient_merge_threads(),
                self.ctx,
            ))
        } else {
            let pipeline = Self::union(pipeline, self.max_streams, self.ctx);
            let input = Self::single(pipeline)?;
            debug!(final_, "merging partial aggregates");
            Box::new(MergingAggregatedStream::new(input, params, final_, self.settings.max_threads, self.ctx))
        };
        Ok(Pipeline::new(vec![stream]))
    }

    fn totals_and_having(&self, pipeline: Pipeline, has_having: bool, overflow_row: bool) -> Result<Pipeline> {
        let pipeline = Self::union(pipeline, self.max_streams, self.ctx);
        let input = Self::single(pipeline)?;
        let (expression, filter_column) = if has_having {
            let actions = self.plan.before_having.as_ref().ok_or_else(|| missing("having"))?;
            (Some(program(actions)), self.plan.having_column.clone())
        } else {
            (None, None)
        };
        let params = if self.plan.need_aggregate {
            self.params(self.plan.aggregation_header.clone(), overflow_row, false)
        } else {
            Arc::new(AggregatorParams::from_settings(
                input.header(),
                Vec::new(),
                Vec::new(),
                false,
                false,
                self.settings,
                self.ctx.tmp_path(),
            ))
        };
        let stream = TotalsHavingStream::new(
            input,
            params,
            overflow_row,
            expression,
            filter_column,
            self.settings.totals_mode,
            self.settings.totals_auto_threshold,
            self.ctx,
        )?;
        Ok(Pipeline::new(vec![Box::new(stream)]))
    }

    /// Row bound for sorting: `limit + offset` unless DISTINCT or LIMIT BY
    /// may still drop rows afterwards.
    fn sort_limit(&self) -> usize {
        let (length, offset) = self.query.limit_length_and_offset();
        if !self.query.distinct && self.query.limit_by.is_none() { length + offset } else { 0 }
    }

    fn order(&self, pipeline: Pipeline) -> Result<Pipeline> {
        let description = self.plan.order_by.clone();
        let limit = self.sort_limit();
        let limits = self.settings.sort_limits();
        let progress = ProgressCounter::new();
        let pipeline = pipeline.transform(|s| {
            Ok(Box::new(PartialSortingStream::new(s, description.clone(), limit, limits, Arc::clone(&progress))?))
        })?;
        let pipeline = Self::union(pipeline, self.max_streams, self.ctx);
        let input = Self::single(pipeline)?;
        let stream = MergeSortingStream::new(
            input,
            description,
            self.settings.max_block_size,
            limit,
            self.settings.max_bytes_before_external_sort,
            self.ctx,
        );
        Ok(Pipeline::new(vec![Box::new(stream)]))
    }

    fn merge_sorted(&self, pipeline: Pipeline) -> Result<Pipeline> {
        if !pipeline.has_more_than_one_stream() {
            return Ok(pipeline);
        }
        let pipeline = pipeline.transform(|s| Ok(Box::new(AsynchronousStream::new(s))))?;
        let header = pipeline.header();
        let mut inputs = pipeline.streams;
        inputs.extend(pipeline.streams_with_non_joined_data);
        let stream = MergingSortedStream::new(
            inputs,
            header,
            self.plan.order_by.clone(),
            self.settings.max_block_size,
            self.sort_limit(),
        )?;
        Ok(Pipeline::new(vec![Box::new(stream)]))
    }

    fn distinct(&self, pipeline: Pipeline, before_order: bool) -> Result<Pipeline> {
        if !self.query.distinct {
            return Ok(pipeline);
        }
        let (length, offset) = self.query.limit_length_and_offset();
        let limit_for_distinct = if self.query.order_by.is_empty() || !before_order { length + offset } else { 0 };
        let limits = self.settings.distinct_limits();
        let columns = self.plan.selected_columns.clone();
        pipeline.transform(|s| {
            let stream: BoxedStream = if s.sort_description().is_some() {
                Box::new(DistinctSortedStream::new(s, limits, limit_for_distinct, columns.clone())?)
            } else {
                Box::new(DistinctStream::new(s, limits, limit_for_distinct, columns.clone())?)
            };
            Ok(stream)
        })
    }

    fn pre_limit(&self, pipeline: Pipeline) -> Result<Pipeline> {
        let (length, offset) = self.query.limit_length_and_offset();
        pipeline.transform(|s| Ok(Box::new(LimitStream::new(s, length + offset, 0, false))))
    }

    fn limit(&self, pipeline: Pipeline, length: usize) -> Result<Pipeline> {
        let (_, offset) = self.query.limit_length_and_offset();
        let no_order = self.query.order_by.is_empty();
        let always_read_till_end = (self.query.with_totals && no_order)
            || (!self.query.with_totals && self.query.has_with_totals_in_any_subquery_in_from());
        pipeline.transform(|s| Ok(Box::new(LimitStream::new(s, length, offset, always_read_till_end))))
    }

    fn creating_sets(&self, pipeline: Pipeline) -> Result<Pipeline> {
        let pipeline = Self::union(pipeline, self.max_streams, self.ctx);
        let input = Self::single(pipeline)?;
        let stream = CreatingSetsStream::new(
            input,
            self.plan.subqueries_for_sets.clone(),
            self.ctx,
            self.settings.transfer_limits(),
            self.depth,
        );
        Ok(Pipeline::new(vec![Box::new(stream)]))
    }

    /// Collapse to at most one chain. The non-joined chains are read last.
    fn union(mut pipeline: Pipeline, max_threads: usize, ctx: &QueryContext) -> Pipeline {
        if pipeline.has_more_than_one_stream() {
            let stream = UnionStream::new(
                std::mem::take(&mut pipeline.streams),
                std::mem::take(&mut pipeline.streams_with_non_joined_data),
                max_threads,
                ctx,
            );
            Pipeline::new(vec![Box::new(stream)])
        } else {
            let non_joined = std::mem::take(&mut pipeline.streams_with_non_joined_data);
            pipeline.streams.extend(non_joined);
            pipeline
        }
    }

    fn single(pipeline: Pipeline) -> Result<BoxedStream> {
        pipeline
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::LogicalInconsistency("pipeline has no streams".to_string()))
    }
}

/// Builds the pipelines of the selects of a `UNION ALL`.
pub struct InterpreterSelectWithUnion {
    query: SelectWithUnionQuery,
    ctx: QueryContext,
    to_stage: ProcessingStage,
    subquery_depth: usize,
    storage: Option<Arc<dyn Storage>>,
    required_result_columns: Vec<String>,
    ignore_with_totals: bool,
}

impl InterpreterSelectWithUnion {
    #[must_use]
    pub fn new(query: SelectWithUnionQuery, ctx: QueryContext, to_stage: ProcessingStage) -> Self {
        Self {
            query,
            ctx,
            to_stage,
            subquery_depth: 0,
            storage: None,
            required_result_columns: Vec::new(),
            ignore_with_totals: false,
        }
    }

    /// Read every select from `storage`.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Names refer to the first select's columns; later selects get the
    /// columns at the same positions.
    #[must_use]
    pub fn required_result_columns(mut self, columns: Vec<String>) -> Self {
        self.required_result_columns = columns;
        self
    }

    #[must_use]
    pub const fn subquery_depth(mut self, depth: usize) -> Self {
        self.subquery_depth = depth;
        self
    }

    #[must_use]
    pub const fn ignore_with_totals(mut self) -> Self {
        self.ignore_with_totals = true;
        self
    }

    fn interpreter(&self, query: &SelectQuery, required: Vec<String>) -> InterpreterSelect {
        let mut interpreter = InterpreterSelect::new(query.clone(), self.ctx.clone(), self.to_stage)
            .subquery_depth(self.subquery_depth)
            .required_result_columns(required);
        if let Some(storage) = &self.storage {
            interpreter = interpreter.with_storage(Arc::clone(storage));
        }
        if self.ignore_with_totals {
            interpreter = interpreter.ignore_with_totals();
        }
        interpreter
    }

    /// One interpreter per select, with required columns translated by
    /// position from the first select.
    fn interpreters(&self) -> Result<Vec<InterpreterSelect>> {
        let Some((first, rest)) = self.query.selects.split_first() else {
            return Err(QueryError::Planning("UNION ALL without selects".to_string()));
        };
        let mut interpreters = vec![self.interpreter(first, self.required_result_columns.clone())];
        if rest.is_empty() {
            return Ok(interpreters);
        }
        let positions = if self.required_result_columns.is_empty() {
            Vec::new()
        } else {
            let full = self.interpreter(first, Vec::new()).sample_header()?;
            self.required_result_columns.iter().map(|c| full.position(c)).collect::<Result<Vec<_>>>()?
        };
        for select in rest {
            let required = if positions.is_empty() {
                Vec::new()
            } else {
                let full = self.interpreter(select, Vec::new()).sample_header()?;
                positions
                    .iter()
                    .map(|&p| {
                        full.fields().get(p).map(|f| f.name.clone()).ok_or_else(|| {
                            QueryError::Planning("selects of UNION ALL have different numbers of columns".to_string())
                        })
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            interpreters.push(self.interpreter(select, required));
        }
        Ok(interpreters)
    }

    /// # Errors
    /// Planning errors of any select, or selects with different column counts.
    pub fn sample_header(&self) -> Result<Header> {
        let interpreters = self.interpreters()?;
        let header = interpreters[0].sample_header()?;
        for other in &interpreters[1..] {
            let len = other.sample_header()?.len();
            if len != header.len() {
                return Err(QueryError::Planning(format!(
                    "selects of UNION ALL have different numbers of columns: {} and {len}",
                    header.len()
                )));
            }
        }
        Ok(header)
    }

    /// # Errors
    /// As for [`InterpreterSelect::analysis`].
    pub fn analysis(&self) -> Result<Vec<CompiledPlan>> {
        self.interpreters()?.iter().map(InterpreterSelect::analysis).collect()
    }

    /// Every chain of every select, converted to the first select's header.
    ///
    /// # Errors
    /// As for [`InterpreterSelect::execute`].
    pub fn execute_with_multiple_streams(&self) -> Result<Vec<BoxedStream>> {
        let header = self.sample_header()?;
        let mut streams = Vec::new();
        for interpreter in self.interpreters()? {
            for stream in interpreter.execute_with_multiple_streams()? {
                if stream.header() == header {
                    streams.push(stream);
                } else {
                    streams.push(Box::new(ConvertingStream::new(stream, header.clone())?) as BoxedStream);
                }
            }
        }
        Ok(streams)
    }

    /// # Errors
    /// As for [`InterpreterSelect::execute`].
    pub fn execute(&self) -> Result<BlockIo> {
        if self.query.selects.len() == 1 {
            return self.interpreters()?.remove(0).execute();
        }
        let header = self.sample_header()?;
        let streams = self.execute_with_multiple_streams()?;
        let mut stream: BoxedStream = match streams.len() {
            0 => Box::new(NullStream::new(header)),
            1 => streams.into_iter().next().ok_or_else(|| QueryError::LogicalInconsistency("lost stream".to_string()))?,
            _ => Box::new(UnionStream::new(streams, Vec::new(), self.ctx.settings.max_threads, &self.ctx)),
        };
        let result_limits = self.ctx.settings.result_limits();
        if self.subquery_depth == 0 && !result_limits.is_unlimited() {
            stream = Box::new(LimitsStream::for_result(stream, result_limits, &self.ctx));
        }
        Ok(BlockIo::new(stream, &self.ctx, self.subquery_depth))
    }
}
