use super::{bucket_of, AggregatedData, Aggregator, AggregatorParams, NUM_BUCKETS};
use crate::block::{Block, Header};
use crate::context::{HookPoint, QueryContext};
use crate::error::{QueryError, Result};
use crate::streams::{BlockStream, BoxedStream, TemporaryFileStream};
use rayon::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

fn thread_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()
        .map_err(|e| QueryError::External(anyhow::anyhow!("failed to start aggregation threads: {e}")))
}

/// Aggregate one chain into fresh data. Stops early when the group cap is
/// hit under `Break`.
fn aggregate_chain(aggregator: &Aggregator, ctx: &QueryContext, input: &mut dyn BlockStream) -> Result<AggregatedData> {
    ctx.hook(HookPoint::PartialAggregation)?;
    let mut data = AggregatedData::new();
    while let Some(block) = input.read()? {
        ctx.cancel.check()?;
        if !aggregator.execute_on_block(&mut data, &block)? {
            input.cancel();
            break;
        }
    }
    Ok(data)
}

/// Turn finished aggregation data into output. Data that went to disk is
/// spilled completely and merged back bucket by bucket.
fn finish(
    aggregator: &Aggregator,
    ctx: &QueryContext,
    parts: Vec<AggregatedData>,
    final_: bool,
    merge_threads: usize,
) -> Result<Output> {
    if parts.iter().any(AggregatedData::has_spills) {
        let mut files = Vec::new();
        let mut overflows = Vec::new();
        for mut part in parts {
            overflows.push(part.take_overflow());
            aggregator.spill(&mut part)?;
            files.extend(part.take_spills());
        }
        debug!(files = files.len(), "merging aggregation state from temporary files");
        let header = aggregator.params().intermediate_header()?;
        let mut inputs = files
            .into_iter()
            .map(|f| Ok(Box::new(TemporaryFileStream::new(header.clone(), Arc::new(f))?) as BoxedStream))
            .collect::<Result<Vec<_>>>()?;
        if aggregator.params().overflow_row {
            let overflow = aggregator.convert_to_blocks(aggregator.merge_data(overflows), false)?;
            inputs.push(Box::new(crate::streams::BlocksStream::new(header, overflow)));
        }
        let params = Arc::new(aggregator.params().clone());
        let merged =
            MergingAggregatedMemoryEfficientStream::new(inputs, params, final_, 1, merge_threads, ctx);
        return Ok(Output::Stream(Box::new(merged)));
    }
    let mut data = aggregator.merge_data(parts);
    aggregator.ensure_row_for_empty_set(&mut data);
    Ok(Output::Blocks(aggregator.convert_to_blocks(data, final_)?.into()))
}

enum Output {
    Blocks(VecDeque<Block>),
    Stream(BoxedStream),
}

impl Output {
    fn read(&mut self) -> Result<Option<Block>> {
        match self {
            Self::Blocks(blocks) => Ok(blocks.pop_front()),
            Self::Stream(stream) => stream.read(),
        }
    }
}

/// Aggregates a single chain.
pub struct AggregatingStream {
    input: [BoxedStream; 1],
    aggregator: Aggregator,
    final_: bool,
    ctx: QueryContext,
    output: Option<Output>,
}

impl AggregatingStream {
    #[must_use]
    pub fn new(input: BoxedStream, params: Arc<AggregatorParams>, final_: bool, ctx: &QueryContext) -> Self {
        Self { input: [input], aggregator: Aggregator::new(params, ctx.clone()), final_, ctx: ctx.clone(), output: None }
    }
}

impl BlockStream for AggregatingStream {
    fn name(&self) -> &'static str {
        "Aggregating"
    }

    fn header(&self) -> Header {
        self.aggregator.params().header(self.final_).unwrap_or_default()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.output.is_none() {
            let data = aggregate_chain(&self.aggregator, &self.ctx, self.input[0].as_mut())?;
            let threads = self.ctx.settings.memory_efficient_merge_threads();
            self.output = Some(finish(&self.aggregator, &self.ctx, vec![data], self.final_, threads)?);
        }
        match self.output.as_mut() {
            Some(output) => output.read(),
            None => Ok(None),
        }
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn describe(&self) -> String {
        describe_params(self.aggregator.params(), self.final_)
    }
}

fn describe_params(params: &AggregatorParams, final_: bool) -> String {
    let aggregates: Vec<&str> = params.aggregates.iter().map(|a| a.column_name.as_str()).collect();
    format!(
        "keys {:?}, aggregates {:?}{}{}",
        params.keys,
        aggregates,
        if final_ { ", final" } else { "" },
        if params.overflow_row { ", overflow row" } else { "" }
    )
}

/// Aggregates several chains in parallel, one partial result per chain, then
/// merges the partial results.
///
/// Non-joined inputs are aggregated after every main chain is done, since
/// their rows are only known once all probes have run.
pub struct ParallelAggregatingStream {
    inputs: Vec<BoxedStream>,
    non_joined: Vec<BoxedStream>,
    aggregator: Aggregator,
    final_: bool,
    max_threads: usize,
    merge_threads: usize,
    ctx: QueryContext,
    output: Option<Output>,
}

impl ParallelAggregatingStream {
    #[must_use]
    pub fn new(
        inputs: Vec<BoxedStream>,
        non_joined: Vec<BoxedStream>,
        params: Arc<AggregatorParams>,
        final_: bool,
        max_threads: usize,
        merge_threads: usize,
        ctx: &QueryContext,
    ) -> Self {
        Self {
            inputs,
            non_joined,
            aggregator: Aggregator::new(params, ctx.clone()),
            final_,
            max_threads,
            merge_threads,
            ctx: ctx.clone(),
            output: None,
        }
    }

    fn run(&mut self) -> Result<Output> {
        let chains = std::mem::take(&mut self.inputs);
        debug!(chains = chains.len(), threads = self.max_threads, "aggregating in parallel");
        let pool = thread_pool(self.max_threads)?;
        let aggregator = &self.aggregator;
        let ctx = &self.ctx;
        let mut parts = pool.install(|| {
            chains
                .into_par_iter()
                .map(|mut chain| aggregate_chain(aggregator, ctx, chain.as_mut()))
                .collect::<Result<Vec<_>>>()
        })?;
        for mut chain in std::mem::take(&mut self.non_joined) {
            parts.push(aggregate_chain(aggregator, ctx, chain.as_mut())?);
        }
        let merge_threads = self.merge_threads;
        let final_ = self.final_;
        pool.install(|| finish(aggregator, ctx, parts, final_, merge_threads))
    }
}

impl BlockStream for ParallelAggregatingStream {
    fn name(&self) -> &'static str {
        "ParallelAggregating"
    }

    fn header(&self) -> Header {
        self.aggregator.params().header(self.final_).unwrap_or_default()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.output.is_none() {
            self.output = Some(self.run()?);
        }
        match self.output.as_mut() {
            Some(output) => output.read(),
            None => Ok(None),
        }
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.inputs
    }

    fn cancel(&mut self) {
        for input in self.inputs.iter_mut().chain(&mut self.non_joined) {
            input.cancel();
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}, threads {}, non-joined {}",
            describe_params(self.aggregator.params(), self.final_),
            self.max_threads,
            self.non_joined.len()
        )
    }
}

/// Merges partially aggregated blocks held entirely in memory.
pub struct MergingAggregatedStream {
    input: [BoxedStream; 1],
    aggregator: Aggregator,
    final_: bool,
    max_threads: usize,
    output: Option<VecDeque<Block>>,
}

impl MergingAggregatedStream {
    #[must_use]
    pub fn new(
        input: BoxedStream,
        params: Arc<AggregatorParams>,
        final_: bool,
        max_threads: usize,
        ctx: &QueryContext,
    ) -> Self {
        Self { input: [input], aggregator: Aggregator::new(params, ctx.clone()), final_, max_threads, output: None }
    }
}

impl BlockStream for MergingAggregatedStream {
    fn name(&self) -> &'static str {
        "MergingAggregated"
    }

    fn header(&self) -> Header {
        self.aggregator.params().header(self.final_).unwrap_or_default()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.output.is_none() {
            let mut data = AggregatedData::new();
            while let Some(block) = self.input[0].read()? {
                self.aggregator.merge_block(&mut data, block)?;
            }
            self.aggregator.ensure_row_for_empty_set(&mut data);
            self.output = Some(self.aggregator.convert_to_blocks(data, self.final_)?.into());
        }
        Ok(self.output.as_mut().and_then(VecDeque::pop_front))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn describe(&self) -> String {
        format!("{}, threads {}", describe_params(self.aggregator.params(), self.final_), self.max_threads)
    }
}

/// Read position in one input of the memory-efficient merge.
struct BucketCursor {
    input: BoxedStream,
    pending: Option<Block>,
    done: bool,
}

impl BucketCursor {
    /// Next block with a bucket number below `end`, or `None` once the input
    /// has moved past it.
    fn take_before(&mut self, end: i32) -> Result<Vec<Block>> {
        let mut out = Vec::new();
        loop {
            if self.pending.is_none() && !self.done {
                self.pending = self.input.read()?;
                self.done = self.pending.is_none();
            }
            match self.pending.take() {
                Some(block) if block.info.bucket_num < end => out.push(block),
                other => {
                    self.pending = other;
                    return Ok(out);
                }
            }
        }
    }
}

/// Merges partially aggregated inputs bucket by bucket, so at most
/// `merge_threads` buckets are held in memory at a time.
///
/// Inputs produced by two-level aggregation deliver their blocks in bucket
/// order. Single-level inputs are split by bucket up front.
pub struct MergingAggregatedMemoryEfficientStream {
    inputs: Vec<BoxedStream>,
    aggregator: Aggregator,
    final_: bool,
    reading_threads: usize,
    merge_threads: usize,
    ctx: QueryContext,
    pool: Option<rayon::ThreadPool>,
    state: Option<MergeState>,
}

struct MergeState {
    cursors: Vec<BucketCursor>,
    /// Rows of single-level inputs, already split by bucket.
    split: Vec<Vec<Block>>,
    next_bucket: usize,
    ready: VecDeque<Block>,
    emitted: bool,
}

impl MergingAggregatedMemoryEfficientStream {
    #[must_use]
    pub fn new(
        inputs: Vec<BoxedStream>,
        params: Arc<AggregatorParams>,
        final_: bool,
        reading_threads: usize,
        merge_threads: usize,
        ctx: &QueryContext,
    ) -> Self {
        Self {
            inputs,
            aggregator: Aggregator::new(params, ctx.clone()),
            final_,
            reading_threads: reading_threads.max(1),
            merge_threads: merge_threads.max(1),
            ctx: ctx.clone(),
            pool: None,
            state: None,
        }
    }

    /// Collect overflow blocks and split single-level inputs.
    fn start(&mut self) -> Result<MergeState> {
        let mut cursors = Vec::new();
        let mut split: Vec<Vec<Block>> = (0..NUM_BUCKETS).map(|_| Vec::new()).collect();
        let mut overflows = AggregatedData::new();
        let mut saw_overflows = false;
        let key_positions = |block: &Block| {
            self.aggregator.params().keys.iter().map(|k| block.position(k)).collect::<Result<Vec<_>>>()
        };

        for mut input in std::mem::take(&mut self.inputs) {
            let mut first = input.read()?;
            while let Some(block) = first.take_if(|b| b.info.is_overflows) {
                saw_overflows = true;
                self.aggregator.merge_block(&mut overflows, block)?;
                first = input.read()?;
            }
            match first {
                Some(block) if block.info.bucket_num < 0 => {
                    let mut next = Some(block);
                    while let Some(block) = next {
                        if block.info.is_overflows {
                            saw_overflows = true;
                            self.aggregator.merge_block(&mut overflows, block)?;
                        } else {
                            let positions = key_positions(&block)?;
                            let mut by_bucket: Vec<Vec<usize>> = (0..NUM_BUCKETS).map(|_| Vec::new()).collect();
                            for row in 0..block.rows() {
                                by_bucket[bucket_of(&block.key_at(&positions, row))].push(row);
                            }
                            for (bucket, rows) in by_bucket.into_iter().enumerate() {
                                if !rows.is_empty() {
                                    split[bucket].push(block.take(&rows));
                                }
                            }
                        }
                        next = input.read()?;
                    }
                }
                Some(block) => cursors.push(BucketCursor { input, pending: Some(block), done: false }),
                None => {}
            }
        }

        let mut ready = VecDeque::new();
        if saw_overflows {
            ready.extend(self.aggregator.convert_to_blocks(overflows, self.final_)?);
        }
        Ok(MergeState { cursors, split, next_bucket: 0, ready, emitted: false })
    }

    /// Merge the next batch of buckets into `state.ready`.
    fn merge_batch(&self, state: &mut MergeState, pool: &rayon::ThreadPool) -> Result<()> {
        let begin = state.next_bucket;
        let end = (begin + self.merge_threads).min(NUM_BUCKETS);
        state.next_bucket = end;

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let end_num = end as i32;
        let fetched = pool.install(|| {
            state.cursors.par_iter_mut().map(|c| c.take_before(end_num)).collect::<Result<Vec<_>>>()
        })?;
        let mut per_bucket: Vec<Vec<Block>> = (begin..end).map(|b| std::mem::take(&mut state.split[b])).collect();
        for block in fetched.into_iter().flatten() {
            let bucket = usize::try_from(block.info.bucket_num).unwrap_or(0);
            if bucket < begin {
                return Err(QueryError::LogicalInconsistency(format!(
                    "aggregation bucket {bucket} arrived after bucket {begin} was merged"
                )));
            }
            per_bucket[bucket - begin].push(block);
        }

        let aggregator = &self.aggregator;
        let ctx = &self.ctx;
        let final_ = self.final_;
        let merged = pool.install(|| {
            per_bucket
                .into_par_iter()
                .enumerate()
                .filter(|(_, blocks)| !blocks.is_empty())
                .map(|(offset, blocks)| {
                    ctx.hook(HookPoint::MergeBucket)?;
                    ctx.cancel.check()?;
                    let mut data = AggregatedData::new();
                    for block in blocks {
                        aggregator.merge_block(&mut data, block)?;
                    }
                    let mut out = aggregator.convert_to_blocks(data, final_)?;
                    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                    let bucket_num = (begin + offset) as i32;
                    for block in &mut out {
                        block.info.bucket_num = bucket_num;
                    }
                    Ok(out)
                })
                .collect::<Result<Vec<_>>>()
        })?;
        state.ready.extend(merged.into_iter().flatten());
        Ok(())
    }
}

impl BlockStream for MergingAggregatedMemoryEfficientStream {
    fn name(&self) -> &'static str {
        "MergingAggregatedMemoryEfficient"
    }

    fn header(&self) -> Header {
        self.aggregator.params().header(self.final_).unwrap_or_default()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        let mut state = match self.state.take() {
            Some(state) => state,
            None => self.start()?,
        };
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => thread_pool(self.reading_threads.max(self.merge_threads))?,
        };
        let result = loop {
            if let Some(block) = state.ready.pop_front() {
                state.emitted = true;
                break Ok(Some(block));
            }
            if state.next_bucket >= NUM_BUCKETS {
                if !state.emitted {
                    state.emitted = true;
                    let mut data = AggregatedData::new();
                    self.aggregator.ensure_row_for_empty_set(&mut data);
                    state.ready.extend(self.aggregator.convert_to_blocks(data, self.final_)?);
                    continue;
                }
                break Ok(None);
            }
            if let Err(e) = self.merge_batch(&mut state, &pool) {
                break Err(e);
            }
        };
        self.state = Some(state);
        self.pool = Some(pool);
        result
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.inputs
    }

    fn cancel(&mut self) {
        for input in &mut self.inputs {
            input.cancel();
        }
        if let Some(state) = self.state.as_mut() {
            for cursor in &mut state.cursors {
                cursor.input.cancel();
            }
        }
    }

    fn describe(&self) -> String {
        format!(
            "{}, reading threads {}, merge threads {}",
            describe_params(self.aggregator.params(), self.final_),
            self.reading_threads,
            self.merge_threads
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateDescription;
    use crate::block::Field;
    use crate::combiners::AggregateKind;
    use crate::settings::Settings;
    use crate::storage::Catalog;
    use crate::streams::{read_to_end, BlocksStream};
    use crate::types::{DataType, Value};

    fn src_header() -> Header {
        Header::new(vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64)])
    }

    fn params(settings: &Settings) -> Arc<AggregatorParams> {
        let sum =
            AggregateDescription::new(AggregateKind::Sum, vec!["v".into()], vec![DataType::Int64], "sum(v)").unwrap();
        Arc::new(AggregatorParams::from_settings(
            src_header(),
            vec!["k".into()],
            vec![sum],
            false,
            true,
            settings,
            std::env::temp_dir(),
        ))
    }

    fn chain(rows: &[(i64, i64)]) -> BoxedStream {
        let rows = rows.iter().map(|&(k, v)| vec![Value::Int(k), Value::Int(v)]).collect();
        Box::new(BlocksStream::new(src_header(), vec![Block::from_rows(&src_header(), rows).unwrap()]))
    }

    fn sorted_rows(blocks: Vec<Block>) -> Vec<(i64, i64)> {
        let mut out: Vec<(i64, i64)> = blocks
            .iter()
            .flat_map(|b| (0..b.rows()).map(|i| b.row(i)))
            .map(|r| (r[0].as_i128().unwrap() as i64, r[1].as_i128().unwrap() as i64))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn parallel_aggregation_merges_chains() {
        let settings = Settings::default();
        let ctx = QueryContext::new(settings.clone(), Arc::new(Catalog::new()));
        let mut s = ParallelAggregatingStream::new(
            vec![chain(&[(1, 10), (2, 5)]), chain(&[(1, 20)])],
            vec![],
            params(&settings),
            true,
            2,
            2,
            &ctx,
        );
        assert_eq!(sorted_rows(read_to_end(&mut s).unwrap()), vec![(1, 30), (2, 5)]);
    }

    #[test]
    fn memory_efficient_merge_handles_mixed_inputs() {
        let settings = Settings { group_by_two_level_threshold: 1, ..Settings::default() };
        let ctx = QueryContext::new(settings.clone(), Arc::new(Catalog::new()));
        let p = params(&settings);
        let two_level: BoxedStream = Box::new(AggregatingStream::new(chain(&[(1, 10), (2, 5), (3, 1)]), p.clone(), false, &ctx));
        let single_params = params(&Settings::default());
        let single: BoxedStream =
            Box::new(AggregatingStream::new(chain(&[(1, 20), (3, 2)]), single_params, false, &ctx));
        let mut s = MergingAggregatedMemoryEfficientStream::new(vec![two_level, single], p, true, 2, 4, &ctx);
        assert_eq!(sorted_rows(read_to_end(&mut s).unwrap()), vec![(1, 30), (2, 5), (3, 3)]);
    }
}
