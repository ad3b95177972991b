use super::AggregatorParams;
use crate::block::{Block, Column};
use crate::combiners::AggregateState;
use crate::context::{HookPoint, QueryContext};
use crate::error::{QueryError, Result};
use crate::metrics::names;
use crate::settings::OverflowMode;
use crate::spill::{self, SpillFile};
use crate::types::{DataType, Value};
use rayon::prelude::*;
use std::collections::hash_map::{DefaultHasher, Entry};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, trace};

pub const NUM_BUCKETS: usize = 256;

type GroupMap = HashMap<Vec<Value>, Vec<AggregateState>>;

/// Two-level bucket of a grouping key. Stable across processes.
#[must_use]
pub fn bucket_of(key: &[Value]) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % NUM_BUCKETS as u64) as usize
}

fn key_bytes(key: &[Value]) -> usize {
    key.iter().map(Value::byte_size).sum()
}

/// Result of aggregating some rows.
#[derive(Debug, Default)]
pub struct AggregatedData {
    single: GroupMap,
    buckets: Option<Vec<GroupMap>>,
    /// States of the key-less aggregation, or of the overflow row.
    without_key: Option<Vec<AggregateState>>,
    bytes: usize,
    no_more_keys: bool,
    spills: Vec<SpillFile>,
}

impl AggregatedData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_two_level(&self) -> bool {
        self.buckets.is_some()
    }

    #[must_use]
    pub fn groups(&self) -> usize {
        match &self.buckets {
            Some(buckets) => buckets.iter().map(HashMap::len).sum(),
            None => self.single.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups() == 0 && self.without_key.is_none()
    }

    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }

    #[must_use]
    pub fn has_spills(&self) -> bool {
        !self.spills.is_empty()
    }

    pub fn take_spills(&mut self) -> Vec<SpillFile> {
        std::mem::take(&mut self.spills)
    }

    /// Move the overflow row states out into their own data.
    pub fn take_overflow(&mut self) -> Self {
        Self { without_key: self.without_key.take(), ..Self::default() }
    }

    fn convert_to_two_level(&mut self) {
        if self.buckets.is_some() {
            return;
        }
        let mut buckets: Vec<GroupMap> = (0..NUM_BUCKETS).map(|_| GroupMap::new()).collect();
        for (key, states) in self.single.drain() {
            buckets[bucket_of(&key)].insert(key, states);
        }
        self.buckets = Some(buckets);
    }

    fn table_for(&mut self, key: &[Value]) -> &mut GroupMap {
        match &mut self.buckets {
            Some(buckets) => &mut buckets[bucket_of(key)],
            None => &mut self.single,
        }
    }

    fn clear_groups(&mut self) {
        self.single.clear();
        if let Some(buckets) = &mut self.buckets {
            buckets.iter_mut().for_each(HashMap::clear);
        }
        self.bytes = 0;
    }
}

/// Column positions of one block's keys and aggregate arguments.
struct Positions {
    keys: Vec<usize>,
    arguments: Vec<Vec<usize>>,
}

/// Folds blocks into [`AggregatedData`] and turns the result back into blocks.
#[derive(Clone)]
pub struct Aggregator {
    params: Arc<AggregatorParams>,
    ctx: QueryContext,
}

impl Aggregator {
    #[must_use]
    pub const fn new(params: Arc<AggregatorParams>, ctx: QueryContext) -> Self {
        Self { params, ctx }
    }

    #[must_use]
    pub fn params(&self) -> &AggregatorParams {
        &self.params
    }

    fn create_states(&self) -> Vec<AggregateState> {
        self.params.aggregates.iter().map(|a| a.kind.combiner().create()).collect()
    }

    fn states_bytes(&self) -> usize {
        self.params.aggregates.len() * 16
    }

    fn positions(&self, block: &Block) -> Result<Positions> {
        let keys = self.params.keys.iter().map(|k| block.position(k)).collect::<Result<Vec<_>>>()?;
        let arguments = self
            .params
            .aggregates
            .iter()
            .map(|a| a.argument_names.iter().map(|n| block.position(n)).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        Ok(Positions { keys, arguments })
    }

    fn add_row(&self, states: &mut [AggregateState], block: &Block, positions: &Positions, row: usize) {
        for ((description, state), args) in self.params.aggregates.iter().zip(states).zip(&positions.arguments) {
            let values: Vec<&Value> = args.iter().map(|&p| &block.columns[p].values[row]).collect();
            description.kind.combiner().add_input(state, &values);
        }
    }

    /// Aggregate the rows of `block` into `data`.
    ///
    /// Returns `false` when the group cap was hit under `Break` and reading
    /// should stop.
    ///
    /// # Errors
    /// `TooManyGroups` when the group cap is hit under `Throw`, or a failure
    /// while spilling.
    pub fn execute_on_block(&self, data: &mut AggregatedData, block: &Block) -> Result<bool> {
        let positions = self.positions(block)?;
        let params = &self.params;

        if params.keys.is_empty() {
            let mut states = data.without_key.take().unwrap_or_else(|| self.create_states());
            for row in 0..block.rows() {
                self.add_row(&mut states, block, &positions, row);
            }
            data.without_key = Some(states);
            return Ok(true);
        }

        if params.overflow_row && data.without_key.is_none() {
            data.without_key = Some(self.create_states());
        }
        for row in 0..block.rows() {
            let key = block.key_at(&positions.keys, row);
            if let Some(states) = data.table_for(&key).get_mut(&key) {
                self.add_row(states, block, &positions, row);
                continue;
            }
            if !data.no_more_keys {
                let mut states = self.create_states();
                self.add_row(&mut states, block, &positions, row);
                data.bytes += key_bytes(&key) + self.states_bytes();
                data.table_for(&key).insert(key, states);
            } else if let Some(states) = data.without_key.as_mut().filter(|_| params.overflow_row) {
                self.add_row(states, block, &positions, row);
            }
        }

        let groups = data.groups();
        if params.max_rows_to_group_by != 0 && groups > params.max_rows_to_group_by && !data.no_more_keys {
            match params.group_by_overflow_mode {
                OverflowMode::Throw => {
                    return Err(QueryError::TooManyGroups { limit: params.max_rows_to_group_by, actual: groups });
                }
                OverflowMode::Break => {
                    debug!(groups, "group cap reached, stopping aggregation");
                    return Ok(false);
                }
                OverflowMode::Any => {
                    debug!(groups, "group cap reached, ignoring new keys");
                    data.no_more_keys = true;
                }
            }
        }

        let worth_two_level = (params.group_by_two_level_threshold != 0
            && groups >= params.group_by_two_level_threshold)
            || (params.group_by_two_level_threshold_bytes != 0
                && data.bytes >= params.group_by_two_level_threshold_bytes);
        if !data.is_two_level() && worth_two_level {
            trace!(groups, bytes = data.bytes, "converting aggregation to two-level");
            data.convert_to_two_level();
            self.ctx.metrics.increment_counter(names::TWO_LEVEL_CONVERSIONS, 1);
        }

        if params.max_bytes_before_external_group_by != 0 && data.bytes > params.max_bytes_before_external_group_by {
            self.spill(data)?;
        }
        Ok(true)
    }

    /// Write the current groups of `data` to a temporary file, one block per
    /// non-empty bucket, and empty the in-memory tables.
    ///
    /// # Errors
    /// On I/O failure, or when spilling is disabled.
    pub fn spill(&self, data: &mut AggregatedData) -> Result<()> {
        if data.groups() == 0 {
            return Ok(());
        }
        self.ctx.hook(HookPoint::Spill)?;
        data.convert_to_two_level();
        let mut blocks = Vec::new();
        if let Some(buckets) = &mut data.buckets {
            for (bucket, table) in buckets.iter_mut().enumerate() {
                if !table.is_empty() {
                    blocks.push(self.table_to_block(std::mem::take(table), false, bucket_number(bucket))?);
                }
            }
        }
        let file = spill::write_blocks(&self.params.tmp_path, blocks)?;
        self.ctx.metrics.increment_counter(names::AGGREGATION_SPILLED_FILES, 1);
        self.ctx.metrics.increment_counter(names::AGGREGATION_SPILLED_BYTES, file.bytes());
        debug!(path = %file.path().display(), bytes = file.bytes(), "aggregation state written to temporary file");
        data.spills.push(file);
        data.clear_groups();
        Ok(())
    }

    /// Fold a partially aggregated block into `data`.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the block lacks a key or state column.
    pub fn merge_block(&self, data: &mut AggregatedData, block: Block) -> Result<()> {
        let keys = self.params.keys.iter().map(|k| block.position(k)).collect::<Result<Vec<_>>>()?;
        let states = self
            .params
            .aggregates
            .iter()
            .map(|a| block.position(&a.column_name))
            .collect::<Result<Vec<_>>>()?;
        let into_without_key = self.params.keys.is_empty() || block.info.is_overflows;
        let rows = block.rows();
        let mut columns: Vec<std::vec::IntoIter<Value>> = block.columns.into_iter().map(|c| c.values.into_iter()).collect();

        for _ in 0..rows {
            let mut row: Vec<Value> = columns.iter_mut().map(|c| c.next().unwrap_or(Value::Null)).collect();
            let incoming = states
                .iter()
                .map(|&p| match std::mem::take(&mut row[p]) {
                    Value::State(state) => Ok(*state),
                    other => Err(QueryError::LogicalInconsistency(format!(
                        "expected aggregate state, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            let target = if into_without_key {
                data.without_key.get_or_insert_with(|| self.create_states())
            } else {
                let key: Vec<Value> = keys.iter().map(|&p| std::mem::take(&mut row[p])).collect();
                if !data.table_for(&key).contains_key(&key) {
                    data.bytes += key_bytes(&key) + self.states_bytes();
                }
                data.table_for(&key).entry(key).or_insert_with(|| self.create_states())
            };
            self.merge_states(target, incoming);
        }
        Ok(())
    }

    fn merge_states(&self, target: &mut [AggregateState], incoming: Vec<AggregateState>) {
        for ((description, acc), other) in self.params.aggregates.iter().zip(target).zip(incoming) {
            description.kind.combiner().merge(acc, other);
        }
    }

    /// Merge several partial results. Two-level results are merged bucket by
    /// bucket in parallel on the current rayon pool.
    #[must_use]
    pub fn merge_data(&self, mut parts: Vec<AggregatedData>) -> AggregatedData {
        parts.retain(|d| !d.is_empty() || d.has_spills());
        if parts.len() <= 1 {
            return parts.pop().unwrap_or_default();
        }
        let mut merged = AggregatedData::new();
        merged.no_more_keys = parts.iter().any(|d| d.no_more_keys);
        for part in &mut parts {
            merged.spills.append(&mut part.spills);
            merged.bytes += part.bytes;
            if let Some(states) = part.without_key.take() {
                match merged.without_key.as_mut() {
                    Some(acc) => self.merge_states(acc, states),
                    None => merged.without_key = Some(states),
                }
            }
        }

        if parts.iter().any(AggregatedData::is_two_level) {
            let mut columns: Vec<Vec<GroupMap>> = parts
                .into_iter()
                .map(|mut d| {
                    d.convert_to_two_level();
                    d.buckets.unwrap_or_default()
                })
                .collect();
            let per_bucket: Vec<Vec<GroupMap>> = (0..NUM_BUCKETS)
                .map(|b| columns.iter_mut().map(|c| std::mem::take(&mut c[b])).collect())
                .collect();
            let buckets = per_bucket.into_par_iter().map(|tables| self.merge_tables(tables)).collect();
            merged.buckets = Some(buckets);
        } else {
            let tables = parts.into_iter().map(|d| d.single).collect();
            merged.single = self.merge_tables(tables);
        }
        merged
    }

    fn merge_tables(&self, tables: Vec<GroupMap>) -> GroupMap {
        let mut tables = tables.into_iter();
        let mut acc = tables.next().unwrap_or_default();
        for table in tables {
            for (key, states) in table {
                match acc.entry(key) {
                    Entry::Occupied(mut entry) => self.merge_states(entry.get_mut(), states),
                    Entry::Vacant(entry) => {
                        entry.insert(states);
                    }
                }
            }
        }
        acc
    }

    /// Give a key-less aggregation over no rows its single default row,
    /// unless configured to return an empty result.
    pub fn ensure_row_for_empty_set(&self, data: &mut AggregatedData) {
        if self.params.keys.is_empty()
            && data.without_key.is_none()
            && !self.params.empty_result_for_aggregation_by_empty_set
        {
            data.without_key = Some(self.create_states());
        }
    }

    fn states_to_values(&self, states: Vec<AggregateState>, final_: bool) -> Vec<Value> {
        self.params
            .aggregates
            .iter()
            .zip(states)
            .map(|(description, state)| {
                if final_ {
                    description.kind.combiner().finish(state).cast(&description.return_type)
                } else {
                    Value::State(Box::new(state))
                }
            })
            .collect()
    }

    fn table_to_block(&self, table: GroupMap, final_: bool, bucket_num: i32) -> Result<Block> {
        let header = self.params.header(final_)?;
        let mut block = Block::from_rows(
            &header,
            table
                .into_iter()
                .map(|(mut key, states)| {
                    key.extend(self.states_to_values(states, final_));
                    key
                })
                .collect(),
        )?;
        block.info.bucket_num = bucket_num;
        Ok(block)
    }

    /// Blocks of the aggregation result.
    ///
    /// The overflow row, if enabled, comes first in a block flagged
    /// `is_overflows`. Two-level data yields one block per non-empty bucket
    /// in bucket order.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the key columns cannot be resolved.
    pub fn convert_to_blocks(&self, mut data: AggregatedData, final_: bool) -> Result<Vec<Block>> {
        let header = self.params.header(final_)?;
        let mut blocks = Vec::new();
        if let Some(states) = data.without_key.take() {
            if self.params.keys.is_empty() || self.params.overflow_row {
                let mut row: Vec<Value> = self
                    .params
                    .key_fields()?
                    .iter()
                    .map(|f| f.data_type.default_value())
                    .collect();
                row.extend(self.states_to_values(states, final_));
                let mut block = Block::from_rows(&header, vec![row])?;
                block.info.is_overflows = !self.params.keys.is_empty();
                blocks.push(block);
            }
        }
        match data.buckets.take() {
            Some(buckets) => {
                for (bucket, table) in buckets.into_iter().enumerate() {
                    if !table.is_empty() {
                        blocks.push(self.table_to_block(table, final_, bucket_number(bucket))?);
                    }
                }
            }
            None => {
                if !data.single.is_empty() {
                    blocks.push(self.table_to_block(std::mem::take(&mut data.single), final_, -1)?);
                }
            }
        }
        Ok(blocks)
    }

    /// Finish the state columns of a partially aggregated block.
    ///
    /// # Errors
    /// `LogicalInconsistency` if a state column is missing or holds
    /// something other than states.
    pub fn finalize_block(&self, mut block: Block) -> Result<Block> {
        for description in &self.params.aggregates {
            let pos = block.position(&description.column_name)?;
            let column = &mut block.columns[pos];
            if !matches!(column.data_type, DataType::AggregateState(_)) {
                continue;
            }
            let values = std::mem::take(&mut column.values)
                .into_iter()
                .map(|v| match v {
                    Value::State(state) => {
                        Ok(description.kind.combiner().finish(*state).cast(&description.return_type))
                    }
                    other => Err(QueryError::LogicalInconsistency(format!("expected aggregate state, got {other}"))),
                })
                .collect::<Result<Vec<_>>>()?;
            *column = Column::new(description.column_name.clone(), description.return_type.clone(), values);
        }
        Ok(block)
    }

    /// Fresh states for a totals accumulator.
    #[must_use]
    pub fn new_states(&self) -> Vec<AggregateState> {
        self.create_states()
    }

    /// Merge the states of row `row` of a partially aggregated block into `acc`.
    ///
    /// # Errors
    /// As for [`Self::finalize_block`].
    pub fn merge_row_into(&self, acc: &mut [AggregateState], block: &Block, row: usize) -> Result<()> {
        let mut incoming = Vec::with_capacity(self.params.aggregates.len());
        for description in &self.params.aggregates {
            match &block.column(&description.column_name)?.values[row] {
                Value::State(state) => incoming.push((**state).clone()),
                other => {
                    return Err(QueryError::LogicalInconsistency(format!("expected aggregate state, got {other}")));
                }
            }
        }
        self.merge_states(acc, incoming);
        Ok(())
    }

    /// Finished values of `states`, in aggregate order.
    #[must_use]
    pub fn finish_states(&self, states: Vec<AggregateState>) -> Vec<Value> {
        self.states_to_values(states, true)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
const fn bucket_number(bucket: usize) -> i32 {
    bucket as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateDescription;
    use crate::block::{Field, Header};
    use crate::combiners::AggregateKind;
    use crate::settings::Settings;
    use crate::storage::Catalog;

    fn aggregator(settings: &Settings) -> Aggregator {
        let src = Header::new(vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64)]);
        let sum = AggregateDescription::new(AggregateKind::Sum, vec!["v".into()], vec![DataType::Int64], "sum(v)")
            .unwrap();
        let params = AggregatorParams::from_settings(
            src,
            vec!["k".into()],
            vec![sum],
            false,
            true,
            settings,
            std::env::temp_dir(),
        );
        Aggregator::new(Arc::new(params), QueryContext::new(settings.clone(), Arc::new(Catalog::new())))
    }

    fn rows(block: &Block) -> Vec<(i64, i64)> {
        let mut out: Vec<(i64, i64)> = (0..block.rows())
            .map(|i| {
                let row = block.row(i);
                (row[0].as_i128().unwrap() as i64, row[1].as_i128().unwrap() as i64)
            })
            .collect();
        out.sort_unstable();
        out
    }

    fn input() -> Block {
        let header = Header::new(vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64)]);
        Block::from_rows(
            &header,
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(2), Value::Int(5)],
                vec![Value::Int(1), Value::Int(20)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn partial_results_merge_to_the_same_totals() {
        let agg = aggregator(&Settings::default());
        let mut a = AggregatedData::new();
        let mut b = AggregatedData::new();
        assert!(agg.execute_on_block(&mut a, &input()).unwrap());
        assert!(agg.execute_on_block(&mut b, &input()).unwrap());

        let mut merged = AggregatedData::new();
        for block in agg.convert_to_blocks(a, false).unwrap().into_iter().chain(agg.convert_to_blocks(b, false).unwrap()) {
            agg.merge_block(&mut merged, block).unwrap();
        }
        let out = agg.convert_to_blocks(merged, true).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(rows(&out[0]), vec![(1, 60), (2, 10)]);
    }

    #[test]
    fn two_level_data_is_split_into_buckets() {
        let settings = Settings { group_by_two_level_threshold: 1, ..Settings::default() };
        let agg = aggregator(&settings);
        let mut data = AggregatedData::new();
        agg.execute_on_block(&mut data, &input()).unwrap();
        assert!(data.is_two_level());
        let blocks = agg.convert_to_blocks(data, true).unwrap();
        assert!(blocks.iter().all(|b| b.info.bucket_num >= 0));
        let all = Block::concat(&blocks[0].header(), blocks).unwrap();
        assert_eq!(rows(&all), vec![(1, 30), (2, 5)]);
    }

    #[test]
    fn group_cap_with_throw_fails() {
        let settings = Settings { max_rows_to_group_by: 1, ..Settings::default() };
        let agg = aggregator(&settings);
        let err = agg.execute_on_block(&mut AggregatedData::new(), &input()).unwrap_err();
        assert!(matches!(err, QueryError::TooManyGroups { limit: 1, actual: 2 }));
    }
}
