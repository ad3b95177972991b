use super::{ColumnsDescription, SelectQueryInfo, Storage, TableLock};
use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::interpreter::InterpreterSelect;
use crate::stage::ProcessingStage;
use crate::streams::BoxedStream;
use std::sync::Arc;
use tracing::debug;

/// A table whose data lives on several shards.
///
/// Each shard runs the whole query itself up to `WithMergeableState`, so
/// the coordinator only has to merge partial results. Shards are in-process
/// storages; the blocks they return are what a remote connection would
/// deliver.
#[derive(Debug)]
pub struct DistributedTable {
    name: String,
    shards: Vec<Arc<dyn Storage>>,
    lock: TableLock,
}

impl DistributedTable {
    /// # Errors
    /// `Configuration` without shards or when shards disagree on columns.
    pub fn new(name: impl Into<String>, shards: Vec<Arc<dyn Storage>>) -> Result<Self> {
        let name = name.into();
        let Some(first) = shards.first() else {
            return Err(QueryError::Configuration(format!("distributed table {name} has no shards")));
        };
        let columns = first.columns();
        if let Some(bad) = shards.iter().find(|s| s.columns() != columns) {
            return Err(QueryError::Configuration(format!(
                "shard {} of distributed table {name} has different columns",
                bad.name()
            )));
        }
        Ok(Self { name, shards, lock: TableLock::new() })
    }

    #[must_use]
    pub fn shards(&self) -> &[Arc<dyn Storage>] {
        &self.shards
    }
}

impl Storage for DistributedTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> ColumnsDescription {
        self.shards.first().map(|s| s.columns()).unwrap_or_default()
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn processing_stage(&self, to_stage: ProcessingStage) -> ProcessingStage {
        if to_stage >= ProcessingStage::WithMergeableState {
            ProcessingStage::WithMergeableState
        } else {
            ProcessingStage::FetchColumns
        }
    }

    fn read(
        &self,
        _columns: &[String],
        info: &SelectQueryInfo,
        ctx: &QueryContext,
        to_stage: ProcessingStage,
        _max_block_size: usize,
        _num_streams: usize,
    ) -> Result<(Vec<BoxedStream>, ProcessingStage)> {
        let stage = self.processing_stage(to_stage);
        let mut settings = ctx.settings.clone();
        settings.max_result_rows = 0;
        settings.max_result_bytes = 0;
        settings.extremes = false;
        let shard_ctx = ctx.with_settings(settings);

        debug!(table = %self.name, shards = self.shards.len(), stage = %stage, "sending query to shards");
        let streams = self
            .shards
            .iter()
            .map(|shard| {
                let io = InterpreterSelect::new(info.query.clone(), shard_ctx.clone(), stage)
                    .with_storage(Arc::clone(shard))
                    .execute()?;
                Ok(io.stream)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((streams, stage))
    }

    fn table_lock(&self) -> &TableLock {
        &self.lock
    }
}
