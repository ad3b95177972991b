use super::{AliasColumn, ColumnsDescription, SelectQueryInfo, Storage, TableLock};
use crate::block::{Block, Field, Header};
use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::stage::ProcessingStage;
use crate::streams::{BlocksStream, BoxedStream};
use crate::types::Value;
use tracing::trace;

/// A table held in memory as a list of blocks.
///
/// A read deals the blocks round-robin over the requested number of
/// streams, re-chunked to `max_block_size` rows.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    columns: ColumnsDescription,
    blocks: Vec<Block>,
    prewhere: bool,
    lock: TableLock,
}

impl MemoryTable {
    /// # Errors
    /// `LogicalInconsistency` if a block does not match `header`.
    pub fn new(name: impl Into<String>, header: Header, blocks: Vec<Block>) -> Result<Self> {
        let name = name.into();
        for block in &blocks {
            block.check_header(&header, &name)?;
        }
        Ok(Self {
            name,
            columns: ColumnsDescription { ordinary: header, aliases: Vec::new() },
            blocks,
            prewhere: false,
            lock: TableLock::new(),
        })
    }

    pub(super) fn single_row(name: &str, column: &str, value: Value) -> Self {
        let header = Header::new(vec![Field::new(column, value.data_type())]);
        let block = Block::from_rows(&header, vec![vec![value]]).unwrap_or_else(|_| Block::empty(&header));
        Self {
            name: name.to_string(),
            columns: ColumnsDescription { ordinary: header, aliases: Vec::new() },
            blocks: vec![block],
            prewhere: false,
            lock: TableLock::new(),
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: AliasColumn) -> Self {
        self.columns.aliases.push(alias);
        self
    }

    /// Evaluate PREWHERE while reading.
    #[must_use]
    pub const fn with_prewhere(mut self) -> Self {
        self.prewhere = true;
        self
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.blocks.iter().map(Block::rows).sum()
    }

    fn project(&self, block: &Block, columns: &[String]) -> Result<Block> {
        let mut out = Block::new(
            columns
                .iter()
                .map(|c| block.column(c).cloned())
                .collect::<Result<Vec<_>>>()?,
        )?;
        out.info = block.info;
        Ok(out)
    }
}

impl Storage for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> ColumnsDescription {
        self.columns.clone()
    }

    fn supports_prewhere(&self) -> bool {
        self.prewhere
    }

    fn read(
        &self,
        columns: &[String],
        info: &SelectQueryInfo,
        _ctx: &QueryContext,
        _to_stage: ProcessingStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> Result<(Vec<BoxedStream>, ProcessingStage)> {
        if let Some(missing) = columns.iter().find(|c| !self.columns.ordinary.has(c)) {
            return Err(QueryError::Planning(format!("there is no column '{missing}' in table {}", self.name)));
        }
        let header = self.sample_header(columns)?;
        let prewhere = info.prewhere.as_ref().filter(|_| self.prewhere);

        let mut chunks = Vec::new();
        for block in &self.blocks {
            let mut block = block.clone();
            if let Some(prewhere) = prewhere {
                prewhere.actions.execute(&mut block)?;
                let mask: Vec<bool> =
                    block.column(&prewhere.column_name)?.values.iter().map(Value::is_truthy).collect();
                block.filter(&mask);
            }
            let block = self.project(&block, columns)?;
            let size = max_block_size.max(1);
            let mut offset = 0;
            while offset < block.rows() {
                chunks.push(block.slice(offset, size));
                offset += size;
            }
        }

        let streams = num_streams.max(1).min(chunks.len());
        trace!(table = %self.name, chunks = chunks.len(), streams, "reading memory table");
        let mut per_stream: Vec<Vec<Block>> = (0..streams).map(|_| Vec::new()).collect();
        for (i, chunk) in chunks.into_iter().enumerate() {
            per_stream[i % streams].push(chunk);
        }
        let streams = per_stream
            .into_iter()
            .map(|blocks| Box::new(BlocksStream::new(header.clone(), blocks)) as BoxedStream)
            .collect();
        Ok((streams, ProcessingStage::FetchColumns))
    }

    fn table_lock(&self) -> &TableLock {
        &self.lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::storage::Catalog;
    use crate::streams::read_to_end;
    use crate::types::DataType;
    use std::sync::Arc;

    #[test]
    fn reads_are_dealt_round_robin() {
        let header = Header::new(vec![Field::new("x", DataType::Int64), Field::new("y", DataType::Int64)]);
        let blocks = (0..5)
            .map(|i| Block::from_rows(&header, vec![vec![Value::Int(i), Value::Int(-i)]]).unwrap())
            .collect();
        let table = MemoryTable::new("t", header, blocks).unwrap();
        let ctx = QueryContext::new(Settings::default(), Arc::new(Catalog::new()));
        let info = SelectQueryInfo { query: Default::default(), prewhere: None };
        let (mut streams, stage) =
            table.read(&["x".to_string()], &info, &ctx, ProcessingStage::Complete, 100, 2).unwrap();
        assert_eq!(stage, ProcessingStage::FetchColumns);
        assert_eq!(streams.len(), 2);
        let first = read_to_end(streams[0].as_mut()).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].header().names(), vec!["x"]);
    }
}
