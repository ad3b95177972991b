use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::error::{QueryError, Result};
use crate::expression::HashJoin;
use crate::spill::{SpillFile, SpillReader};
use std::collections::VecDeque;
use std::sync::Arc;

/// Produces nothing. Stands in for an empty read and for every source of a
/// dry run.
#[derive(Debug)]
pub struct NullStream {
    header: Header,
}

impl NullStream {
    #[must_use]
    pub const fn new(header: Header) -> Self {
        Self { header }
    }
}

impl BlockStream for NullStream {
    fn name(&self) -> &'static str {
        "Null"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        Ok(None)
    }
}

/// Hands out a fixed list of blocks.
#[derive(Debug)]
pub struct BlocksStream {
    header: Header,
    blocks: VecDeque<Block>,
    totals: Option<Block>,
}

impl BlocksStream {
    #[must_use]
    pub fn new(header: Header, blocks: Vec<Block>) -> Self {
        Self { header, blocks: blocks.into(), totals: None }
    }

    /// Report `totals` once read, as a remote `WITH TOTALS` result would.
    #[must_use]
    pub fn with_totals(mut self, totals: Block) -> Self {
        self.totals = Some(totals);
        self
    }
}

impl BlockStream for BlocksStream {
    fn name(&self) -> &'static str {
        "Blocks"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        Ok(self.blocks.pop_front())
    }

    fn totals(&self) -> Result<Option<Block>> {
        Ok(self.totals.clone())
    }

    fn cancel(&mut self) {
        self.blocks.clear();
    }

    fn describe(&self) -> String {
        format!("{} blocks", self.blocks.len())
    }
}

/// Reads its inputs one after another.
pub struct ConcatStream {
    inputs: Vec<BoxedStream>,
    current: usize,
}

impl ConcatStream {
    #[must_use]
    pub const fn new(inputs: Vec<BoxedStream>) -> Self {
        Self { inputs, current: 0 }
    }
}

impl BlockStream for ConcatStream {
    fn name(&self) -> &'static str {
        "Concat"
    }

    fn header(&self) -> Header {
        self.inputs.first().map(|s| s.header()).unwrap_or_default()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while let Some(input) = self.inputs.get_mut(self.current) {
            if let Some(block) = input.read()? {
                return Ok(Some(block));
            }
            self.current += 1;
        }
        Ok(None)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.inputs
    }
}

/// Right-side rows of a RIGHT or FULL join that no probe matched.
///
/// Must be read after every probing chain is exhausted; the union operator
/// guarantees that by reading this side last.
pub struct NonJoinedStream {
    join: Arc<HashJoin>,
    header: Header,
    max_block_size: usize,
    pending: Option<VecDeque<Block>>,
}

impl NonJoinedStream {
    #[must_use]
    pub const fn new(join: Arc<HashJoin>, header: Header, max_block_size: usize) -> Self {
        Self { join, header, max_block_size, pending: None }
    }
}

impl BlockStream for NonJoinedStream {
    fn name(&self) -> &'static str {
        "NonJoined"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.pending.is_none() {
            self.pending = Some(self.join.non_joined_blocks(&self.header, self.max_block_size)?.into());
        }
        Ok(self.pending.as_mut().and_then(VecDeque::pop_front))
    }

    fn describe(&self) -> String {
        format!("{:?} USING {:?}", self.join.kind(), self.join.key_names())
    }
}

/// Replays a spill file.
pub struct TemporaryFileStream {
    header: Header,
    file: Arc<SpillFile>,
    reader: SpillReader,
}

impl TemporaryFileStream {
    /// # Errors
    /// If the file cannot be reopened.
    pub fn new(header: Header, file: Arc<SpillFile>) -> Result<Self> {
        let reader = file.reader()?;
        Ok(Self { header, file, reader })
    }
}

impl BlockStream for TemporaryFileStream {
    fn name(&self) -> &'static str {
        "TemporaryFile"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        self.reader.next_block()
    }

    fn describe(&self) -> String {
        self.file.path().display().to_string()
    }
}

/// Renames and casts columns by position to a target header. Used to give
/// every select of a `UNION ALL` the first select's column names.
pub struct ConvertingStream {
    input: [BoxedStream; 1],
    header: Header,
}

impl ConvertingStream {
    /// # Errors
    /// `LogicalInconsistency` if the column counts differ.
    pub fn new(input: BoxedStream, header: Header) -> Result<Self> {
        let actual = input.header().len();
        if actual != header.len() {
            return Err(QueryError::LogicalInconsistency(format!(
                "number of columns doesn't match: {actual} in the stream, {} expected",
                header.len()
            )));
        }
        Ok(Self { input: [input], header })
    }

    fn convert(&self, mut block: Block) -> Block {
        for (column, field) in block.columns.iter_mut().zip(self.header.fields()) {
            column.name.clone_from(&field.name);
            if column.data_type != field.data_type {
                let values = std::mem::take(&mut column.values);
                column.values = values.into_iter().map(|v| v.cast(&field.data_type)).collect();
                column.data_type = field.data_type.clone();
            }
        }
        block
    }
}

impl BlockStream for ConvertingStream {
    fn name(&self) -> &'static str {
        "Converting"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        Ok(self.input[0].read()?.map(|b| self.convert(b)))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn totals(&self) -> Result<Option<Block>> {
        Ok(self.input[0].totals()?.map(|b| self.convert(b)))
    }

    fn extremes(&self) -> Option<Block> {
        self.input[0].extremes().map(|b| self.convert(b))
    }
}
