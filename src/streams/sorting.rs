use super::{BlockStream, BlocksStream, BoxedStream, TemporaryFileStream};
use crate::block::{Block, Header};
use crate::context::{HookPoint, QueryContext};
use crate::error::Result;
use crate::metrics::names;
use crate::settings::SizeLimits;
use crate::sort::{column_names, SortDescription, SortKeys};
use crate::spill;
use crate::streams::ProgressCounter;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

/// Sorts every block on its own, keeping at most `limit` rows of each.
pub struct PartialSortingStream {
    input: [BoxedStream; 1],
    description: SortDescription,
    keys: SortKeys,
    limit: usize,
    limits: SizeLimits,
    progress: Arc<ProgressCounter>,
    finished: bool,
}

impl PartialSortingStream {
    /// `progress` is shared by every chain sorted for one query, so the sort
    /// caps apply to the query as a whole.
    ///
    /// # Errors
    /// If a sort column is missing from the input.
    pub fn new(
        input: BoxedStream,
        description: SortDescription,
        limit: usize,
        limits: SizeLimits,
        progress: Arc<ProgressCounter>,
    ) -> Result<Self> {
        let keys = SortKeys::new(&description, &input.header())?;
        Ok(Self { input: [input], description, keys, limit, limits, progress, finished: false })
    }
}

impl BlockStream for PartialSortingStream {
    fn name(&self) -> &'static str {
        "PartialSorting"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        let Some(block) = self.input[0].read()? else {
            return Ok(None);
        };
        let (rows, bytes) = self.progress.add(block.rows(), block.byte_size());
        if !self.limits.check(rows, bytes, "rows to sort")? {
            self.finished = true;
            self.input[0].cancel();
            return Ok(None);
        }
        Ok(Some(self.keys.sort_block(&block, self.limit)))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        Some(&self.description)
    }

    fn describe(&self) -> String {
        let by = column_names(&self.description).join(", ");
        if self.limit == 0 { by } else { format!("{by}, limit {}", self.limit) }
    }
}

/// One input's position in a k-way merge.
struct Cursor {
    keys: Arc<SortKeys>,
    block: Arc<Block>,
    row: usize,
    input: usize,
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    /// Reversed so that `BinaryHeap` pops the smallest row; ties go to the
    /// lower input index to keep the merge stable.
    fn cmp(&self, other: &Self) -> Ordering {
        self.keys
            .compare(&self.block, self.row, &other.block, other.row)
            .then(self.input.cmp(&other.input))
            .reverse()
    }
}

/// Merges inputs that are each sorted by `description` into one sorted
/// stream of blocks of at most `max_block_size` rows.
pub struct MergingSortedStream {
    inputs: Vec<BoxedStream>,
    header: Header,
    description: SortDescription,
    keys: Arc<SortKeys>,
    max_block_size: usize,
    limit: usize,
    heap: BinaryHeap<Cursor>,
    started: bool,
    emitted: usize,
    finished: bool,
}

impl MergingSortedStream {
    /// `header` is the header shared by all inputs; there may be none.
    ///
    /// # Errors
    /// If a sort column is missing from `header`.
    pub fn new(
        inputs: Vec<BoxedStream>,
        header: Header,
        description: SortDescription,
        max_block_size: usize,
        limit: usize,
    ) -> Result<Self> {
        let keys = Arc::new(SortKeys::new(&description, &header)?);
        Ok(Self {
            inputs,
            header,
            description,
            keys,
            max_block_size: max_block_size.max(1),
            limit,
            heap: BinaryHeap::new(),
            started: false,
            emitted: 0,
            finished: false,
        })
    }

    fn next_cursor(&mut self, input: usize) -> Result<Option<Cursor>> {
        while let Some(block) = self.inputs[input].read()? {
            if !block.is_empty() {
                return Ok(Some(Cursor { keys: Arc::clone(&self.keys), block: Arc::new(block), row: 0, input }));
            }
        }
        Ok(None)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.heap.clear();
        for input in &mut self.inputs {
            input.cancel();
        }
    }
}

impl BlockStream for MergingSortedStream {
    fn name(&self) -> &'static str {
        "MergingSorted"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            for input in 0..self.inputs.len() {
                if let Some(cursor) = self.next_cursor(input)? {
                    self.heap.push(cursor);
                }
            }
        }

        let mut rows = Vec::new();
        while rows.len() < self.max_block_size {
            if self.limit != 0 && self.emitted >= self.limit {
                break;
            }
            let Some(mut cursor) = self.heap.pop() else {
                break;
            };
            rows.push(cursor.block.row(cursor.row));
            self.emitted += 1;
            cursor.row += 1;
            if cursor.row < cursor.block.rows() {
                self.heap.push(cursor);
            } else if let Some(next) = self.next_cursor(cursor.input)? {
                self.heap.push(next);
            }
        }

        if (self.limit != 0 && self.emitted >= self.limit) || self.heap.is_empty() {
            self.finish();
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Block::from_rows(&self.header, rows)?))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.inputs
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.inputs
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        Some(&self.description)
    }

    fn describe(&self) -> String {
        format!("{} inputs by {}", self.inputs.len(), column_names(&self.description).join(", "))
    }
}

/// Full sort of individually sorted blocks.
///
/// Blocks are buffered in memory. Once the buffered size passes
/// `max_bytes_before_external_sort` (when non-zero) the buffer is merged into
/// one sorted run and written to a temporary file. The result merges the
/// remaining buffer with every run.
pub struct MergeSortingStream {
    input: [BoxedStream; 1],
    description: SortDescription,
    max_block_size: usize,
    limit: usize,
    max_bytes_before_external_sort: usize,
    ctx: QueryContext,
    merged: Option<BoxedStream>,
    finished: bool,
}

impl MergeSortingStream {
    #[must_use]
    pub fn new(
        input: BoxedStream,
        description: SortDescription,
        max_block_size: usize,
        limit: usize,
        max_bytes_before_external_sort: usize,
        ctx: &QueryContext,
    ) -> Self {
        Self {
            input: [input],
            description,
            max_block_size,
            limit,
            max_bytes_before_external_sort,
            ctx: ctx.clone(),
            merged: None,
            finished: false,
        }
    }

    fn merge_in_memory(&self, blocks: Vec<Block>) -> Result<BoxedStream> {
        let header = self.input[0].header();
        let inputs = blocks
            .into_iter()
            .map(|b| Box::new(BlocksStream::new(header.clone(), vec![b])) as BoxedStream)
            .collect();
        Ok(Box::new(MergingSortedStream::new(inputs, header, self.description.clone(), self.max_block_size, self.limit)?))
    }

    fn spill(&self, blocks: Vec<Block>) -> Result<spill::SpillFile> {
        self.ctx.hook(HookPoint::Spill)?;
        let mut run = self.merge_in_memory(blocks)?;
        let sorted = super::read_to_end(run.as_mut())?;
        let file = spill::write_blocks(&self.ctx.tmp_path(), sorted)?;
        self.ctx.metrics.increment_counter(names::SORT_SPILLED_FILES, 1);
        self.ctx.metrics.increment_counter(names::SORT_SPILLED_BYTES, file.bytes());
        debug!(path = %file.path().display(), bytes = file.bytes(), "sorted run written to temporary file");
        Ok(file)
    }

    fn build(&mut self) -> Result<BoxedStream> {
        let mut buffered = Vec::new();
        let mut buffered_bytes = 0;
        let mut runs = Vec::new();
        while let Some(block) = self.input[0].read()? {
            if block.is_empty() {
                continue;
            }
            buffered_bytes += block.byte_size();
            buffered.push(block);
            if self.max_bytes_before_external_sort != 0 && buffered_bytes > self.max_bytes_before_external_sort {
                runs.push(self.spill(std::mem::take(&mut buffered))?);
                buffered_bytes = 0;
            }
        }
        if runs.is_empty() {
            return self.merge_in_memory(buffered);
        }

        debug!(files = runs.len(), "merging sorted runs from temporary files");
        let header = self.input[0].header();
        let mut inputs = Vec::with_capacity(runs.len() + 1);
        for run in runs {
            inputs.push(Box::new(TemporaryFileStream::new(header.clone(), Arc::new(run))?) as BoxedStream);
        }
        if !buffered.is_empty() {
            inputs.push(self.merge_in_memory(buffered)?);
        }
        Ok(Box::new(MergingSortedStream::new(inputs, header, self.description.clone(), self.max_block_size, self.limit)?))
    }
}

impl BlockStream for MergeSortingStream {
    fn name(&self) -> &'static str {
        "MergeSorting"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        if self.merged.is_none() {
            self.merged = Some(self.build()?);
        }
        match self.merged.as_mut() {
            Some(merged) => merged.read(),
            None => Ok(None),
        }
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        Some(&self.description)
    }

    fn cancel(&mut self) {
        self.finished = true;
        self.input[0].cancel();
        if let Some(merged) = self.merged.as_mut() {
            merged.cancel();
        }
    }

    fn describe(&self) -> String {
        let mut s = column_names(&self.description).join(", ");
        if self.limit != 0 {
            s.push_str(&format!(", limit {}", self.limit));
        }
        if self.max_bytes_before_external_sort != 0 {
            s.push_str(&format!(", external after {} bytes", self.max_bytes_before_external_sort));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::settings::Settings;
    use crate::sort::SortColumnDescription;
    use crate::storage::Catalog;
    use crate::streams::read_to_end;
    use crate::types::{DataType, Value};

    fn header() -> Header {
        Header::new(vec![Field::new("x", DataType::Int64)])
    }

    fn sorted_chain(values: &[i64]) -> BoxedStream {
        let rows = values.iter().map(|&v| vec![Value::Int(v)]).collect();
        Box::new(BlocksStream::new(header(), vec![Block::from_rows(&header(), rows).unwrap()]))
    }

    fn flatten(blocks: &[Block]) -> Vec<Value> {
        blocks.iter().flat_map(|b| b.columns[0].values.clone()).collect()
    }

    #[test]
    fn merge_interleaves_sorted_inputs_and_honours_limit() {
        let desc = vec![SortColumnDescription::new("x", false)];
        let mut s = MergingSortedStream::new(vec![sorted_chain(&[1, 4, 7]), sorted_chain(&[2, 3, 9])], header(), desc, 2, 5)
            .unwrap();
        let blocks = read_to_end(&mut s).unwrap();
        assert!(blocks.iter().all(|b| b.rows() <= 2));
        assert_eq!(flatten(&blocks), [1, 2, 3, 4, 7].map(Value::Int).to_vec());
    }

    #[test]
    fn merge_sorting_of_nothing_keeps_the_header() {
        let desc = vec![SortColumnDescription::new("x", false)];
        let ctx = QueryContext::new(Settings::default(), Arc::new(Catalog::new()));
        let empty = Box::new(BlocksStream::new(header(), Vec::new()));
        let mut s = MergeSortingStream::new(empty, desc, 10, 0, 0, &ctx);
        assert!(read_to_end(&mut s).unwrap().is_empty());
        assert_eq!(s.header(), header());
    }

    #[test]
    fn partial_sorting_reports_its_order() {
        let desc = vec![SortColumnDescription::new("x", true)];
        let mut s =
            PartialSortingStream::new(sorted_chain(&[1, 3, 2]), desc, 0, SizeLimits::unlimited(), ProgressCounter::new())
                .unwrap();
        assert_eq!(s.sort_description().map(column_names), Some(vec!["x".to_string()]));
        assert_eq!(flatten(&read_to_end(&mut s).unwrap()), [3, 2, 1].map(Value::Int).to_vec());
    }
}
