use super::{BlockStream, BoxedStream};
use crate::block::{Block, Column, Header};
use crate::error::Result;
use crate::sort::SortDescription;
use crate::types::Value;
use std::cmp::Ordering;

/// Merge (min, max) blocks column by column. Nulls never win.
pub fn merge_extremes(blocks: impl IntoIterator<Item = Block>) -> Option<Block> {
    let mut merged: Option<Block> = None;
    for block in blocks {
        if block.rows() != 2 {
            continue;
        }
        match merged.as_mut() {
            None => merged = Some(block),
            Some(acc) => {
                for (dst, src) in acc.columns.iter_mut().zip(block.columns) {
                    let mut src = src.values.into_iter();
                    if let (Some(min), Some(max)) = (src.next(), src.next()) {
                        keep(&mut dst.values[0], min, Ordering::Less);
                        keep(&mut dst.values[1], max, Ordering::Greater);
                    }
                }
            }
        }
    }
    merged
}

fn keep(current: &mut Value, candidate: Value, wanted: Ordering) {
    if candidate.is_null() {
        return;
    }
    if current.is_null() || candidate.compare(current) == wanted {
        *current = candidate;
    }
}

/// Extremes of a result without rows: two rows of type defaults.
#[must_use]
pub fn default_extremes(header: &Header) -> Block {
    let mut block = Block::empty(header);
    for column in &mut block.columns {
        column.values = vec![column.data_type.default_value(); 2];
    }
    block
}

/// Passes blocks through unchanged while tracking per-column minimum and
/// maximum values.
pub struct ExtremesStream {
    input: [BoxedStream; 1],
    extremes: Option<Block>,
}

impl ExtremesStream {
    #[must_use]
    pub const fn new(input: BoxedStream) -> Self {
        Self { input: [input], extremes: None }
    }

    fn update(&mut self, block: &Block) {
        if block.is_empty() {
            return;
        }
        let mut current = Block::default();
        for column in &block.columns {
            let mut min = Value::Null;
            let mut max = Value::Null;
            for v in &column.values {
                keep(&mut min, v.clone(), Ordering::Less);
                keep(&mut max, v.clone(), Ordering::Greater);
            }
            current.columns.push(Column::new(column.name.clone(), column.data_type.clone(), vec![min, max]));
        }
        self.extremes = merge_extremes(self.extremes.take().into_iter().chain(std::iter::once(current)));
    }
}

impl BlockStream for ExtremesStream {
    fn name(&self) -> &'static str {
        "Extremes"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        let block = self.input[0].read()?;
        if let Some(b) = &block {
            self.update(b);
        }
        Ok(block)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    /// `None` until a non-empty block has passed.
    fn extremes(&self) -> Option<Block> {
        self.extremes.clone()
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::streams::BlocksStream;
    use crate::types::DataType;

    #[test]
    fn extremes_span_all_blocks() {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let blocks = vec![
            Block::from_rows(&header, vec![vec![Value::Int(4)], vec![Value::Null], vec![Value::Int(2)]]).unwrap(),
            Block::from_rows(&header, vec![vec![Value::Int(9)], vec![Value::Int(-1)]]).unwrap(),
        ];
        let mut s = ExtremesStream::new(Box::new(BlocksStream::new(header, blocks)));
        while s.read().unwrap().is_some() {}
        let ext = s.extremes().unwrap();
        assert_eq!(ext.columns[0].values, vec![Value::Int(-1), Value::Int(9)]);
    }
}
