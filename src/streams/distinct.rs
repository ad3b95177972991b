use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::error::Result;
use crate::settings::SizeLimits;
use crate::sort::SortDescription;
use crate::types::Value;
use std::collections::HashSet;

/// Column positions to deduplicate on; all columns when `names` is empty.
fn distinct_positions(header: &Header, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        Ok((0..header.len()).collect())
    } else {
        names.iter().map(|n| header.position(n)).collect()
    }
}

fn key_bytes(key: &[Value]) -> usize {
    key.iter().map(Value::byte_size).sum()
}

/// Hash-based DISTINCT over the given columns.
///
/// Stops after `limit_hint` distinct rows when non-zero.
pub struct DistinctStream {
    input: [BoxedStream; 1],
    limits: SizeLimits,
    limit_hint: usize,
    positions: Vec<usize>,
    columns: Vec<String>,
    seen: HashSet<Vec<Value>>,
    seen_bytes: usize,
    finished: bool,
}

impl DistinctStream {
    /// # Errors
    /// If a distinct column is missing from the input.
    pub fn new(input: BoxedStream, limits: SizeLimits, limit_hint: usize, columns: Vec<String>) -> Result<Self> {
        let positions = distinct_positions(&input.header(), &columns)?;
        Ok(Self {
            input: [input],
            limits,
            limit_hint,
            positions,
            columns,
            seen: HashSet::new(),
            seen_bytes: 0,
            finished: false,
        })
    }
}

impl BlockStream for DistinctStream {
    fn name(&self) -> &'static str {
        "Distinct"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while !self.finished {
            let Some(mut block) = self.input[0].read()? else {
                return Ok(None);
            };
            let mut mask = Vec::with_capacity(block.rows());
            for i in 0..block.rows() {
                let key = block.key_at(&self.positions, i);
                let bytes = key_bytes(&key);
                let fresh = self.seen.insert(key);
                if fresh {
                    self.seen_bytes += bytes;
                }
                mask.push(fresh);
            }
            if !self.limits.check(self.seen.len(), self.seen_bytes, "in DISTINCT")? {
                self.finished = true;
                self.input[0].cancel();
                return Ok(None);
            }
            if self.limit_hint != 0 && self.seen.len() >= self.limit_hint {
                self.finished = true;
                self.input[0].cancel();
            }
            if !mask.iter().any(|&fresh| fresh) {
                continue;
            }
            block.filter(&mask);
            return Ok(Some(block));
        }
        Ok(None)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn describe(&self) -> String {
        let cols = if self.columns.is_empty() { "*".to_string() } else { self.columns.join(", ") };
        if self.limit_hint == 0 { cols } else { format!("{cols}, limit {}", self.limit_hint) }
    }
}

/// DISTINCT over input already sorted by some of the distinct columns.
///
/// The set of seen rows only has to cover one run of equal sort-key values,
/// so it is cleared every time the sorted prefix changes.
pub struct DistinctSortedStream {
    input: [BoxedStream; 1],
    limits: SizeLimits,
    limit_hint: usize,
    positions: Vec<usize>,
    /// Positions of the sort columns that are also distinct columns, up to the
    /// first one that is not.
    clearing_positions: Vec<usize>,
    previous_prefix: Option<Vec<Value>>,
    seen: HashSet<Vec<Value>>,
    seen_bytes: usize,
    emitted: usize,
    finished: bool,
}

impl DistinctSortedStream {
    /// # Errors
    /// If a distinct column is missing from the input.
    pub fn new(input: BoxedStream, limits: SizeLimits, limit_hint: usize, columns: Vec<String>) -> Result<Self> {
        let header = input.header();
        let positions = distinct_positions(&header, &columns)?;
        let mut clearing_positions = Vec::new();
        if let Some(description) = input.sort_description() {
            for d in description {
                match header.position(&d.column_name) {
                    Ok(p) if positions.contains(&p) => clearing_positions.push(p),
                    _ => break,
                }
            }
        }
        Ok(Self {
            input: [input],
            limits,
            limit_hint,
            positions,
            clearing_positions,
            previous_prefix: None,
            seen: HashSet::new(),
            seen_bytes: 0,
            emitted: 0,
            finished: false,
        })
    }
}

impl BlockStream for DistinctSortedStream {
    fn name(&self) -> &'static str {
        "DistinctSorted"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while !self.finished {
            let Some(mut block) = self.input[0].read()? else {
                return Ok(None);
            };
            let mut mask = Vec::with_capacity(block.rows());
            for i in 0..block.rows() {
                if !self.clearing_positions.is_empty() {
                    let prefix = block.key_at(&self.clearing_positions, i);
                    if self.previous_prefix.as_ref() != Some(&prefix) {
                        self.seen.clear();
                        self.seen_bytes = 0;
                        self.previous_prefix = Some(prefix);
                    }
                }
                let key = block.key_at(&self.positions, i);
                let bytes = key_bytes(&key);
                let fresh = self.seen.insert(key);
                if fresh {
                    self.seen_bytes += bytes;
                    self.emitted += 1;
                }
                mask.push(fresh);
            }
            if !self.limits.check(self.seen.len(), self.seen_bytes, "in DISTINCT")? {
                self.finished = true;
                self.input[0].cancel();
                return Ok(None);
            }
            if self.limit_hint != 0 && self.emitted >= self.limit_hint {
                self.finished = true;
                self.input[0].cancel();
            }
            if !mask.iter().any(|&fresh| fresh) {
                continue;
            }
            block.filter(&mask);
            return Ok(Some(block));
        }
        Ok(None)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::settings::OverflowMode;
    use crate::sort::SortColumnDescription;
    use crate::streams::{read_to_end, BlocksStream, MergingSortedStream};
    use crate::types::DataType;

    fn source() -> BoxedStream {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let rows = |v: &[i64]| v.iter().map(|&x| vec![Value::Int(x)]).collect();
        let blocks = vec![
            Block::from_rows(&header, rows(&[1, 2, 1])).unwrap(),
            Block::from_rows(&header, rows(&[2, 2])).unwrap(),
            Block::from_rows(&header, rows(&[3])).unwrap(),
        ];
        Box::new(BlocksStream::new(header, blocks))
    }

    #[test]
    fn duplicates_across_blocks_are_dropped() {
        let mut s = DistinctStream::new(source(), SizeLimits::unlimited(), 0, vec![]).unwrap();
        let out: Vec<Value> = read_to_end(&mut s).unwrap().into_iter().flat_map(|b| b.columns[0].values.clone()).collect();
        assert_eq!(out, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn distinct_row_cap_throws() {
        let limits = SizeLimits::new(1, 0, OverflowMode::Throw);
        let mut s = DistinctStream::new(source(), limits, 0, vec![]).unwrap();
        assert!(read_to_end(&mut s).is_err());
    }

    #[test]
    fn distinct_sorted_byte_cap_spans_blocks() {
        // Two distinct Int values fit in 20 bytes, the third does not.
        let limits = SizeLimits::new(0, 20, OverflowMode::Break);
        let mut s = DistinctSortedStream::new(source(), limits, 0, vec![]).unwrap();
        let out: Vec<Value> = read_to_end(&mut s).unwrap().into_iter().flat_map(|b| b.columns[0].values.clone()).collect();
        assert_eq!(out, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn distinct_sorted_byte_cap_resets_with_the_prefix() {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let blocks = (1..=4).map(|x| Block::from_rows(&header, vec![vec![Value::Int(x)], vec![Value::Int(x)]]).unwrap()).collect();
        let inputs = vec![Box::new(BlocksStream::new(header.clone(), blocks)) as BoxedStream];
        let description = vec![SortColumnDescription::new("x", false)];
        let sorted = Box::new(MergingSortedStream::new(inputs, header, description, 2, 0).unwrap());
        // Only one run is held at a time, so a cap of one value never trips.
        let limits = SizeLimits::new(0, 8, OverflowMode::Throw);
        let mut s = DistinctSortedStream::new(sorted, limits, 0, vec![]).unwrap();
        let out: Vec<Value> = read_to_end(&mut s).unwrap().into_iter().flat_map(|b| b.columns[0].values.clone()).collect();
        assert_eq!(out, (1..=4).map(Value::Int).collect::<Vec<_>>());
    }
}
