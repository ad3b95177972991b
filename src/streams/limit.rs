use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::error::Result;
use crate::sort::SortDescription;
use crate::types::Value;
use std::collections::HashMap;

/// Rows `[offset, offset + limit)` of its input.
///
/// Once the window is complete the input is cancelled, unless
/// `always_read_till_end` is set, in which case the input is drained so that
/// totals computed further down see all rows.
pub struct LimitStream {
    input: [BoxedStream; 1],
    limit: usize,
    offset: usize,
    always_read_till_end: bool,
    pos: usize,
    cancelled: bool,
}

impl LimitStream {
    #[must_use]
    pub const fn new(input: BoxedStream, limit: usize, offset: usize, always_read_till_end: bool) -> Self {
        Self { input: [input], limit, offset, always_read_till_end, pos: 0, cancelled: false }
    }

    fn finish(&mut self) -> Result<()> {
        if self.always_read_till_end {
            while self.input[0].read()?.is_some() {}
        } else if !self.cancelled {
            self.cancelled = true;
            self.input[0].cancel();
        }
        Ok(())
    }
}

impl BlockStream for LimitStream {
    fn name(&self) -> &'static str {
        "Limit"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        let end = self.offset.saturating_add(self.limit);
        if self.pos >= end {
            self.finish()?;
            return Ok(None);
        }

        let mut block;
        let mut rows;
        loop {
            let Some(b) = self.input[0].read()? else {
                return Ok(None);
            };
            block = b;
            rows = block.rows();
            self.pos += rows;
            if self.pos > self.offset {
                break;
            }
        }

        // Whole block inside the window.
        if self.pos >= self.offset + rows && self.pos <= end {
            if self.pos == end {
                self.finish()?;
            }
            return Ok(Some(block));
        }

        let start = self.offset.saturating_sub(self.pos - rows);
        let length = self.limit.min(self.pos - self.offset).min(end + rows - self.pos);
        if self.pos >= end {
            self.finish()?;
        }
        Ok(Some(block.slice(start, length)))
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

    fn cancel(&mut self) {
        self.cancelled = true;
        self.pos = self.offset.saturating_add(self.limit);
        self.always_read_till_end = false;
        self.input[0].cancel();
    }

    fn describe(&self) -> String {
        format!(
            "limit {} offset {}{}",
            self.limit,
            self.offset,
            if self.always_read_till_end { ", read till end" } else { "" }
        )
    }
}

/// At most `group_size` rows per distinct value of the `columns` tuple.
pub struct LimitByStream {
    input: [BoxedStream; 1],
    group_size: usize,
    columns: Vec<String>,
    counts: HashMap<Vec<Value>, usize>,
}

impl LimitByStream {
    #[must_use]
    pub fn new(input: BoxedStream, group_size: usize, columns: Vec<String>) -> Self {
        Self { input: [input], group_size, columns, counts: HashMap::new() }
    }
}

impl BlockStream for LimitByStream {
    fn name(&self) -> &'static str {
        "LimitBy"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while let Some(mut block) = self.input[0].read()? {
            let positions = self.columns.iter().map(|c| block.position(c)).collect::<Result<Vec<_>>>()?;
            let mask: Vec<bool> = (0..block.rows())
                .map(|i| {
                    let count = self.counts.entry(block.key_at(&positions, i)).or_insert(0);
                    *count += 1;
                    *count <= self.group_size
                })
                .collect();
            if !mask.iter().any(|&keep| keep) {
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
        format!("{} BY {:?}", self.group_size, self.columns)
    }
}
