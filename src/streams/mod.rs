//! Pull-based block streams.
//!
//! Every operator of a built pipeline is a [`BlockStream`]: it reports the
//! header of the blocks it will produce without running anything, and hands
//! out blocks one at a time from [`BlockStream::read`] until it returns
//! `Ok(None)`. A chain of streams is strictly sequential; parallelism comes
//! from [`UnionStream`], [`AsynchronousStream`] and the parallel aggregation
//! streams, which drive several chains from worker threads.
//!
//! Cross-cutting behaviors (read limits, extremes, totals) are composed as
//! wrapping streams rather than baked into each operator.

mod basic;
mod creating_sets;
mod distinct;
mod expression;
mod extremes;
mod limit;
mod limits;
mod sorting;
mod totals;
mod union;

pub use basic::{BlocksStream, ConcatStream, ConvertingStream, NonJoinedStream, NullStream, TemporaryFileStream};
pub use creating_sets::{CreatingSetsStream, SetTarget, SubqueryForSet};
pub use distinct::{DistinctSortedStream, DistinctStream};
pub use expression::{ExpressionStream, FilterStream};
pub use extremes::{default_extremes, merge_extremes, ExtremesStream};
pub use limit::{LimitByStream, LimitStream};
pub use limits::{LimitsStream, LocalLimits, ProgressCounter};
pub use sorting::{MergeSortingStream, MergingSortedStream, PartialSortingStream};
pub use totals::TotalsHavingStream;
pub use union::{AsynchronousStream, UnionStream};

use crate::block::{Block, Header};
use crate::error::Result;
use crate::sort::SortDescription;

pub type BoxedStream = Box<dyn BlockStream>;

/// One operator of a pipeline.
pub trait BlockStream: Send {
    /// Operator name used by explain output.
    fn name(&self) -> &'static str;

    /// Structure of every block [`Self::read`] returns.
    fn header(&self) -> Header;

    /// Next block, or `None` at end of stream.
    ///
    /// # Errors
    /// Whatever the operator or one of its inputs fails with.
    fn read(&mut self) -> Result<Option<Block>>;

    /// Child streams that have not been handed to worker threads.
    fn inputs(&self) -> &[BoxedStream] {
        &[]
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut []
    }

    /// The `WITH TOTALS` row, available once the stream is exhausted.
    ///
    /// # Errors
    /// If finishing the row fails, e.g. a program applied to it.
    fn totals(&self) -> Result<Option<Block>> {
        for input in self.inputs() {
            if let Some(totals) = input.totals()? {
                return Ok(Some(totals));
            }
        }
        Ok(None)
    }

    /// Two-row (min, max) block, available once the stream is exhausted.
    fn extremes(&self) -> Option<Block> {
        merge_extremes(self.inputs().iter().filter_map(|s| s.extremes()))
    }

    /// Set when the output is sorted (grouped) by these columns.
    fn sort_description(&self) -> Option<&SortDescription> {
        None
    }

    /// Ask the stream to stop early. Later reads return `None`.
    fn cancel(&mut self) {
        for input in self.inputs_mut() {
            input.cancel();
        }
    }

    /// Operator parameters for explain output.
    fn describe(&self) -> String {
        String::new()
    }
}

/// Read `stream` to the end.
///
/// # Errors
/// The first error the stream returns.
pub fn read_to_end(stream: &mut dyn BlockStream) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    while let Some(block) = stream.read()? {
        blocks.push(block);
    }
    Ok(blocks)
}
