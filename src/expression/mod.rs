//! Expression programs.
//!
//! An expression program mutates a block in place: it adds computed columns,
//! probes a hash join, tests set membership, drops or reorders columns. The
//! pipeline only sees the [`ExpressionProgram`] trait; [`ExpressionActions`] is
//! the built-in implementation the planner compiles queries into, and
//! [`ExpressionChain`] strings several of them together so that each step
//! keeps only the columns later steps still need.

pub mod actions;
pub mod chain;
pub mod functions;
pub mod join;
pub mod set;

pub use actions::{Action, ExpressionActions};
pub use chain::{ChainStep, ExpressionChain};
pub use functions::ScalarFunction;
pub use join::HashJoin;
pub use set::PreparedSet;

use crate::block::{Block, Header};
use crate::error::Result;
use std::fmt::Debug;
use std::sync::Arc;

/// A deterministic in-place block transformation.
pub trait ExpressionProgram: Send + Sync + Debug {
    /// Transform `block` in place.
    ///
    /// # Errors
    /// Missing input columns or failures of joins and sets not yet built.
    fn execute(&self, block: &mut Block) -> Result<()>;

    /// Header produced for blocks with header `input`, without executing anything.
    ///
    /// # Errors
    /// As for [`Self::execute`].
    fn output_header(&self, input: &Header) -> Result<Header> {
        let mut sample = Block::empty(input);
        self.execute(&mut sample)?;
        Ok(sample.header())
    }

    /// Input columns this program reads.
    fn required_columns(&self) -> Vec<String>;

    /// Applied to the totals row. Joins are skipped on totals.
    ///
    /// # Errors
    /// As for [`Self::execute`].
    fn execute_on_totals(&self, block: &mut Block) -> Result<()> {
        self.execute(block)
    }

    /// Hint to discard input columns the program does not read before running.
    fn drop_unused_inputs(&mut self) {}

    /// One-line summary for explain output.
    fn describe(&self) -> String {
        format!("{:?}", self.required_columns())
    }
}

pub type SharedProgram = Arc<dyn ExpressionProgram>;
