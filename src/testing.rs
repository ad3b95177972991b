//! Helpers for tests of queries built with this crate.
//!
//! - **Fixtures**: small in-memory tables and contexts
//! - **Assertions**: compare result rows, in order or as multisets
//! - **Hooks**: record and inject faults at the pipeline's hook points
//!
//! # Quick Start
//!
//! ```
//! use blockflow::query::*;
//! use blockflow::testing::*;
//! use blockflow::{InterpreterSelect, ProcessingStage};
//!
//! # fn main() -> anyhow::Result<()> {
//! let table = memory_table("t", &["k", "v"], vec![vec![vec![1, 10], vec![1, 20], vec![2, 5]]])?;
//! let ctx = test_context([table]);
//!
//! let query = SelectQuery::new()
//!     .select([col("k"), sum(col("v"))])
//!     .from_table("t")
//!     .group_by([col("k")]);
//! let output = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?.read_all()?;
//!
//! assert_rows_unordered_equal(&output.rows(), &int_rows(&[&[1, 30], &[2, 5]]));
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;
pub mod hooks;

pub use assertions::*;
pub use fixtures::*;
pub use hooks::*;
