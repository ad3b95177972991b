//! # Blockflow
//!
//! A **query pipeline builder** for a distributed columnar analytical engine.
//! Given an already-parsed SELECT, blockflow builds a tree of pull-based
//! block streams that produces the result in batches of columns.
//!
//! ## Key Features
//!
//! - **Stage-aware planning** - the same query runs as a partial stage on
//!   data-owning shards and as a merge stage on the coordinator
//! - **Aggregation** - single-level, two-level (bucketed) and external
//!   (spilling) GROUP BY, with parallel partial aggregation over chains
//! - **Sorting** - per-chain partial sort, k-way merge and external merge sort
//! - **Set operators** - DISTINCT, LIMIT, LIMIT BY, UNION ALL
//! - **Joins and IN sets** - hash JOIN with non-joined rows for RIGHT and FULL,
//!   `IN (subquery)` sets materialized before the first row
//! - **WITH TOTALS and extremes** - auxiliary rows alongside the result
//! - **Resource caps** - row, byte, time and speed limits with per-cap overflow policy
//!
//! ## Quick Start
//!
//! ```
//! use blockflow::query::*;
//! use blockflow::testing::{int_rows, memory_table, test_context};
//! use blockflow::{InterpreterSelect, ProcessingStage};
//!
//! # fn main() -> anyhow::Result<()> {
//! let table = memory_table("numbers", &["v"], vec![vec![vec![3], vec![1], vec![4]], vec![vec![1], vec![5]]])?;
//! let ctx = test_context([table]);
//!
//! let query = SelectQuery::new()
//!     .select([col("v")])
//!     .from_table("numbers")
//!     .order_by([col("v").desc()])
//!     .limit(2);
//! let output = InterpreterSelect::new(query, ctx, ProcessingStage::Complete).execute()?.read_all()?;
//!
//! assert_eq!(output.rows(), int_rows(&[&[5], &[4]]));
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Blocks and streams
//!
//! A [`Block`] is a set of equally long named, typed columns. Every operator
//! is a [`BlockStream`](streams::BlockStream): it reports its [`Header`]
//! without running and hands out blocks until it returns `None`.
//!
//! ### Processing stages
//!
//! [`ProcessingStage`] says how far a query has been executed.
//! [`analyze_stages`] splits the work between the shard side (`first_stage`)
//! and the coordinator side (`second_stage`).
//!
//! ### Interpreters
//!
//! [`InterpreterSelect`] builds the pipeline of one select;
//! [`InterpreterSelectWithUnion`] the pipelines of a `UNION ALL`. Both offer
//! `execute` (one stream), `execute_with_multiple_streams`, `sample_header`
//! (a dry run over empty sources) and `analysis` (the compiled plan).
//!
//! ### Storages
//!
//! A [`Storage`](storage::Storage) reports its columns and returns source
//! streams. [`MemoryTable`](storage::MemoryTable) and
//! [`DistributedTable`](storage::DistributedTable) are built in; tables are
//! looked up by name in the [`Catalog`](storage::Catalog) of the [`QueryContext`].
//!
//! ## Feature Flags
//!
//! - `spilling` (default) - external sort and external GROUP BY through
//!   temporary files

pub mod aggregate;
pub mod block;
pub mod combiners;
pub mod context;
pub mod error;
pub mod explain;
pub mod expression;
pub mod interpreter;
pub mod metrics;
pub mod pipeline;
pub mod planner;
pub mod query;
pub mod settings;
pub mod sort;
pub mod spill;
pub mod stage;
pub mod storage;
pub mod streams;
pub mod testing;
pub mod types;

pub use block::{Block, Column, Field, Header};
pub use context::{CancellationToken, HookPoint, QueryContext};
pub use error::{ErrorKind, QueryError, Result};
pub use explain::explain_stream;
pub use interpreter::{BlockIo, InterpreterSelect, InterpreterSelectWithUnion, QueryOutput};
pub use planner::CompiledPlan;
pub use settings::{OverflowMode, Settings, SizeLimits, TotalsMode};
pub use stage::{analyze_stages, ProcessingStage, StageBoundary};
pub use types::{DataType, Value};
