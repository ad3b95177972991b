//! Aggregate function combiners.
//!
//! Each aggregate function is a [`CombineFn`] over an [`AggregateState`]
//! accumulator with four phases:
//!
//! - `create` a fresh accumulator for a new group,
//! - `add_input` one row's argument values,
//! - `merge` another partial accumulator (the cross-stream / cross-node phase),
//! - `finish` into the final value.
//!
//! Partial accumulators are plain data, so they travel inside blocks as
//! [`Value::State`] between the remote stage and the coordinator and can be
//! spilled to disk. Built-ins:
//!
//! - [`Count`] -- `count()` / `count(x)`.
//! - [`Sum`] -- sum of numeric values.
//! - [`Min`] / [`Max`] -- extreme values.
//! - [`Any`] -- first non-null value.
//! - [`Avg`] -- arithmetic mean as `Float64`.
//! - [`Uniq`] -- exact count of distinct values.

mod basic;
mod distinct;
mod statistical;

pub use basic::{Any, Count, Max, Min, Sum};
pub use distinct::Uniq;
pub use statistical::Avg;

use crate::error::Result;
use crate::types::{DataType, Value};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Aggregate function identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregateKind {
    Count,
    Sum,
    Min,
    Max,
    Any,
    Avg,
    Uniq,
}

impl AggregateKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Any => "any",
            Self::Avg => "avg",
            Self::Uniq => "uniq",
        }
    }

    /// The combiner implementing this function.
    #[must_use]
    pub fn combiner(self) -> &'static dyn CombineFn {
        static COUNT: Count = Count;
        static SUM: Sum = Sum;
        static MIN: Min = Min;
        static MAX: Max = Max;
        static ANY: Any = Any;
        static AVG: Avg = Avg;
        static UNIQ: Uniq = Uniq;
        match self {
            Self::Count => &COUNT,
            Self::Sum => &SUM,
            Self::Min => &MIN,
            Self::Max => &MAX,
            Self::Any => &ANY,
            Self::Avg => &AVG,
            Self::Uniq => &UNIQ,
        }
    }
}

impl Display for AggregateKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{}", self.name())
    }
}

/// Accumulator of one aggregate function for one group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AggregateState {
    Count(u64),
    /// `Null` until the first non-null input.
    Sum(Value),
    Min(Value),
    Max(Value),
    Any(Value),
    Avg { sum: OrderedFloat<f64>, count: u64 },
    Uniq(BTreeSet<Value>),
}

impl AggregateState {
    #[must_use]
    pub const fn kind(&self) -> AggregateKind {
        match self {
            Self::Count(_) => AggregateKind::Count,
            Self::Sum(_) => AggregateKind::Sum,
            Self::Min(_) => AggregateKind::Min,
            Self::Max(_) => AggregateKind::Max,
            Self::Any(_) => AggregateKind::Any,
            Self::Avg { .. } => AggregateKind::Avg,
            Self::Uniq(_) => AggregateKind::Uniq,
        }
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Count(_) | Self::Avg { .. } => 16,
            Self::Sum(v) | Self::Min(v) | Self::Max(v) | Self::Any(v) => 8 + v.byte_size(),
            Self::Uniq(set) => 16 + set.iter().map(Value::byte_size).sum::<usize>(),
        }
    }
}

/// A mergeable aggregate function.
pub trait CombineFn: Send + Sync {
    fn kind(&self) -> AggregateKind;

    /// Result type for the given argument types.
    ///
    /// # Errors
    /// `Planning` on wrong arity or unsupported argument types.
    fn return_type(&self, args: &[DataType]) -> Result<DataType>;

    fn create(&self) -> AggregateState;

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]);

    fn merge(&self, acc: &mut AggregateState, other: AggregateState);

    fn finish(&self, acc: AggregateState) -> Value;
}

pub(crate) fn expect_arity(kind: AggregateKind, args: &[DataType], allowed: &[usize]) -> Result<()> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(crate::error::QueryError::Planning(format!(
            "aggregate function {kind} does not accept {} arguments",
            args.len()
        )))
    }
}
