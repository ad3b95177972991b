//! Distinct value combiner: `Uniq`

use super::{expect_arity, AggregateKind, AggregateState, CombineFn};
use crate::error::Result;
use crate::types::{DataType, Value};
use std::collections::BTreeSet;

/* ===================== Uniq ===================== */

/// Exact count of **distinct** non-null values per group.
///
/// - Accumulator: `BTreeSet<Value>`
/// - Output: `UInt64`
#[derive(Clone, Copy, Debug, Default)]
pub struct Uniq;

impl CombineFn for Uniq {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Uniq
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Uniq, args, &[1])?;
        Ok(DataType::UInt64)
    }

    fn create(&self) -> AggregateState {
        AggregateState::Uniq(BTreeSet::new())
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Uniq(set) = acc
            && !args[0].is_null()
        {
            set.insert(args[0].clone());
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Uniq(a), AggregateState::Uniq(b)) = (acc, other) {
            if a.is_empty() {
                *a = b;
            } else {
                a.extend(b);
            }
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Uniq(set) => Value::UInt(set.len() as u64),
            _ => Value::Null,
        }
    }
}
