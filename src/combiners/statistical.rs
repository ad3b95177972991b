//! Statistical combiners: `Avg`

use super::{expect_arity, AggregateKind, AggregateState, CombineFn};
use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use ordered_float::OrderedFloat;

/* ===================== Avg ===================== */

/// Arithmetic mean of numeric values as `Float64`.
///
/// - Accumulator: running `(sum, count)`
/// - Empty groups produce `NULL`, not `NaN`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Avg;

impl CombineFn for Avg {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Avg
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Avg, args, &[1])?;
        if args[0].is_numeric() || args[0] == DataType::Nothing {
            Ok(DataType::Float64)
        } else {
            Err(QueryError::Planning(format!(
                "illegal type {} of argument for aggregate function avg",
                args[0]
            )))
        }
    }

    fn create(&self) -> AggregateState {
        AggregateState::Avg { sum: OrderedFloat(0.0), count: 0 }
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Avg { sum, count } = acc
            && let Some(x) = args[0].as_f64()
        {
            sum.0 += x;
            *count += 1;
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Avg { sum, count }, AggregateState::Avg { sum: s2, count: c2 }) = (acc, other) {
            sum.0 += s2.0;
            *count += c2;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Avg { count: 0, .. } => Value::Null,
            AggregateState::Avg { sum, count } => Value::Float(OrderedFloat(sum.0 / count as f64)),
            _ => Value::Null,
        }
    }
}
