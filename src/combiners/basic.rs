//! Basic combiners: `Count`, `Sum`, `Min`, `Max`, `Any`

use super::{expect_arity, AggregateKind, AggregateState, CombineFn};
use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;

/* ===================== Count ===================== */

/// Number of rows (`count()`) or of non-null argument values (`count(x)`).
#[derive(Clone, Copy, Debug, Default)]
pub struct Count;

impl CombineFn for Count {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Count
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Count, args, &[0, 1])?;
        Ok(DataType::UInt64)
    }

    fn create(&self) -> AggregateState {
        AggregateState::Count(0)
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Count(n) = acc
            && args.first().is_none_or(|v| !v.is_null())
        {
            *n += 1;
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Count(a), AggregateState::Count(b)) = (acc, other) {
            *a += b;
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Count(n) => Value::UInt(n),
            _ => Value::Null,
        }
    }
}

/* ===================== Sum ===================== */

/// Sum of numeric values. Integer sums wrap on overflow.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

fn add_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Null, v) | (v, Value::Null) => v.clone(),
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        (Value::UInt(x), Value::UInt(y)) => Value::UInt(x.wrapping_add(*y)),
        (Value::Bool(x), Value::Bool(y)) => Value::UInt(u64::from(*x) + u64::from(*y)),
        (Value::UInt(x), Value::Bool(y)) | (Value::Bool(y), Value::UInt(x)) => {
            Value::UInt(x.wrapping_add(u64::from(*y)))
        }
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Value::Float(OrderedFloat(x + y)),
            _ => Value::Null,
        },
    }
}

impl CombineFn for Sum {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Sum
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Sum, args, &[1])?;
        match &args[0] {
            DataType::Int64 => Ok(DataType::Int64),
            DataType::UInt64 | DataType::Bool | DataType::Nothing => Ok(DataType::UInt64),
            DataType::Float64 => Ok(DataType::Float64),
            other => Err(QueryError::Planning(format!("illegal type {other} of argument for aggregate function sum"))),
        }
    }

    fn create(&self) -> AggregateState {
        AggregateState::Sum(Value::Null)
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Sum(cur) = acc {
            *cur = add_values(cur, args[0]);
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Sum(a), AggregateState::Sum(b)) = (acc, other) {
            *a = add_values(a, &b);
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Sum(Value::Null) => Value::Int(0),
            AggregateState::Sum(v) => v,
            _ => Value::Null,
        }
    }
}

/* ===================== Min / Max ===================== */

fn keep_extreme(cur: &mut Value, v: &Value, wanted: Ordering) {
    if v.is_null() {
        return;
    }
    if cur.is_null() || v.compare(cur) == wanted {
        *cur = v.clone();
    }
}

/// Minimum value per group. Empty groups produce `NULL`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Min;

impl CombineFn for Min {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Min
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Min, args, &[1])?;
        Ok(args[0].clone())
    }

    fn create(&self) -> AggregateState {
        AggregateState::Min(Value::Null)
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Min(cur) = acc {
            keep_extreme(cur, args[0], Ordering::Less);
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Min(a), AggregateState::Min(b)) = (acc, other) {
            keep_extreme(a, &b, Ordering::Less);
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Min(v) => v,
            _ => Value::Null,
        }
    }
}

/// Maximum value per group. Empty groups produce `NULL`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Max;

impl CombineFn for Max {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Max
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Max, args, &[1])?;
        Ok(args[0].clone())
    }

    fn create(&self) -> AggregateState {
        AggregateState::Max(Value::Null)
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Max(cur) = acc {
            keep_extreme(cur, args[0], Ordering::Greater);
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Max(a), AggregateState::Max(b)) = (acc, other) {
            keep_extreme(a, &b, Ordering::Greater);
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Max(v) => v,
            _ => Value::Null,
        }
    }
}

/* ===================== Any ===================== */

/// First non-null value seen for the group.
#[derive(Clone, Copy, Debug, Default)]
pub struct Any;

impl CombineFn for Any {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Any
    }

    fn return_type(&self, args: &[DataType]) -> Result<DataType> {
        expect_arity(AggregateKind::Any, args, &[1])?;
        Ok(args[0].clone())
    }

    fn create(&self) -> AggregateState {
        AggregateState::Any(Value::Null)
    }

    fn add_input(&self, acc: &mut AggregateState, args: &[&Value]) {
        if let AggregateState::Any(cur) = acc
            && cur.is_null()
        {
            *cur = args[0].clone();
        }
    }

    fn merge(&self, acc: &mut AggregateState, other: AggregateState) {
        if let (AggregateState::Any(a), AggregateState::Any(b)) = (acc, other)
            && a.is_null()
        {
            *a = b;
        }
    }

    fn finish(&self, acc: AggregateState) -> Value {
        match acc {
            AggregateState::Any(v) => v,
            _ => Value::Null,
        }
    }
}
