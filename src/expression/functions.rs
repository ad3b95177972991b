//! Built-in scalar functions.
//!
//! Evaluation is row-at-a-time over [`Value`]s. `NULL` arguments propagate to a
//! `NULL` result except for the boolean connectives, `if`, and `isNull`.

use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FormatResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarFunction {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Equals,
    NotEquals,
    Less,
    LessOrEquals,
    Greater,
    GreaterOrEquals,
    And,
    Or,
    Not,
    Lower,
    Upper,
    Concat,
    Length,
    If,
    IsNull,
}

impl ScalarFunction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plus => "plus",
            Self::Minus => "minus",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Modulo => "modulo",
            Self::Negate => "negate",
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Less => "less",
            Self::LessOrEquals => "lessOrEquals",
            Self::Greater => "greater",
            Self::GreaterOrEquals => "greaterOrEquals",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Lower => "lower",
            Self::Upper => "upper",
            Self::Concat => "concat",
            Self::Length => "length",
            Self::If => "if",
            Self::IsNull => "isNull",
        }
    }

    fn arity_error(self, got: usize) -> QueryError {
        QueryError::Planning(format!("number of arguments for function {} doesn't match: passed {got}", self.name()))
    }

    fn type_error(self, t: &DataType) -> QueryError {
        QueryError::Planning(format!("illegal type {t} of argument of function {}", self.name()))
    }

    /// Result type for the given argument types.
    ///
    /// # Errors
    /// `Planning` on arity or type mismatch.
    pub fn return_type(self, args: &[DataType]) -> Result<DataType> {
        let numeric = |t: &DataType| t.is_numeric() || *t == DataType::Nothing;
        let string = |t: &DataType| *t == DataType::String || *t == DataType::Nothing;
        let want = |n: usize| if args.len() == n { Ok(()) } else { Err(self.arity_error(args.len())) };
        match self {
            Self::Plus | Self::Minus | Self::Multiply | Self::Modulo => {
                want(2)?;
                for t in args {
                    if !numeric(t) {
                        return Err(self.type_error(t));
                    }
                }
                let common = DataType::common(&args[0], &args[1]).ok_or_else(|| self.type_error(&args[1]))?;
                Ok(match (self, common) {
                    (_, DataType::Bool | DataType::Nothing) => DataType::UInt64,
                    (Self::Minus, DataType::UInt64) => DataType::Int64,
                    (_, t) => t,
                })
            }
            Self::Divide => {
                want(2)?;
                if let Some(t) = args.iter().find(|t| !numeric(t)) {
                    return Err(self.type_error(t));
                }
                Ok(DataType::Float64)
            }
            Self::Negate => {
                want(1)?;
                match &args[0] {
                    DataType::Float64 => Ok(DataType::Float64),
                    t if numeric(t) => Ok(DataType::Int64),
                    t => Err(self.type_error(t)),
                }
            }
            Self::Equals | Self::NotEquals | Self::Less | Self::LessOrEquals | Self::Greater | Self::GreaterOrEquals => {
                want(2)?;
                let comparable = (numeric(&args[0]) && numeric(&args[1]))
                    || (string(&args[0]) && string(&args[1]))
                    || args[0] == args[1];
                if comparable { Ok(DataType::Bool) } else { Err(self.type_error(&args[1])) }
            }
            Self::And | Self::Or => {
                if args.len() < 2 {
                    return Err(self.arity_error(args.len()));
                }
                Ok(DataType::Bool)
            }
            Self::Not | Self::IsNull => {
                want(1)?;
                Ok(DataType::Bool)
            }
            Self::Lower | Self::Upper => {
                want(1)?;
                if string(&args[0]) { Ok(DataType::String) } else { Err(self.type_error(&args[0])) }
            }
            Self::Concat => {
                if args.is_empty() {
                    return Err(self.arity_error(0));
                }
                Ok(DataType::String)
            }
            Self::Length => {
                want(1)?;
                if string(&args[0]) { Ok(DataType::UInt64) } else { Err(self.type_error(&args[0])) }
            }
            Self::If => {
                want(3)?;
                DataType::common(&args[1], &args[2]).ok_or_else(|| self.type_error(&args[2]))
            }
        }
    }

    /// Evaluate on one row. `result_type` is what [`Self::return_type`] reported.
    #[must_use]
    pub fn eval(self, args: &[&Value], result_type: &DataType) -> Value {
        match self {
            Self::And => Value::Bool(args.iter().all(|v| v.is_truthy())),
            Self::Or => Value::Bool(args.iter().any(|v| v.is_truthy())),
            Self::IsNull => Value::Bool(args[0].is_null()),
            Self::If => {
                let v = if args[0].is_truthy() { args[1] } else { args[2] };
                v.clone().cast(result_type)
            }
            Self::Concat => {
                if args.iter().any(|v| v.is_null()) {
                    return Value::Null;
                }
                let mut out = String::new();
                for v in args {
                    match v {
                        Value::Str(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                Value::Str(out)
            }
            _ if args.iter().any(|v| v.is_null()) => Value::Null,
            Self::Not => Value::Bool(!args[0].is_truthy()),
            Self::Lower => args[0].as_str().map_or(Value::Null, |s| Value::Str(s.to_lowercase())),
            Self::Upper => args[0].as_str().map_or(Value::Null, |s| Value::Str(s.to_uppercase())),
            Self::Length => args[0].as_str().map_or(Value::Null, |s| Value::UInt(s.len() as u64)),
            Self::Equals => Value::Bool(args[0].compare(args[1]) == Ordering::Equal),
            Self::NotEquals => Value::Bool(args[0].compare(args[1]) != Ordering::Equal),
            Self::Less => Value::Bool(args[0].compare(args[1]) == Ordering::Less),
            Self::LessOrEquals => Value::Bool(args[0].compare(args[1]) != Ordering::Greater),
            Self::Greater => Value::Bool(args[0].compare(args[1]) == Ordering::Greater),
            Self::GreaterOrEquals => Value::Bool(args[0].compare(args[1]) != Ordering::Less),
            Self::Negate => match args[0] {
                Value::Float(f) => Value::Float(OrderedFloat(-f.0)),
                v => v.as_i128().map_or(Value::Null, |i| int_result(-i, result_type)),
            },
            Self::Divide => match (args[0].as_f64(), args[1].as_f64()) {
                (Some(a), Some(b)) => Value::Float(OrderedFloat(a / b)),
                _ => Value::Null,
            },
            Self::Plus | Self::Minus | Self::Multiply | Self::Modulo => arithmetic(self, args[0], args[1], result_type),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn int_result(i: i128, result_type: &DataType) -> Value {
    match result_type {
        DataType::UInt64 => Value::UInt(i as u64),
        #[allow(clippy::cast_precision_loss)]
        DataType::Float64 => Value::Float(OrderedFloat(i as f64)),
        _ => Value::Int(i as i64),
    }
}

fn arithmetic(func: ScalarFunction, a: &Value, b: &Value, result_type: &DataType) -> Value {
    if *result_type == DataType::Float64 {
        let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
            return Value::Null;
        };
        let r = match func {
            ScalarFunction::Plus => x + y,
            ScalarFunction::Minus => x - y,
            ScalarFunction::Multiply => x * y,
            _ => x % y,
        };
        return Value::Float(OrderedFloat(r));
    }
    let (Some(x), Some(y)) = (a.as_i128(), b.as_i128()) else {
        return Value::Null;
    };
    let r = match func {
        ScalarFunction::Plus => x.wrapping_add(y),
        ScalarFunction::Minus => x.wrapping_sub(y),
        ScalarFunction::Multiply => x.wrapping_mul(y),
        _ if y == 0 => return Value::Null,
        _ => x % y,
    };
    int_result(r, result_type)
}

impl Display for ScalarFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_types_and_values() {
        let t = ScalarFunction::Plus.return_type(&[DataType::Int64, DataType::UInt64]).unwrap();
        assert_eq!(t, DataType::Int64);
        assert_eq!(ScalarFunction::Plus.eval(&[&Value::Int(2), &Value::UInt(3)], &t), Value::Int(5));

        let t = ScalarFunction::Minus.return_type(&[DataType::UInt64, DataType::UInt64]).unwrap();
        assert_eq!(ScalarFunction::Minus.eval(&[&Value::UInt(2), &Value::UInt(3)], &t), Value::Int(-1));

        assert_eq!(ScalarFunction::Modulo.eval(&[&Value::Int(1), &Value::Int(0)], &DataType::Int64), Value::Null);
        assert!(ScalarFunction::Plus.return_type(&[DataType::String, DataType::Int64]).is_err());
    }

    #[test]
    fn null_propagation() {
        assert_eq!(ScalarFunction::Less.eval(&[&Value::Null, &Value::Int(1)], &DataType::Bool), Value::Null);
        assert_eq!(ScalarFunction::IsNull.eval(&[&Value::Null], &DataType::Bool), Value::Bool(true));
        assert_eq!(
            ScalarFunction::If.eval(&[&Value::Null, &Value::Int(1), &Value::Int(2)], &DataType::Int64),
            Value::Int(2)
        );
    }
}
