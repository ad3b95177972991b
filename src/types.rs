//! Scalar values and column types.
//!
//! Every column in a [`Block`](crate::block::Block) carries a [`DataType`] and
//! a vector of [`Value`]s. All types admit [`Value::Null`]. Partially
//! aggregated columns (the `WithMergeableState` shape shipped between stages)
//! use [`DataType::AggregateState`] and hold [`Value::State`] payloads.

use crate::combiners::{AggregateKind, AggregateState};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Logical type of a column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Type of a bare `NULL` literal.
    Nothing,
    Bool,
    Int64,
    UInt64,
    Float64,
    String,
    /// Intermediate state of an aggregate function.
    AggregateState(AggregateKind),
}

impl DataType {
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64 | Self::UInt64 | Self::Float64 | Self::Bool)
    }

    /// The value used for a column of this type when a row has no source,
    /// e.g. the key columns of a totals row.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Nothing | Self::AggregateState(_) => Value::Null,
            Self::Bool => Value::Bool(false),
            Self::Int64 => Value::Int(0),
            Self::UInt64 => Value::UInt(0),
            Self::Float64 => Value::Float(OrderedFloat(0.0)),
            Self::String => Value::Str(String::new()),
        }
    }

    /// Estimated bytes per value.
    #[must_use]
    pub const fn value_width(&self) -> usize {
        match self {
            Self::Nothing | Self::Bool => 1,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            Self::String => 16,
            Self::AggregateState(_) => 32,
        }
    }

    /// Common supertype used for arithmetic and `if` branches.
    #[must_use]
    pub fn common(a: &Self, b: &Self) -> Option<Self> {
        use DataType::{Bool, Float64, Int64, Nothing, UInt64};
        match (a, b) {
            (x, y) if x == y => Some(x.clone()),
            (Nothing, other) | (other, Nothing) => Some(other.clone()),
            (Float64, y) | (y, Float64) if y.is_numeric() => Some(Float64),
            (Int64, UInt64 | Bool) | (UInt64 | Bool, Int64) => Some(Int64),
            (UInt64, Bool) | (Bool, UInt64) => Some(UInt64),
            _ => None,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Nothing => write!(f, "Nothing"),
            Self::Bool => write!(f, "Bool"),
            Self::Int64 => write!(f, "Int64"),
            Self::UInt64 => write!(f, "UInt64"),
            Self::Float64 => write!(f, "Float64"),
            Self::String => write!(f, "String"),
            Self::AggregateState(kind) => write!(f, "AggregateState({kind})"),
        }
    }
}

/// A single cell.
///
/// `Ord`/`Hash` are structural, which is what hash tables need. Use
/// [`Value::compare`] for SQL ordering across numeric variants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(OrderedFloat<f64>),
    Str(String),
    State(Box<AggregateState>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// SQL truthiness used by filters: non-zero numbers and `true`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::UInt(u) => *u != 0,
            Self::Float(f) => f.0 != 0.0,
            Self::Null | Self::Str(_) | Self::State(_) => false,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(f64::from(u8::from(*b))),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            #[allow(clippy::cast_precision_loss)]
            Self::UInt(u) => Some(*u as f64),
            Self::Float(f) => Some(f.0),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Bool(b) => Some(i128::from(*b)),
            Self::Int(i) => Some(i128::from(*i)),
            Self::UInt(u) => Some(i128::from(*u)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Rough in-memory footprint, used by byte caps and spill thresholds.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Null | Self::Bool(_) => 1,
            Self::Int(_) | Self::UInt(_) | Self::Float(_) => 8,
            Self::Str(s) => s.len() + 8,
            Self::State(state) => state.byte_size(),
        }
    }

    /// Ordering with numeric variants compared by value. `Null` sorts
    /// before everything; callers decide where nulls go.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Float(_), _) | (_, Self::Float(_)) => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => OrderedFloat(a).cmp(&OrderedFloat(b)),
                _ => self.cmp(other),
            },
            _ => match (self.as_i128(), other.as_i128()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => self.cmp(other),
            },
        }
    }

    /// Coerce into the representation of `data_type`, if possible.
    #[must_use]
    pub fn cast(self, data_type: &DataType) -> Self {
        match (data_type, self) {
            (_, Self::Null) => Self::Null,
            (DataType::Int64, v @ (Self::UInt(_) | Self::Bool(_))) => {
                v.as_i128().and_then(|i| i64::try_from(i).ok()).map_or(Self::Null, Self::Int)
            }
            (DataType::UInt64, v @ (Self::Int(_) | Self::Bool(_))) => {
                v.as_i128().and_then(|i| u64::try_from(i).ok()).map_or(Self::Null, Self::UInt)
            }
            (DataType::Float64, v @ (Self::Int(_) | Self::UInt(_) | Self::Bool(_))) => {
                v.as_f64().map_or(Self::Null, |f| Self::Float(OrderedFloat(f)))
            }
            (_, v) => v,
        }
    }

    /// Runtime type of a non-null value.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Nothing,
            Self::Bool(_) => DataType::Bool,
            Self::Int(_) => DataType::Int64,
            Self::UInt(_) => DataType::UInt64,
            Self::Float(_) => DataType::Float64,
            Self::Str(_) => DataType::String,
            Self::State(state) => DataType::AggregateState(state.kind()),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{}", x.0),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::State(state) => write!(f, "<{} state>", state.kind()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(OrderedFloat(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}
