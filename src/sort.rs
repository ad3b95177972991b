//! Sort descriptions and row comparison.

use crate::block::{Block, Header};
use crate::error::{QueryError, Result};
use crate::types::Value;
use std::cmp::Ordering;

/// Locale-aware string comparison for `ORDER BY ... COLLATE`.
///
/// Strings compare case-insensitively first and fall back to a byte
/// comparison to stay total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collator {
    locale: String,
}

impl Collator {
    /// # Errors
    /// `Configuration` for an empty or malformed locale name.
    pub fn new(locale: &str) -> Result<Self> {
        let valid = !locale.is_empty()
            && locale.split(['_', '-']).all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));
        if !valid {
            return Err(QueryError::Configuration(format!("unsupported collation locale '{locale}'")));
        }
        Ok(Self { locale: locale.to_string() })
    }

    #[must_use]
    pub fn locale(&self) -> &str {
        &self.locale
    }

    #[must_use]
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortColumnDescription {
    pub column_name: String,
    pub descending: bool,
    pub nulls_first: bool,
    pub collator: Option<Collator>,
}

impl SortColumnDescription {
    #[must_use]
    pub fn new(column_name: impl Into<String>, descending: bool) -> Self {
        Self { column_name: column_name.into(), descending, nulls_first: false, collator: None }
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return if self.nulls_first { Ordering::Less } else { Ordering::Greater },
            (false, true) => return if self.nulls_first { Ordering::Greater } else { Ordering::Less },
            (false, false) => {}
        }
        let ord = match (&self.collator, a, b) {
            (Some(c), Value::Str(x), Value::Str(y)) => c.compare(x, y),
            _ => a.compare(b),
        };
        if self.descending { ord.reverse() } else { ord }
    }
}

/// Ordered list of sort keys.
pub type SortDescription = Vec<SortColumnDescription>;

/// Sort key positions resolved against one header.
#[derive(Clone, Debug)]
pub struct SortKeys {
    description: SortDescription,
    positions: Vec<usize>,
}

impl SortKeys {
    /// # Errors
    /// `LogicalInconsistency` if a sort column is missing from `header`.
    pub fn new(description: &SortDescription, header: &Header) -> Result<Self> {
        let positions = description.iter().map(|d| header.position(&d.column_name)).collect::<Result<Vec<_>>>()?;
        Ok(Self { description: description.clone(), positions })
    }

    #[must_use]
    pub fn compare(&self, a: &Block, i: usize, b: &Block, j: usize) -> Ordering {
        for (d, &p) in self.description.iter().zip(&self.positions) {
            let ord = d.compare(&a.columns[p].values[i], &b.columns[p].values[j]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable in-block sort, keeping at most `limit` rows when non-zero.
    #[must_use]
    pub fn sort_block(&self, block: &Block, limit: usize) -> Block {
        let mut indices: Vec<usize> = (0..block.rows()).collect();
        indices.sort_by(|&i, &j| self.compare(block, i, block, j));
        if limit != 0 {
            indices.truncate(limit);
        }
        block.take(&indices)
    }
}

#[must_use]
pub fn column_names(description: &SortDescription) -> Vec<String> {
    description.iter().map(|d| d.column_name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::types::DataType;

    #[test]
    fn nulls_last_by_default_in_both_directions() {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let block = Block::from_rows(
            &header,
            vec![vec![Value::Int(2)], vec![Value::Null], vec![Value::Int(1)], vec![Value::Int(3)]],
        )
        .unwrap();

        let asc = SortKeys::new(&vec![SortColumnDescription::new("x", false)], &header).unwrap();
        let sorted = asc.sort_block(&block, 0);
        assert_eq!(sorted.columns[0].values, vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Null]);

        let desc = SortKeys::new(&vec![SortColumnDescription::new("x", true)], &header).unwrap();
        let sorted = desc.sort_block(&block, 2);
        assert_eq!(sorted.columns[0].values, vec![Value::Int(3), Value::Int(2)]);
    }

    #[test]
    fn collation_is_case_insensitive() {
        let c = Collator::new("en_US").unwrap();
        assert_eq!(c.compare("apple", "Banana"), Ordering::Less);
        assert!(Collator::new("").is_err());
    }
}
