//! Pre-built tables and contexts.

use crate::block::{Block, Field, Header};
use crate::context::QueryContext;
use crate::error::Result;
use crate::settings::Settings;
use crate::storage::{Catalog, MemoryTable, Storage};
use crate::types::{DataType, Value};
use std::sync::Arc;

/// A header of `Int64` columns.
#[must_use]
pub fn int_header(names: &[&str]) -> Header {
    Header::new(names.iter().map(|n| Field::new(*n, DataType::Int64)).collect())
}

/// Rows of `Value::Int`.
///
/// ```
/// use blockflow::testing::int_rows;
/// use blockflow::types::Value;
///
/// assert_eq!(int_rows(&[&[1, 2]]), vec![vec![Value::Int(1), Value::Int(2)]]);
/// ```
#[must_use]
pub fn int_rows(rows: &[&[i64]]) -> Vec<Vec<Value>> {
    rows.iter().map(|r| r.iter().copied().map(Value::Int).collect()).collect()
}

/// A block of `Int64` columns.
///
/// # Errors
/// If a row has a different number of values than there are columns.
pub fn int_block(names: &[&str], rows: &[&[i64]]) -> Result<Block> {
    Block::from_rows(&int_header(names), int_rows(rows))
}

/// A [`MemoryTable`] of `Int64` columns. Each inner list becomes one block.
///
/// # Errors
/// If a row does not match `names`.
pub fn memory_table(name: &str, names: &[&str], blocks: Vec<Vec<Vec<i64>>>) -> Result<Arc<dyn Storage>> {
    let header = int_header(names);
    let blocks = blocks
        .into_iter()
        .map(|rows| Block::from_rows(&header, rows.into_iter().map(|r| r.into_iter().map(Value::Int).collect()).collect()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(MemoryTable::new(name, header, blocks)?))
}

/// A context with default settings over a catalog holding `tables`.
#[must_use]
pub fn test_context(tables: impl IntoIterator<Item = Arc<dyn Storage>>) -> QueryContext {
    context_with(Settings::default(), tables)
}

#[must_use]
pub fn context_with(settings: Settings, tables: impl IntoIterator<Item = Arc<dyn Storage>>) -> QueryContext {
    let catalog = Catalog::new();
    for table in tables {
        catalog.register(table);
    }
    QueryContext::new(settings, Arc::new(catalog))
}

/// `(k, v)` rows split over one block per row: `(1,10), (1,20), (2,5)`.
///
/// # Errors
/// Never in practice; the rows match the header.
pub fn grouped_sample(name: &str) -> Result<Arc<dyn Storage>> {
    memory_table(name, &["k", "v"], vec![vec![vec![1, 10]], vec![vec![1, 20]], vec![vec![2, 5]]])
}
