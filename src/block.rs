//! Columnar batches ("blocks") and their headers.
//!
//! A [`Block`] is an ordered list of equally sized [`Column`]s. The
//! [`Header`] of a block (names and types in position order) is what header
//! negotiation passes around without executing anything; every stream reports
//! the header of the blocks it will produce.
//!
//! Blocks are plain owned values: an operator takes a block from its input,
//! transforms it, and hands it downstream. Nothing shares a block mutably.

use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Name and type of one column position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// Ordered schema of a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header(pub Vec<Field>);

impl Header {
    #[must_use]
    pub const fn new(fields: Vec<Field>) -> Self {
        Self(fields)
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.name.clone()).collect()
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|f| f.name == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.0.iter().find(|f| f.name == name)
    }

    /// Position of `name`.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the column is absent.
    pub fn position(&self, name: &str) -> Result<usize> {
        self.0.iter().position(|f| f.name == name).ok_or_else(|| {
            QueryError::LogicalInconsistency(format!(
                "not found column {name} in block; there are only columns: {}",
                self.names().join(", ")
            ))
        })
    }

    pub fn push(&mut self, field: Field) {
        self.0.push(field);
    }

    /// Two headers are compatible when they have the same names and types in
    /// the same order.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self == other
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let parts: Vec<String> = self.0.iter().map(|c| format!("{} {}", c.name, c.data_type)).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Out-of-band facts about a block produced by aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// The block holds the single overflow row of an aggregation.
    pub is_overflows: bool,
    /// Two-level bucket the rows belong to, or `-1` for single-level data.
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self { is_overflows: false, bucket_num: -1 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, values: Vec<Value>) -> Self {
        Self { name: name.into(), data_type, values }
    }

    #[must_use]
    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data_type.clone())
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.values.iter().map(Value::byte_size).sum()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub columns: Vec<Column>,
    pub info: BlockInfo,
}

impl Block {
    /// Build a block, checking that all columns have the same length.
    ///
    /// # Errors
    /// `LogicalInconsistency` on ragged columns.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != rows) {
                return Err(QueryError::LogicalInconsistency(format!(
                    "sizes of columns doesn't match: {} has {rows} rows, {} has {}",
                    first.name,
                    bad.name,
                    bad.values.len()
                )));
            }
        }
        Ok(Self { columns, info: BlockInfo::default() })
    }

    /// A zero-row block with the given structure.
    #[must_use]
    pub fn empty(header: &Header) -> Self {
        Self {
            columns: header
                .fields()
                .iter()
                .map(|f| Column::new(f.name.clone(), f.data_type.clone(), Vec::new()))
                .collect(),
            info: BlockInfo::default(),
        }
    }

    /// Build from row tuples laid out according to `header`.
    ///
    /// # Errors
    /// `LogicalInconsistency` if a row has the wrong width.
    pub fn from_rows(header: &Header, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut block = Self::empty(header);
        for row in rows {
            block.push_row(row)?;
        }
        Ok(block)
    }

    #[must_use]
    pub fn header(&self) -> Header {
        Header(self.columns.iter().map(Column::field).collect())
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(Column::byte_size).sum()
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// # Errors
    /// `LogicalInconsistency` if absent.
    pub fn position(&self, name: &str) -> Result<usize> {
        self.columns.iter().position(|c| c.name == name).ok_or_else(|| {
            QueryError::LogicalInconsistency(format!(
                "not found column {name} in block; there are only columns: {}",
                self.header().names().join(", ")
            ))
        })
    }

    /// # Errors
    /// `LogicalInconsistency` if absent.
    pub fn column(&self, name: &str) -> Result<&Column> {
        let pos = self.position(name)?;
        Ok(&self.columns[pos])
    }

    /// Insert or replace a column by name.
    pub fn set_column(&mut self, column: Column) {
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *existing = column;
        } else {
            self.columns.push(column);
        }
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos))
    }

    #[must_use]
    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.values[i].clone()).collect()
    }

    /// Values of the given column positions at row `i`.
    #[must_use]
    pub fn key_at(&self, positions: &[usize], i: usize) -> Vec<Value> {
        positions.iter().map(|&p| self.columns[p].values[i].clone()).collect()
    }

    /// # Errors
    /// `LogicalInconsistency` if `row` has the wrong width.
    pub fn push_row(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(QueryError::LogicalInconsistency(format!(
                "row of width {} does not fit block of {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        for (col, v) in self.columns.iter_mut().zip(row) {
            col.values.push(v);
        }
        Ok(())
    }

    /// Keep rows whose mask entry is `true`.
    pub fn filter(&mut self, mask: &[bool]) {
        for col in &mut self.columns {
            let mut it = mask.iter();
            col.values.retain(|_| *it.next().unwrap_or(&false));
        }
    }

    /// Rows `[offset, offset + len)`, clamped to the block.
    #[must_use]
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let rows = self.rows();
        let start = offset.min(rows);
        let end = offset.saturating_add(len).min(rows);
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data_type.clone(), c.values[start..end].to_vec()))
                .collect(),
            info: self.info,
        }
    }

    /// Reorder rows by `indices` (may drop or repeat rows).
    #[must_use]
    pub fn take(&self, indices: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|c| {
                    Column::new(
                        c.name.clone(),
                        c.data_type.clone(),
                        indices.iter().map(|&i| c.values[i].clone()).collect(),
                    )
                })
                .collect(),
            info: self.info,
        }
    }

    /// Append all rows of `other`, matching columns by position.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the structures differ in width.
    pub fn append(&mut self, other: Self) -> Result<()> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.columns.len() != self.columns.len() {
            return Err(QueryError::LogicalInconsistency(format!(
                "cannot append block of {} columns to block of {} columns",
                other.columns.len(),
                self.columns.len()
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(other.columns) {
            dst.values.extend(src.values);
        }
        Ok(())
    }

    /// Concatenate blocks of the same structure.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the structures differ.
    pub fn concat(header: &Header, blocks: Vec<Self>) -> Result<Self> {
        let mut out = Self::empty(header);
        for b in blocks {
            out.append(b)?;
        }
        Ok(out)
    }

    /// Check that this block matches `header` by position.
    ///
    /// # Errors
    /// `LogicalInconsistency` on mismatch.
    pub fn check_header(&self, header: &Header, producer: &str) -> Result<()> {
        let own = self.header();
        if own.len() != header.len() {
            return Err(QueryError::LogicalInconsistency(format!(
                "{producer} produced {} columns, header declares {}",
                own.len(),
                header.len()
            )));
        }
        for (a, b) in own.fields().iter().zip(header.fields()) {
            if a.name != b.name {
                return Err(QueryError::LogicalInconsistency(format!(
                    "{producer} produced column {} where header declares {}",
                    a.name, b.name
                )));
            }
        }
        Ok(())
    }
}
