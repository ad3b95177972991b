//! Hash join with `USING` keys.
//!
//! The build side is filled once by the set-materialization step; probing
//! is read-only apart from the per-row `used` flags that RIGHT and FULL joins
//! consult when emitting the rows that never matched.

use crate::block::{Block, Column, Field, Header};
use crate::error::{QueryError, Result};
use crate::query::JoinKind;
use crate::types::{DataType, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

#[derive(Debug)]
struct JoinTable {
    /// Key columns then added columns, in [`HashJoin::right_header`] order.
    right: Block,
    map: HashMap<Vec<Value>, Vec<usize>>,
    used: Vec<AtomicBool>,
}

#[derive(Debug)]
pub struct HashJoin {
    kind: JoinKind,
    key_names: Vec<String>,
    key_types: Vec<DataType>,
    columns_added: Vec<Field>,
    table: OnceLock<JoinTable>,
}

impl HashJoin {
    #[must_use]
    pub fn new(kind: JoinKind, keys: Vec<Field>, columns_added: Vec<Field>) -> Self {
        Self {
            kind,
            key_names: keys.iter().map(|f| f.name.clone()).collect(),
            key_types: keys.into_iter().map(|f| f.data_type).collect(),
            columns_added,
            table: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> JoinKind {
        self.kind
    }

    #[must_use]
    pub fn key_names(&self) -> &[String] {
        &self.key_names
    }

    #[must_use]
    pub fn columns_added(&self) -> &[Field] {
        &self.columns_added
    }

    /// Structure the build-side query must produce.
    #[must_use]
    pub fn right_header(&self) -> Header {
        let mut fields: Vec<Field> =
            self.key_names.iter().zip(&self.key_types).map(|(n, t)| Field::new(n.clone(), t.clone())).collect();
        fields.extend(self.columns_added.iter().cloned());
        Header::new(fields)
    }

    #[must_use]
    pub fn is_built(&self) -> bool {
        self.table.get().is_some()
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.table.get().map_or(0, |t| t.right.rows())
    }

    /// Build the hash table from the right side's blocks.
    ///
    /// # Errors
    /// `LogicalInconsistency` if a block lacks a needed column or the table is
    /// already built.
    pub fn fill(&self, blocks: Vec<Block>) -> Result<()> {
        let header = self.right_header();
        let mut right = Block::empty(&header);
        for block in blocks {
            let mut reordered = Vec::with_capacity(header.len());
            for field in header.fields() {
                let src = block.column(&field.name)?;
                reordered.push(Column::new(
                    field.name.clone(),
                    field.data_type.clone(),
                    src.values.iter().map(|v| v.clone().cast(&field.data_type)).collect(),
                ));
            }
            right.append(Block::new(reordered)?)?;
        }
        let key_positions: Vec<usize> = (0..self.key_names.len()).collect();
        let mut map: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for i in 0..right.rows() {
            let key = right.key_at(&key_positions, i);
            if key.iter().any(Value::is_null) {
                continue;
            }
            map.entry(key).or_default().push(i);
        }
        let used = (0..right.rows()).map(|_| AtomicBool::new(false)).collect();
        self.table
            .set(JoinTable { right, map, used })
            .map_err(|_| QueryError::LogicalInconsistency("join is already built".to_string()))
    }

    fn append_empty_added(&self, block: &mut Block) {
        for f in &self.columns_added {
            block.set_column(Column::new(f.name.clone(), f.data_type.clone(), Vec::new()));
        }
    }

    /// Add default-valued right columns without probing. Used on totals.
    pub fn join_totals(&self, block: &mut Block) {
        let rows = block.rows();
        for f in &self.columns_added {
            block.set_column(Column::new(f.name.clone(), f.data_type.clone(), vec![f.data_type.default_value(); rows]));
        }
    }

    /// Probe with `block` and replace it by the joined rows.
    ///
    /// # Errors
    /// `LogicalInconsistency` when probing a non-empty block before the table
    /// is built or when key columns are missing.
    pub fn join_block(&self, block: &mut Block) -> Result<()> {
        if block.is_empty() {
            self.append_empty_added(block);
            return Ok(());
        }
        let table = self
            .table
            .get()
            .ok_or_else(|| QueryError::LogicalInconsistency("join is not built before probing".to_string()))?;
        let positions = self.key_names.iter().map(|n| block.position(n)).collect::<Result<Vec<_>>>()?;

        let mut left_rows = Vec::with_capacity(block.rows());
        let mut right_rows: Vec<Option<usize>> = Vec::with_capacity(block.rows());
        for i in 0..block.rows() {
            let key: Vec<Value> = positions
                .iter()
                .zip(&self.key_types)
                .map(|(&p, t)| block.columns[p].values[i].clone().cast(t))
                .collect();
            match table.map.get(&key) {
                Some(matches) => {
                    for &j in matches {
                        table.used[j].store(true, Ordering::Relaxed);
                        left_rows.push(i);
                        right_rows.push(Some(j));
                    }
                }
                None if self.kind.keeps_unmatched_left() => {
                    left_rows.push(i);
                    right_rows.push(None);
                }
                None => {}
            }
        }

        let info = block.info;
        let mut joined = block.take(&left_rows);
        let first_added = self.key_names.len();
        for (k, f) in self.columns_added.iter().enumerate() {
            let src = &table.right.columns[first_added + k].values;
            let values =
                right_rows.iter().map(|r| r.map_or_else(|| f.data_type.default_value(), |j| src[j].clone())).collect();
            joined.set_column(Column::new(f.name.clone(), f.data_type.clone(), values));
        }
        joined.info = info;
        *block = joined;
        Ok(())
    }

    /// Right rows that no probe matched, laid out per `header` (the header
    /// after the join). Left-only columns get type defaults, key columns take
    /// the right-side key values.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the table is not built.
    pub fn non_joined_blocks(&self, header: &Header, max_block_size: usize) -> Result<Vec<Block>> {
        let table = self
            .table
            .get()
            .ok_or_else(|| QueryError::LogicalInconsistency("join is not built before reading non-joined rows".to_string()))?;
        let unused: Vec<usize> =
            (0..table.right.rows()).filter(|&j| !table.used[j].load(Ordering::Relaxed)).collect();
        let right_header = self.right_header();
        let mut out = Vec::new();
        for chunk in unused.chunks(max_block_size.max(1)) {
            let mut columns = Vec::with_capacity(header.len());
            for f in header.fields() {
                let values = match right_header.position(&f.name) {
                    Ok(p) => chunk.iter().map(|&j| table.right.columns[p].values[j].clone().cast(&f.data_type)).collect(),
                    Err(_) => vec![f.data_type.default_value(); chunk.len()],
                };
                columns.push(Column::new(f.name.clone(), f.data_type.clone(), values));
            }
            out.push(Block::new(columns)?);
        }
        Ok(out)
    }
}
