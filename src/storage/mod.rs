//! Table storages the pipeline reads from.
//!
//! A [`Storage`] reports its columns and hands out source streams for a
//! column set. Storages that can do part of the query themselves (a
//! distributed table whose shards aggregate locally) say so through
//! [`Storage::processing_stage`] and return blocks already processed up to
//! that stage.

mod distributed;
mod memory;

pub use distributed::DistributedTable;
pub use memory::MemoryTable;

use crate::block::{Field, Header};
use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::expression::SharedProgram;
use crate::query::{Expr, SelectQuery};
use crate::stage::ProcessingStage;
use crate::streams::BoxedStream;
use crate::types::{DataType, Value};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A column computed from other columns of the same table.
#[derive(Clone, Debug, PartialEq)]
pub struct AliasColumn {
    pub name: String,
    pub data_type: DataType,
    pub expr: Expr,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnsDescription {
    /// Columns physically stored.
    pub ordinary: Header,
    pub aliases: Vec<AliasColumn>,
}

impl ColumnsDescription {
    #[must_use]
    pub fn alias(&self, name: &str) -> Option<&AliasColumn> {
        self.aliases.iter().find(|a| a.name == name)
    }

    /// Type of an ordinary or alias column.
    #[must_use]
    pub fn type_of(&self, name: &str) -> Option<DataType> {
        self.ordinary
            .get(name)
            .map(|f| f.data_type.clone())
            .or_else(|| self.alias(name).map(|a| a.data_type.clone()))
    }

    /// Every column, ordinary ones first.
    #[must_use]
    pub fn all(&self) -> Header {
        let mut header = self.ordinary.clone();
        for alias in &self.aliases {
            header.push(Field::new(alias.name.clone(), alias.data_type.clone()));
        }
        header
    }
}

/// Filter evaluated by the storage while reading.
#[derive(Clone, Debug)]
pub struct PrewhereInfo {
    pub actions: SharedProgram,
    pub column_name: String,
}

/// What a storage is told about the query it serves.
#[derive(Clone, Debug)]
pub struct SelectQueryInfo {
    pub query: SelectQuery,
    pub prewhere: Option<PrewhereInfo>,
}

/// Counts the readers holding a table.
#[derive(Debug, Default)]
pub struct TableLock {
    readers: Arc<AtomicUsize>,
}

impl TableLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a shared hold. The hold is released when the holder drops.
    #[must_use]
    pub fn share(&self) -> Arc<TableLockHolder> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        Arc::new(TableLockHolder { readers: Arc::clone(&self.readers) })
    }

    /// Holders currently alive.
    #[must_use]
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct TableLockHolder {
    readers: Arc<AtomicUsize>,
}

impl Drop for TableLockHolder {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

pub trait Storage: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn columns(&self) -> ColumnsDescription;

    fn is_remote(&self) -> bool {
        false
    }

    fn supports_sampling(&self) -> bool {
        false
    }

    fn supports_final(&self) -> bool {
        false
    }

    fn supports_prewhere(&self) -> bool {
        false
    }

    /// Stage a read for `to_stage` will deliver.
    fn processing_stage(&self, _to_stage: ProcessingStage) -> ProcessingStage {
        ProcessingStage::FetchColumns
    }

    /// Header of the blocks a plain read of `columns` produces.
    ///
    /// # Errors
    /// `Planning` for an unknown column.
    fn sample_header(&self, columns: &[String]) -> Result<Header> {
        let description = self.columns();
        columns
            .iter()
            .map(|c| {
                description
                    .type_of(c)
                    .map(|t| Field::new(c.clone(), t))
                    .ok_or_else(|| QueryError::Planning(format!("there is no column '{c}' in table {}", self.name())))
            })
            .collect::<Result<Vec<_>>>()
            .map(Header::new)
    }

    /// Source streams for `columns`, and the stage their blocks are at.
    ///
    /// # Errors
    /// An unknown column, or whatever the storage fails with.
    fn read(
        &self,
        columns: &[String],
        info: &SelectQueryInfo,
        ctx: &QueryContext,
        to_stage: ProcessingStage,
        max_block_size: usize,
        num_streams: usize,
    ) -> Result<(Vec<BoxedStream>, ProcessingStage)>;

    fn table_lock(&self) -> &TableLock;

    fn lock_for_share(&self) -> Arc<TableLockHolder> {
        self.table_lock().share()
    }
}

/// Name to storage map shared by every query of a session.
#[derive(Debug)]
pub struct Catalog {
    tables: RwLock<HashMap<String, Arc<dyn Storage>>>,
}

/// Table read by a query without FROM.
pub const ONE_TABLE: &str = "one";

impl Catalog {
    /// A catalog holding only the single-row `one` table.
    #[must_use]
    pub fn new() -> Self {
        let one = MemoryTable::single_row(ONE_TABLE, "dummy", Value::UInt(0));
        let mut tables: HashMap<String, Arc<dyn Storage>> = HashMap::new();
        tables.insert(ONE_TABLE.to_string(), Arc::new(one));
        Self { tables: RwLock::new(tables) }
    }

    pub fn register(&self, storage: Arc<dyn Storage>) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(storage.name().to_string(), storage);
    }

    /// # Errors
    /// `UnknownTable` if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Storage>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.tables.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_holders_are_counted() {
        let lock = TableLock::new();
        let a = lock.share();
        let b = lock.share();
        assert_eq!(lock.readers(), 2);
        drop(a);
        drop(b);
        assert_eq!(lock.readers(), 0);
    }

    #[test]
    fn catalog_has_the_one_table() {
        let catalog = Catalog::new();
        assert_eq!(catalog.get(ONE_TABLE).unwrap().columns().ordinary.names(), vec!["dummy"]);
        assert!(matches!(catalog.get("missing"), Err(QueryError::UnknownTable(_))));
    }
}
