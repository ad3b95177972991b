//! Materialized sets for `IN`.

use crate::block::Block;
use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

/// The right-hand side of an `IN`, filled once and then shared read-only by
/// every chain that probes it.
#[derive(Debug)]
pub struct PreparedSet {
    data_types: Vec<DataType>,
    elements: OnceLock<HashSet<Vec<Value>>>,
}

impl PreparedSet {
    /// An empty set to be filled by the set-materialization step.
    #[must_use]
    pub const fn new(data_types: Vec<DataType>) -> Self {
        Self { data_types, elements: OnceLock::new() }
    }

    /// A set built immediately from literal values.
    #[must_use]
    pub fn from_values(data_type: DataType, values: Vec<Value>) -> Self {
        let set = Self::new(vec![data_type]);
        let elements = values.into_iter().map(|v| vec![v.cast(&set.data_types[0])]).collect();
        let _ = set.elements.set(elements);
        set
    }

    #[must_use]
    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.elements.get().is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.get().map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalized key for row `i` of `block`.
    #[must_use]
    pub fn key_of(&self, block: &Block, i: usize) -> Vec<Value> {
        block
            .columns
            .iter()
            .zip(&self.data_types)
            .map(|(c, t)| c.values[i].clone().cast(t))
            .collect()
    }

    /// Publish the collected elements.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the set was already filled.
    pub fn fill(&self, elements: HashSet<Vec<Value>>) -> Result<()> {
        self.elements
            .set(elements)
            .map_err(|_| QueryError::LogicalInconsistency("set is already created".to_string()))
    }

    /// Membership for a probe row. Rows containing `NULL` never match.
    ///
    /// # Errors
    /// `LogicalInconsistency` if the set has not been filled.
    pub fn contains(&self, key: &[&Value]) -> Result<bool> {
        let elements = self
            .elements
            .get()
            .ok_or_else(|| QueryError::LogicalInconsistency("set for IN is not created yet".to_string()))?;
        if key.iter().any(|v| v.is_null()) {
            return Ok(false);
        }
        let normalized: Vec<Value> =
            key.iter().zip(&self.data_types).map(|(v, t)| (*v).clone().cast(t)).collect();
        Ok(elements.contains(&normalized))
    }
}
