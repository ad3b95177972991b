//! Compiled expression actions.
//!
//! An [`ExpressionActions`] is a straight-line program over named columns.
//! Each [`Action`] reads columns that already exist in the block and adds,
//! removes or reorders columns. The program tracks a zero-row sample block so
//! that the type and name of every intermediate column is known while the
//! program is being assembled.

use super::{ExpressionProgram, HashJoin, PreparedSet, ScalarFunction};
use crate::block::{Block, Column, Header};
use crate::error::{QueryError, Result};
use crate::types::{DataType, Value};
use std::collections::HashSet;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

#[derive(Clone)]
pub enum Action {
    AddConstant { name: String, value: Value, data_type: DataType },
    ApplyFunction { name: String, func: ScalarFunction, args: Vec<String>, data_type: DataType },
    InSet { name: String, args: Vec<String>, set: Arc<PreparedSet>, negated: bool },
    /// Duplicate `source` under another name (aliases).
    Copy { source: String, name: String },
    Join(Arc<HashJoin>),
    Remove(String),
    /// Keep exactly these columns, in this order.
    Project(Vec<String>),
}

impl Action {
    fn inputs(&self) -> Vec<String> {
        match self {
            Self::AddConstant { .. } | Self::Remove(_) => Vec::new(),
            Self::ApplyFunction { args, .. } | Self::InSet { args, .. } => args.clone(),
            Self::Copy { source, .. } => vec![source.clone()],
            Self::Join(join) => join.key_names().to_vec(),
            Self::Project(cols) => cols.clone(),
        }
    }

    fn outputs(&self) -> Vec<String> {
        match self {
            Self::AddConstant { name, .. }
            | Self::ApplyFunction { name, .. }
            | Self::InSet { name, .. }
            | Self::Copy { name, .. } => vec![name.clone()],
            Self::Join(join) => join.columns_added().iter().map(|f| f.name.clone()).collect(),
            Self::Remove(_) | Self::Project(_) => Vec::new(),
        }
    }

    fn execute(&self, block: &mut Block, on_totals: bool) -> Result<()> {
        let rows = block.rows();
        match self {
            Self::AddConstant { name, value, data_type } => {
                block.set_column(Column::new(name.clone(), data_type.clone(), vec![value.clone(); rows]));
            }
            Self::ApplyFunction { name, func, args, data_type } => {
                let positions = args.iter().map(|a| block.position(a)).collect::<Result<Vec<_>>>()?;
                let mut values = Vec::with_capacity(rows);
                let mut row: Vec<&Value> = Vec::with_capacity(positions.len());
                for i in 0..rows {
                    row.clear();
                    row.extend(positions.iter().map(|&p| &block.columns[p].values[i]));
                    values.push(func.eval(&row, data_type));
                }
                block.set_column(Column::new(name.clone(), data_type.clone(), values));
            }
            Self::InSet { name, args, set, negated } => {
                let positions = args.iter().map(|a| block.position(a)).collect::<Result<Vec<_>>>()?;
                let mut values = Vec::with_capacity(rows);
                let mut row: Vec<&Value> = Vec::with_capacity(positions.len());
                for i in 0..rows {
                    row.clear();
                    row.extend(positions.iter().map(|&p| &block.columns[p].values[i]));
                    values.push(Value::Bool(set.contains(&row)? != *negated));
                }
                block.set_column(Column::new(name.clone(), DataType::Bool, values));
            }
            Self::Copy { source, name } => {
                let mut column = block.column(source)?.clone();
                column.name.clone_from(name);
                block.set_column(column);
            }
            Self::Join(join) => {
                if on_totals {
                    join.join_totals(block);
                } else {
                    join.join_block(block)?;
                }
            }
            Self::Remove(name) => {
                block.remove_column(name);
            }
            Self::Project(cols) => {
                let mut projected = Vec::with_capacity(cols.len());
                for c in cols {
                    projected.push(block.column(c)?.clone());
                }
                block.columns = projected;
            }
        }
        Ok(())
    }
}

impl Debug for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::AddConstant { name, .. } => write!(f, "CONST {name}"),
            Self::ApplyFunction { name, .. } => write!(f, "FUNCTION {name}"),
            Self::InSet { name, set, .. } => write!(f, "IN {name} ({} elements)", set.len()),
            Self::Copy { source, name } => write!(f, "COPY {source} AS {name}"),
            Self::Join(join) => write!(f, "JOIN {:?} USING {:?}", join.kind(), join.key_names()),
            Self::Remove(name) => write!(f, "REMOVE {name}"),
            Self::Project(cols) => write!(f, "PROJECT {cols:?}"),
        }
    }
}

#[derive(Clone)]
pub struct ExpressionActions {
    input: Header,
    actions: Vec<Action>,
    sample: Block,
    project_input: bool,
}

impl ExpressionActions {
    #[must_use]
    pub fn new(input: Header) -> Self {
        let sample = Block::empty(&input);
        Self { input, actions: Vec::new(), sample, project_input: false }
    }

    #[must_use]
    pub const fn input(&self) -> &Header {
        &self.input
    }

    #[must_use]
    pub fn sample_header(&self) -> Header {
        self.sample.header()
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.sample.has(name)
    }

    /// Type of a column in the current sample.
    ///
    /// # Errors
    /// `LogicalInconsistency` if absent.
    pub fn type_of(&self, name: &str) -> Result<DataType> {
        Ok(self.sample.column(name)?.data_type.clone())
    }

    /// Append an action, checking its inputs against the current sample.
    ///
    /// # Errors
    /// `LogicalInconsistency` if an input column does not exist yet.
    pub fn add(&mut self, action: Action) -> Result<()> {
        for input in action.inputs() {
            if !self.sample.has(&input) {
                return Err(QueryError::LogicalInconsistency(format!(
                    "unknown identifier: {input}; there are columns: {}",
                    self.sample.header().names().join(", ")
                )));
            }
        }
        action.execute(&mut self.sample, false)?;
        self.actions.push(action);
        Ok(())
    }

    /// Append an input column that an earlier stage provides.
    pub fn add_input(&mut self, field: crate::block::Field) {
        if self.input.has(&field.name) {
            return;
        }
        self.sample.set_column(Column::new(field.name.clone(), field.data_type.clone(), Vec::new()));
        self.input.push(field);
    }

    /// Drop every action not contributing to `required_output`, trim the
    /// input to the columns still read, and end with a projection of exactly
    /// `required_output` unless the program already ends with one.
    ///
    /// With nothing required or nothing read, the narrowest input column is
    /// kept so that blocks still carry their row count.
    ///
    /// # Errors
    /// `LogicalInconsistency` if a required output is produced by nothing.
    pub fn finalize(&mut self, required_output: &[String]) -> Result<()> {
        let mut ends_with_project = matches!(self.actions.last(), Some(Action::Project(_)));
        let mut required_output = required_output.to_vec();
        if required_output.is_empty() {
            // A block without columns has no row count: keep the narrowest input.
            if let Some(smallest) = self.input.fields().iter().min_by_key(|f| f.data_type.value_width()) {
                required_output.push(smallest.name.clone());
                if ends_with_project {
                    self.actions.pop();
                    ends_with_project = false;
                }
            }
        }
        let mut needed: HashSet<String> = required_output.iter().cloned().collect();
        let mut kept = Vec::with_capacity(self.actions.len());
        for action in self.actions.drain(..).rev() {
            let keep = match &action {
                Action::Join(_) | Action::Project(_) => true,
                Action::Remove(_) => false,
                other => other.outputs().iter().any(|o| needed.contains(o)),
            };
            if keep {
                for o in action.outputs() {
                    needed.remove(&o);
                }
                needed.extend(action.inputs());
                kept.push(action);
            }
        }
        kept.reverse();

        let mut used_inputs: Vec<_> =
            self.input.fields().iter().filter(|f| needed.contains(&f.name)).cloned().collect();
        if used_inputs.is_empty()
            && let Some(smallest) = self.input.fields().iter().min_by_key(|f| f.data_type.value_width())
        {
            used_inputs.push(smallest.clone());
        }
        self.input = Header::new(used_inputs);
        self.sample = Block::empty(&self.input);
        self.actions.clear();
        for action in kept {
            self.add(action)?;
        }
        if !ends_with_project {
            let mut seen = HashSet::new();
            let cols: Vec<String> = required_output.iter().filter(|c| seen.insert((*c).clone())).cloned().collect();
            self.add(Action::Project(cols))?;
        }
        Ok(())
    }

    /// Discard block columns outside [`Self::input`] before running.
    pub fn prepend_project_input(&mut self) {
        self.project_input = true;
    }

    fn run(&self, block: &mut Block, on_totals: bool) -> Result<()> {
        if self.project_input {
            block.columns.retain(|c| self.input.has(&c.name));
        }
        for action in &self.actions {
            action.execute(block, on_totals)?;
        }
        Ok(())
    }
}

impl ExpressionProgram for ExpressionActions {
    fn execute(&self, block: &mut Block) -> Result<()> {
        self.run(block, false)
    }

    fn required_columns(&self) -> Vec<String> {
        self.input.names()
    }

    fn execute_on_totals(&self, block: &mut Block) -> Result<()> {
        self.run(block, true)
    }

    fn drop_unused_inputs(&mut self) {
        self.prepend_project_input();
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self.actions.iter().map(|a| format!("{a:?}")).collect();
        parts.join("; ")
    }
}

impl Debug for ExpressionActions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("ExpressionActions")
            .field("input", &self.input.names())
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;

    fn header() -> Header {
        Header::new(vec![Field::new("a", DataType::Int64), Field::new("b", DataType::Int64)])
    }

    #[test]
    fn finalize_prunes_unused_actions_and_inputs() {
        let mut actions = ExpressionActions::new(header());
        actions
            .add(Action::ApplyFunction {
                name: "plus(a, a)".into(),
                func: ScalarFunction::Plus,
                args: vec!["a".into(), "a".into()],
                data_type: DataType::Int64,
            })
            .unwrap();
        actions
            .add(Action::ApplyFunction {
                name: "negate(b)".into(),
                func: ScalarFunction::Negate,
                args: vec!["b".into()],
                data_type: DataType::Int64,
            })
            .unwrap();
        actions.finalize(&["plus(a, a)".to_string()]).unwrap();

        assert_eq!(actions.required_columns(), vec!["a".to_string()]);
        let mut block = Block::from_rows(&header(), vec![vec![Value::Int(2), Value::Int(9)]]).unwrap();
        actions.execute(&mut block).unwrap();
        assert_eq!(block.header().names(), vec!["plus(a, a)".to_string()]);
        assert_eq!(block.row(0), vec![Value::Int(4)]);
    }

    #[test]
    fn finalize_without_outputs_keeps_the_row_count() {
        let header = Header::new(vec![Field::new("s", DataType::String), Field::new("n", DataType::Int64)]);
        let mut actions = ExpressionActions::new(header.clone());
        actions.finalize(&[]).unwrap();
        assert_eq!(actions.required_columns(), vec!["n".to_string()]);

        let rows = vec![vec![Value::Str("x".into()), Value::Int(1)], vec![Value::Str("y".into()), Value::Int(2)]];
        let mut block = Block::from_rows(&header, rows).unwrap();
        actions.execute(&mut block).unwrap();
        assert_eq!(block.header().names(), vec!["n".to_string()]);
        assert_eq!(block.rows(), 2);
    }

    #[test]
    fn unknown_input_is_rejected() {
        let mut actions = ExpressionActions::new(header());
        let err = actions.add(Action::Copy { source: "zzz".into(), name: "x".into() }).unwrap_err();
        assert!(matches!(err, QueryError::LogicalInconsistency(_)));
    }
}
