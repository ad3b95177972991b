use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::error::Result;
use crate::expression::SharedProgram;
use crate::sort::SortDescription;

/// Runs an expression program over every block.
pub struct ExpressionStream {
    input: [BoxedStream; 1],
    program: SharedProgram,
    header: Header,
}

impl ExpressionStream {
    /// # Errors
    /// If the program cannot run on the input's header.
    pub fn new(input: BoxedStream, program: SharedProgram) -> Result<Self> {
        let header = program.output_header(&input.header())?;
        Ok(Self { input: [input], program, header })
    }
}

impl BlockStream for ExpressionStream {
    fn name(&self) -> &'static str {
        "Expression"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        let Some(mut block) = self.input[0].read()? else {
            return Ok(None);
        };
        self.program.execute(&mut block)?;
        Ok(Some(block))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn totals(&self) -> Result<Option<Block>> {
        let Some(mut totals) = self.input[0].totals()? else {
            return Ok(None);
        };
        self.program.execute_on_totals(&mut totals)?;
        Ok(Some(totals))
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }

    fn describe(&self) -> String {
        self.program.describe()
    }
}

/// Runs an expression program, then keeps the rows where `filter_column` is
/// truthy. Empty results are skipped; totals pass through unfiltered.
pub struct FilterStream {
    input: [BoxedStream; 1],
    program: SharedProgram,
    filter_column: String,
    header: Header,
}

impl FilterStream {
    /// # Errors
    /// If the program cannot run on the input's header or does not produce
    /// `filter_column`.
    pub fn new(input: BoxedStream, program: SharedProgram, filter_column: impl Into<String>) -> Result<Self> {
        let filter_column = filter_column.into();
        let header = program.output_header(&input.header())?;
        header.position(&filter_column)?;
        Ok(Self { input: [input], program, filter_column, header })
    }
}

impl BlockStream for FilterStream {
    fn name(&self) -> &'static str {
        "Filter"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while let Some(mut block) = self.input[0].read()? {
            self.program.execute(&mut block)?;
            let mask: Vec<bool> = block.column(&self.filter_column)?.values.iter().map(|v| v.is_truthy()).collect();
            if mask.iter().all(|&keep| !keep) {
                continue;
            }
            if mask.iter().any(|&keep| !keep) {
                block.filter(&mask);
            }
            return Ok(Some(block));
        }
        Ok(None)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn totals(&self) -> Result<Option<Block>> {
        let Some(mut totals) = self.input[0].totals()? else {
            return Ok(None);
        };
        self.program.execute_on_totals(&mut totals)?;
        Ok(Some(totals))
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.filter_column, self.program.describe())
    }
}
