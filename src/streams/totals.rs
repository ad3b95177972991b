use super::{BlockStream, BoxedStream};
use crate::aggregate::{Aggregator, AggregatorParams};
use crate::block::{Block, Header};
use crate::combiners::AggregateState;
use crate::context::QueryContext;
use crate::error::Result;
use crate::expression::SharedProgram;
use crate::settings::TotalsMode;
use crate::types::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Finalizes partially aggregated blocks, applies HAVING and accumulates the
/// `WITH TOTALS` row.
///
/// Which rows count towards totals depends on `totals_mode`: every row before
/// HAVING, or only rows that pass it. The overflow row of a capped GROUP BY
/// is held back from the output and folded into totals unless the mode
/// excludes it; under `AfterHavingAuto` it is folded in when at least
/// `auto_include_threshold` of the keys passed HAVING.
pub struct TotalsHavingStream {
    input: [BoxedStream; 1],
    aggregator: Aggregator,
    overflow_row: bool,
    expression: Option<SharedProgram>,
    filter_column: Option<String>,
    totals_mode: TotalsMode,
    auto_include_threshold: f64,
    finalized_header: Header,
    header: Header,
    totals: Vec<AggregateState>,
    overflow: Option<Block>,
    total_keys: usize,
    passed_keys: usize,
}

impl TotalsHavingStream {
    /// # Errors
    /// If the input lacks an aggregate column, or the HAVING program does
    /// not produce `filter_column`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: BoxedStream,
        params: Arc<AggregatorParams>,
        overflow_row: bool,
        expression: Option<SharedProgram>,
        filter_column: Option<String>,
        totals_mode: TotalsMode,
        auto_include_threshold: f64,
        ctx: &QueryContext,
    ) -> Result<Self> {
        let aggregator = Aggregator::new(params, ctx.clone());
        let finalized_header = aggregator.finalize_block(Block::empty(&input.header()))?.header();
        let header = match &expression {
            Some(program) => program.output_header(&finalized_header)?,
            None => finalized_header.clone(),
        };
        if let Some(column) = &filter_column {
            header.position(column)?;
        }
        let totals = aggregator.new_states();
        Ok(Self {
            input: [input],
            aggregator,
            overflow_row,
            expression,
            filter_column,
            totals_mode,
            auto_include_threshold,
            finalized_header,
            header,
            totals,
            overflow: None,
            total_keys: 0,
            passed_keys: 0,
        })
    }
}

fn add_to_totals(aggregator: &Aggregator, totals: &mut [AggregateState], block: &Block, mask: Option<&[bool]>) -> Result<()> {
    for row in 0..block.rows() {
        if mask.is_none_or(|m| m[row]) {
            aggregator.merge_row_into(totals, block, row)?;
        }
    }
    Ok(())
}

impl BlockStream for TotalsHavingStream {
    fn name(&self) -> &'static str {
        "TotalsHaving"
    }

    fn header(&self) -> Header {
        self.header.clone()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        while let Some(block) = self.input[0].read()? {
            if self.overflow_row && block.info.is_overflows {
                self.overflow = Some(block);
                continue;
            }
            let mut finalized = self.aggregator.finalize_block(block.clone())?;
            self.total_keys += finalized.rows();

            match (&self.expression, &self.filter_column) {
                (Some(program), Some(column)) => {
                    program.execute(&mut finalized)?;
                    let mask: Vec<bool> = finalized.column(column)?.values.iter().map(|v| v.is_truthy()).collect();
                    if self.totals_mode == TotalsMode::BeforeHaving {
                        add_to_totals(&self.aggregator, &mut self.totals, &block, None)?;
                    } else {
                        add_to_totals(&self.aggregator, &mut self.totals, &block, Some(&mask))?;
                    }
                    finalized.filter(&mask);
                }
                (Some(program), None) => {
                    program.execute(&mut finalized)?;
                    add_to_totals(&self.aggregator, &mut self.totals, &block, None)?;
                }
                (None, _) => add_to_totals(&self.aggregator, &mut self.totals, &block, None)?,
            }

            self.passed_keys += finalized.rows();
            if finalized.is_empty() {
                continue;
            }
            return Ok(Some(finalized));
        }
        Ok(None)
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    /// Always one row: with no input rows it holds the initial states.
    fn totals(&self) -> Result<Option<Block>> {
        let mut states = self.totals.clone();
        if let Some(overflow) = &self.overflow {
            #[allow(clippy::cast_precision_loss)]
            let include = match self.totals_mode {
                TotalsMode::BeforeHaving | TotalsMode::AfterHavingInclusive => true,
                TotalsMode::AfterHavingExclusive => false,
                TotalsMode::AfterHavingAuto => {
                    self.total_keys != 0
                        && self.passed_keys as f64 / self.total_keys as f64 >= self.auto_include_threshold
                }
            };
            if include {
                for row in 0..overflow.rows() {
                    self.aggregator.merge_row_into(&mut states, overflow, row)?;
                }
            }
        }

        let mut finished: HashMap<&str, Value> = self
            .aggregator
            .params()
            .aggregates
            .iter()
            .map(|a| a.column_name.as_str())
            .zip(self.aggregator.finish_states(states))
            .collect();
        let row = self
            .finalized_header
            .fields()
            .iter()
            .map(|field| finished.remove(field.name.as_str()).unwrap_or_else(|| field.data_type.default_value()))
            .collect();
        let mut totals = Block::from_rows(&self.finalized_header, vec![row])?;
        if let Some(program) = &self.expression {
            program.execute_on_totals(&mut totals)?;
        }
        Ok(Some(totals))
    }

    fn describe(&self) -> String {
        format!(
            "mode {:?}{}{}",
            self.totals_mode,
            self.filter_column.as_deref().map(|c| format!(", having {c}")).unwrap_or_default(),
            if self.overflow_row { ", overflow row" } else { "" }
        )
    }
}
