use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::context::{HookPoint, QueryContext};
use crate::error::Result;
use crate::expression::{HashJoin, PreparedSet};
use crate::interpreter::InterpreterSelectWithUnion;
use crate::metrics::names;
use crate::query::SelectWithUnionQuery;
use crate::settings::SizeLimits;
use crate::sort::SortDescription;
use crate::stage::ProcessingStage;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// What a materialized subquery fills.
#[derive(Clone, Debug)]
pub enum SetTarget {
    Set(Arc<PreparedSet>),
    Join(Arc<HashJoin>),
}

/// A subquery whose result must exist before the outer query reads a row.
#[derive(Clone, Debug)]
pub struct SubqueryForSet {
    /// Column name of the `IN` or the joined table, for logs and explain.
    pub name: String,
    pub query: SelectWithUnionQuery,
    pub target: SetTarget,
}

/// Runs every subquery to completion on the first read, fills its set or
/// join table, then passes the input through unchanged.
pub struct CreatingSetsStream {
    input: [BoxedStream; 1],
    subqueries: Vec<SubqueryForSet>,
    ctx: QueryContext,
    limits: SizeLimits,
    depth: usize,
    created: bool,
}

impl CreatingSetsStream {
    #[must_use]
    pub fn new(
        input: BoxedStream,
        subqueries: Vec<SubqueryForSet>,
        ctx: &QueryContext,
        limits: SizeLimits,
        depth: usize,
    ) -> Self {
        Self { input: [input], subqueries, ctx: ctx.clone(), limits, depth, created: false }
    }

    fn create_all(&mut self) -> Result<()> {
        for subquery in std::mem::take(&mut self.subqueries) {
            self.create_one(&subquery)?;
        }
        self.created = true;
        Ok(())
    }

    fn create_one(&self, subquery: &SubqueryForSet) -> Result<()> {
        self.ctx.hook(HookPoint::CreatingSet)?;
        let started = Instant::now();
        let mut settings = self.ctx.settings.clone();
        settings.extremes = false;
        let mut stream = InterpreterSelectWithUnion::new(
            subquery.query.clone(),
            self.ctx.with_settings(settings),
            ProcessingStage::Complete,
        )
        .subquery_depth(self.depth + 1)
        .execute()?
        .stream;

        let mut blocks = Vec::new();
        let (mut rows, mut bytes) = (0, 0);
        while let Some(block) = stream.read()? {
            self.ctx.cancel.check()?;
            rows += block.rows();
            bytes += block.byte_size();
            blocks.push(block);
            if !self.limits.check(rows, bytes, "rows to transfer")? {
                stream.cancel();
                break;
            }
        }

        match &subquery.target {
            SetTarget::Set(set) => {
                let mut elements = HashSet::new();
                for block in &blocks {
                    for i in 0..block.rows() {
                        elements.insert(set.key_of(block, i));
                    }
                }
                set.fill(elements)?;
                self.ctx.metrics.increment_counter(names::SET_ROWS, set.len() as u64);
                info!(
                    subquery = %subquery.name,
                    rows,
                    elements = set.len(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "created set"
                );
            }
            SetTarget::Join(join) => {
                join.fill(blocks)?;
                self.ctx.metrics.increment_counter(names::JOIN_ROWS, join.rows() as u64);
                info!(
                    subquery = %subquery.name,
                    rows = join.rows(),
                    elapsed_ms = started.elapsed().as_millis(),
                    "created join"
                );
            }
        }
        Ok(())
    }
}

impl BlockStream for CreatingSetsStream {
    fn name(&self) -> &'static str {
        "CreatingSets"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if !self.created {
            self.create_all()?;
        }
        self.input[0].read()
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }

    fn describe(&self) -> String {
        self.subqueries.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
    }
}
