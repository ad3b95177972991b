//! Stage analyzer.
//!
//! Compiles a [`SelectQuery`] into a [`CompiledPlan`]: one expression program
//! per relational step, plus the flags the pipeline builder needs to decide
//! what runs where. Steps are assembled in a fixed order:
//!
//! 1. **Join** -- probe the hash join built from the right-hand table.
//! 2. **Where** -- compute the filter column.
//! 3. **Aggregation input** -- group-by keys and aggregate arguments.
//! 4. **Having** -- over the finalized aggregation result.
//! 5. **Select and order by** -- the result expressions and sort keys.
//! 6. **Limit by** -- the per-group key columns.
//! 7. **Final projection** -- exactly the result columns, in order.
//!
//! Steps before aggregation share one [`ExpressionChain`] over the source
//! columns; steps after it share a second chain over the aggregated columns.
//! A step that does not run on the stage being built is still compiled, with
//! `only_types` set, so that headers agree across stages; such steps never
//! register subqueries for materialization.

use crate::aggregate::AggregateDescription;
use crate::block::{Field, Header};
use crate::context::QueryContext;
use crate::error::{QueryError, Result};
use crate::expression::{Action, ExpressionActions, ExpressionChain, HashJoin, PreparedSet};
use crate::interpreter::InterpreterSelectWithUnion;
use crate::query::{Expr, JoinClause, SelectQuery, SelectWithUnionQuery, TableExpr};
use crate::sort::{Collator, SortColumnDescription, SortDescription};
use crate::stage::{ProcessingStage, StageBoundary};
use crate::storage::{ColumnsDescription, PrewhereInfo};
use crate::streams::{SetTarget, SubqueryForSet};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What the pipeline builder attaches, per step.
///
/// A program is present iff its clause exists in the query. Whether it runs
/// on the stage being built is decided by `boundary`.
#[derive(Clone, Debug)]
pub struct CompiledPlan {
    pub boundary: StageBoundary,
    pub need_aggregate: bool,
    pub has_join: bool,
    pub has_where: bool,
    pub has_having: bool,
    pub has_order_by: bool,
    pub has_limit_by: bool,

    pub before_join: Option<Arc<ExpressionActions>>,
    pub before_where: Option<Arc<ExpressionActions>>,
    pub where_column: Option<String>,
    pub before_aggregation: Option<Arc<ExpressionActions>>,
    pub before_having: Option<Arc<ExpressionActions>>,
    pub having_column: Option<String>,
    pub before_order_and_select: Arc<ExpressionActions>,
    pub before_limit_by: Option<Arc<ExpressionActions>>,
    pub final_projection: Arc<ExpressionActions>,

    /// Result column names of the select list.
    pub selected_columns: Vec<String>,
    pub aggregation_keys: Vec<String>,
    pub aggregates: Vec<AggregateDescription>,
    /// Header the aggregation consumes: the output of `before_aggregation`.
    pub aggregation_header: Header,
    pub order_by: SortDescription,
    pub limit_by_columns: Vec<String>,
    /// Source columns the query reads, before alias expansion.
    pub required_source_columns: Vec<String>,
    pub subqueries_for_sets: Vec<SubqueryForSet>,
    pub join: Option<Arc<HashJoin>>,
    pub prewhere: Option<PrewhereInfo>,
}

/// Turns expressions into actions, resolving select aliases and preparing
/// the sets of `IN`.
#[derive(Debug, Default)]
struct ActionsBuilder {
    aliases: HashMap<String, Expr>,
    sets: HashMap<String, Arc<PreparedSet>>,
    registered: HashSet<String>,
    subqueries: Vec<SubqueryForSet>,
    resolving: Vec<String>,
}

impl ActionsBuilder {
    fn with_aliases(aliases: HashMap<String, Expr>) -> Self {
        Self { aliases, ..Self::default() }
    }

    /// Add the actions computing `expr` and return its column name.
    fn add(&mut self, actions: &mut ExpressionActions, expr: &Expr, only_types: bool) -> Result<String> {
        let name = expr.column_name();
        if actions.has(&name) {
            return Ok(name);
        }
        match expr {
            Expr::Column(column) => self.add_alias_target(actions, column, only_types),
            Expr::Literal(value) => {
                actions.add(Action::AddConstant { name: name.clone(), value: value.clone(), data_type: value.data_type() })?;
                Ok(name)
            }
            Expr::Function { func, args } => {
                let args = args.iter().map(|a| self.add(actions, a, only_types)).collect::<Result<Vec<_>>>()?;
                let types = args.iter().map(|a| actions.type_of(a)).collect::<Result<Vec<_>>>()?;
                let data_type = func.return_type(&types)?;
                actions.add(Action::ApplyFunction { name: name.clone(), func: *func, args, data_type })?;
                Ok(name)
            }
            Expr::Aggregate { .. } => {
                Err(QueryError::Planning(format!("aggregate function {name} is found where it is not allowed")))
            }
            Expr::InList { expr: left, list, negated } => {
                let arg = self.add(actions, left, only_types)?;
                let set = Arc::new(PreparedSet::from_values(actions.type_of(&arg)?, list.clone()));
                actions.add(Action::InSet { name: name.clone(), args: vec![arg], set, negated: *negated })?;
                Ok(name)
            }
            Expr::InSubquery { expr: left, subquery, negated } => {
                let arg = self.add(actions, left, only_types)?;
                let key = format!("{:016x}", subquery.fingerprint());
                let data_type = actions.type_of(&arg)?;
                let set =
                    Arc::clone(self.sets.entry(key.clone()).or_insert_with(|| Arc::new(PreparedSet::new(vec![data_type]))));
                if !only_types && self.registered.insert(key) {
                    self.subqueries.push(SubqueryForSet {
                        name: name.clone(),
                        query: (**subquery).clone(),
                        target: SetTarget::Set(Arc::clone(&set)),
                    });
                }
                actions.add(Action::InSet { name: name.clone(), args: vec![arg], set, negated: *negated })?;
                Ok(name)
            }
            Expr::Alias { expr: inner, alias } => {
                let source = self.add(actions, inner, only_types)?;
                if source != *alias {
                    actions.add(Action::Copy { source, name: alias.clone() })?;
                }
                Ok(alias.clone())
            }
        }
    }

    fn add_alias_target(&mut self, actions: &mut ExpressionActions, column: &str, only_types: bool) -> Result<String> {
        let Some(target) = self.aliases.get(column).cloned() else {
            return Err(QueryError::Planning(format!(
                "unknown identifier: {column}; there are columns: {}",
                actions.sample_header().names().join(", ")
            )));
        };
        if self.resolving.iter().any(|r| r == column) {
            return Err(QueryError::Planning(format!("cyclic aliases for {column}")));
        }
        self.resolving.push(column.to_string());
        let result = self.add(actions, &target.clone().alias(column), only_types);
        self.resolving.pop();
        result
    }
}

/// Builds the [`CompiledPlan`] of one select over known source columns.
pub struct ExpressionAnalyzer<'a> {
    query: &'a SelectQuery,
    source_columns: Header,
    storage_columns: Option<ColumnsDescription>,
    ctx: &'a QueryContext,
    depth: usize,
    select: Vec<Expr>,
    builder: ActionsBuilder,
}

impl<'a> ExpressionAnalyzer<'a> {
    /// `required_result_columns` prunes the select list of queries without
    /// DISTINCT to what an outer query reads. `storage_columns` enables
    /// PREWHERE compilation.
    ///
    /// # Errors
    /// `Planning` when a select alias shadows a source column with a
    /// different expression, or aggregates appear in WHERE, PREWHERE or
    /// GROUP BY.
    pub fn new(
        query: &'a SelectQuery,
        source_columns: Header,
        storage_columns: Option<ColumnsDescription>,
        required_result_columns: &[String],
        ctx: &'a QueryContext,
        depth: usize,
    ) -> Result<Self> {
        let mut aliases = HashMap::new();
        for expr in &query.select {
            if let Expr::Alias { expr: inner, alias } = expr {
                if source_columns.has(alias) && **inner != Expr::Column(alias.clone()) {
                    return Err(QueryError::Planning(format!(
                        "alias {alias} clashes with a source column of the same name"
                    )));
                }
                aliases.insert(alias.clone(), (**inner).clone());
            }
        }
        let misplaced = query.where_.as_ref().is_some_and(Expr::contains_aggregate)
            || query.prewhere.as_ref().is_some_and(Expr::contains_aggregate)
            || query.group_by.iter().any(Expr::contains_aggregate);
        if misplaced {
            return Err(QueryError::Planning(
                "aggregate functions are not allowed in WHERE, PREWHERE or GROUP BY".to_string(),
            ));
        }
        if query.having.is_some() && !query.has_aggregation_syntax() {
            return Err(QueryError::Planning("HAVING requires GROUP BY or an aggregate function".to_string()));
        }

        let mut select = query.select.clone();
        if !query.distinct && !required_result_columns.is_empty() {
            let pruned: Vec<Expr> =
                select.iter().filter(|e| required_result_columns.contains(&e.column_name())).cloned().collect();
            if !pruned.is_empty() {
                select = pruned;
            } else {
                select.truncate(1);
            }
        }
        Ok(Self {
            query,
            source_columns,
            storage_columns,
            ctx,
            depth,
            select,
            builder: ActionsBuilder::with_aliases(aliases),
        })
    }

    #[must_use]
    pub fn has_aggregation(&self) -> bool {
        self.query.has_aggregation_syntax()
    }

    /// The aggregate calls of select, having and order by, deduplicated by
    /// result column name.
    fn collect_aggregates(&self) -> Result<Vec<(String, Expr)>> {
        let mut found = Vec::new();
        let mut nested = None;
        let roots = self.select.iter().chain(self.query.having.iter()).chain(self.query.order_by.iter().map(|o| &o.expr));
        for root in roots {
            collect_aggregate_calls(root, &mut found, &mut nested);
        }
        match nested {
            Some(name) => Err(QueryError::Planning(format!("aggregate function {name} is found inside another aggregate"))),
            None => Ok(found),
        }
    }

    fn join(&mut self, clause: &JoinClause) -> Result<(Arc<HashJoin>, SelectWithUnionQuery)> {
        let (right_header, from) = match &clause.table {
            TableExpr::Table(name) => (self.ctx.catalog.get(name)?.columns().all(), TableExpr::Table(name.clone())),
            TableExpr::Subquery(subquery) => {
                let header = InterpreterSelectWithUnion::new((**subquery).clone(), self.ctx.clone(), ProcessingStage::Complete)
                    .subquery_depth(self.depth + 1)
                    .sample_header()?;
                (header, TableExpr::Subquery(subquery.clone()))
            }
        };
        let mut keys = Vec::with_capacity(clause.using.len());
        for key in &clause.using {
            let left = self
                .source_columns
                .get(key)
                .ok_or_else(|| QueryError::Planning(format!("join key {key} is missing on the left side")))?;
            if !right_header.has(key) {
                return Err(QueryError::Planning(format!("join key {key} is missing on the right side")));
            }
            keys.push(left.clone());
        }
        let mut added = Vec::new();
        for field in right_header.fields() {
            if clause.using.contains(&field.name) {
                continue;
            }
            if self.source_columns.has(&field.name) {
                return Err(QueryError::Planning(format!(
                    "column {} exists on both sides of the join",
                    field.name
                )));
            }
            added.push(field.clone());
        }
        let join = Arc::new(HashJoin::new(clause.kind, keys, added));
        let right_query = SelectQuery {
            select: join.right_header().names().into_iter().map(Expr::Column).collect(),
            from: Some(from),
            ..SelectQuery::default()
        };
        Ok((join, right_query.into()))
    }

    fn prewhere(&mut self) -> Result<Option<PrewhereInfo>> {
        let (Some(expr), Some(columns)) = (&self.query.prewhere, &self.storage_columns) else {
            return Ok(None);
        };
        let mut actions = ExpressionActions::new(columns.ordinary.clone());
        let column_name = self.builder.add(&mut actions, expr, false)?;
        let mut required = columns.ordinary.names();
        required.push(column_name.clone());
        actions.finalize(&required)?;
        Ok(Some(PrewhereInfo { actions: Arc::new(actions), column_name }))
    }

    /// Compile every step for the stage split `boundary`.
    ///
    /// # Errors
    /// `Planning` for unknown identifiers, bad argument types and misplaced
    /// aggregates; errors of the right-hand side of a join or a collation.
    #[allow(clippy::too_many_lines)]
    pub fn analyze(mut self, boundary: StageBoundary) -> Result<CompiledPlan> {
        let query = self.query;
        let need_aggregate = self.has_aggregation();
        let first_only_types = !boundary.first_stage;
        let second_only_types = !boundary.second_stage;
        let select_only_types = if need_aggregate { second_only_types } else { first_only_types };

        let prewhere = self.prewhere()?;

        let mut chain = ExpressionChain::new(self.source_columns.clone());
        let mut join = None;
        let mut join_step = None;
        if let Some(clause) = &query.join {
            let (hash_join, right_query) = self.join(clause)?;
            chain.last_step().actions.add(Action::Join(Arc::clone(&hash_join)))?;
            if !first_only_types {
                self.builder.subqueries.push(SubqueryForSet {
                    name: format!("join {}", clause.using.join(", ")),
                    query: right_query,
                    target: SetTarget::Join(Arc::clone(&hash_join)),
                });
            }
            join_step = Some(chain.last_index());
            join = Some(hash_join);
            chain.add_step();
        }

        let mut where_step = None;
        let mut where_column = None;
        if let Some(expr) = &query.where_ {
            let name = self.builder.add(&mut chain.last_step().actions, expr, first_only_types)?;
            chain.require(name.clone());
            where_step = Some(chain.last_index());
            where_column = Some(name);
            chain.add_step();
        }

        let mut aggregation_keys = Vec::new();
        let mut aggregates = Vec::new();
        let mut before_aggregation = None;
        let mut aggregation_header = Header::default();
        let mut post_join = None;
        let mut post_where = None;

        if need_aggregate {
            for expr in &query.group_by {
                let name = self.builder.add(&mut chain.last_step().actions, expr, first_only_types)?;
                chain.require(name.clone());
                if !aggregation_keys.contains(&name) {
                    aggregation_keys.push(name);
                }
            }
            for (column_name, call) in self.collect_aggregates()? {
                let Expr::Aggregate { kind, args } = &call else { continue };
                let mut argument_names = Vec::with_capacity(args.len());
                let mut argument_types = Vec::with_capacity(args.len());
                for arg in args {
                    let name = self.builder.add(&mut chain.last_step().actions, arg, first_only_types)?;
                    chain.require(name.clone());
                    argument_types.push(chain.last_step().actions.type_of(&name)?);
                    argument_names.push(name);
                }
                aggregates.push(AggregateDescription::new(*kind, argument_names, argument_types, column_name)?);
            }
            let aggregation_step = chain.last_index();
            chain.finalize()?;
            let mut steps = chain.into_steps();
            let actions = steps[aggregation_step].actions.clone();
            aggregation_header = actions.sample_header();
            before_aggregation = Some(Arc::new(actions));
            post_join = join_step.map(|i| std::mem::replace(&mut steps[i].actions, ExpressionActions::new(Header::default())));
            post_where = where_step.map(|i| std::mem::replace(&mut steps[i].actions, ExpressionActions::new(Header::default())));

            let mut aggregated = Vec::with_capacity(aggregation_keys.len() + aggregates.len());
            for key in &aggregation_keys {
                let pos = aggregation_header.position(key)?;
                aggregated.push(aggregation_header.fields()[pos].clone());
            }
            aggregated.extend(aggregates.iter().map(|a| Field::new(a.column_name.clone(), a.return_type.clone())));
            chain = ExpressionChain::new(Header::new(aggregated));
        }

        let mut having_step = None;
        let mut having_column = None;
        if need_aggregate && let Some(expr) = &query.having {
            let name = self.builder.add(&mut chain.last_step().actions, expr, second_only_types)?;
            chain.require(name.clone());
            having_step = Some(chain.last_index());
            having_column = Some(name);
            chain.add_step();
        }

        let mut selected_columns = Vec::with_capacity(self.select.len());
        for expr in self.select.clone() {
            let name = self.builder.add(&mut chain.last_step().actions, &expr, select_only_types)?;
            chain.require(name.clone());
            selected_columns.push(name);
        }
        let mut order_by = Vec::with_capacity(query.order_by.len());
        for element in &query.order_by {
            let name = self.builder.add(&mut chain.last_step().actions, &element.expr, select_only_types)?;
            chain.require(name.clone());
            let mut description = SortColumnDescription::new(name, element.descending);
            description.nulls_first = element.nulls_first.unwrap_or(false);
            description.collator = element.collation.as_deref().map(Collator::new).transpose()?;
            order_by.push(description);
        }
        let select_step = chain.last_index();
        chain.add_step();

        let mut limit_by_step = None;
        let mut limit_by_columns = Vec::new();
        if let Some(limit_by) = &query.limit_by {
            for expr in &limit_by.by {
                let name = self.builder.add(&mut chain.last_step().actions, expr, second_only_types)?;
                chain.require(name.clone());
                limit_by_columns.push(name);
            }
            limit_by_step = Some(chain.last_index());
            chain.add_step();
        }

        for name in &selected_columns {
            chain.require(name.clone());
        }
        chain.last_step().actions.add(Action::Project(selected_columns.clone()))?;
        let projection_step = chain.last_index();
        chain.finalize()?;
        let mut steps = chain.into_steps();
        let mut take = |i: usize| std::mem::replace(&mut steps[i].actions, ExpressionActions::new(Header::default()));

        let before_join = post_join.or_else(|| join_step.filter(|_| !need_aggregate).map(&mut take));
        let before_where = post_where.or_else(|| where_step.filter(|_| !need_aggregate).map(&mut take));
        let before_having = having_step.map(&mut take);
        let before_order_and_select = take(select_step);
        let before_limit_by = limit_by_step.map(&mut take);
        let final_projection = take(projection_step);

        let mut required_source_columns = match (&before_join, &before_where, before_aggregation.as_deref()) {
            (Some(first), _, _) | (None, Some(first), _) | (None, None, Some(first)) => first.input().names(),
            (None, None, None) => before_order_and_select.input().names(),
        };
        if required_source_columns.is_empty()
            && let Some(first) = self.source_columns.fields().first()
        {
            required_source_columns.push(first.name.clone());
        }

        let seal = |mut actions: ExpressionActions, project_input: bool| {
            if project_input {
                actions.prepend_project_input();
            }
            Arc::new(actions)
        };
        Ok(CompiledPlan {
            boundary,
            need_aggregate,
            has_join: join.is_some(),
            has_where: where_column.is_some(),
            has_having: having_column.is_some(),
            has_order_by: !order_by.is_empty(),
            has_limit_by: query.limit_by.is_some(),
            before_join: before_join.map(|a| seal(a, false)),
            before_where: before_where.map(|a| seal(a, true)),
            where_column,
            before_aggregation,
            before_having: before_having.map(|a| seal(a, true)),
            having_column,
            before_order_and_select: seal(before_order_and_select, false),
            before_limit_by: before_limit_by.map(|a| seal(a, false)),
            final_projection: seal(final_projection, false),
            selected_columns,
            aggregation_keys,
            aggregates,
            aggregation_header,
            order_by,
            limit_by_columns,
            required_source_columns,
            subqueries_for_sets: std::mem::take(&mut self.builder.subqueries),
            join,
            prewhere,
        })
    }
}

fn collect_aggregate_calls(expr: &Expr, found: &mut Vec<(String, Expr)>, nested: &mut Option<String>) {
    match expr {
        Expr::Aggregate { args, .. } => {
            let name = expr.column_name();
            if args.iter().any(Expr::contains_aggregate) {
                nested.get_or_insert(name);
                return;
            }
            if !found.iter().any(|(n, _)| *n == name) {
                found.push((name, expr.clone()));
            }
        }
        Expr::Function { args, .. } => {
            for arg in args {
                collect_aggregate_calls(arg, found, nested);
            }
        }
        Expr::InSubquery { expr: inner, .. } | Expr::InList { expr: inner, .. } | Expr::Alias { expr: inner, .. } => {
            collect_aggregate_calls(inner, found, nested);
        }
        Expr::Column(_) | Expr::Literal(_) => {}
    }
}

/// Actions computing the alias columns among `required` from the ordinary
/// columns of a table. `None` when no alias column is required.
///
/// # Errors
/// `Planning` if an alias expression references an unknown column.
pub fn alias_actions(columns: &ColumnsDescription, required: &[String]) -> Result<Option<ExpressionActions>> {
    if !required.iter().any(|c| columns.alias(c).is_some()) {
        return Ok(None);
    }
    let aliases = columns.aliases.iter().map(|a| (a.name.clone(), a.expr.clone())).collect();
    let mut builder = ActionsBuilder::with_aliases(aliases);
    let mut actions = ExpressionActions::new(columns.ordinary.clone());
    for column in required {
        builder.add(&mut actions, &Expr::Column(column.clone()), true)?;
    }
    actions.finalize(required)?;
    Ok(Some(actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::*;
    use crate::settings::Settings;
    use crate::stage::analyze_stages;
    use crate::storage::Catalog;
    use crate::types::DataType;

    fn source() -> Header {
        Header::new(vec![Field::new("k", DataType::Int64), Field::new("v", DataType::Int64), Field::new("s", DataType::String)])
    }

    fn ctx() -> QueryContext {
        QueryContext::new(Settings::default(), Arc::new(Catalog::new()))
    }

    fn complete() -> StageBoundary {
        analyze_stages(ProcessingStage::FetchColumns, ProcessingStage::Complete).unwrap()
    }

    #[test]
    fn group_by_splits_chain_at_aggregation() {
        let query = SelectQuery::new()
            .select([col("k"), sum(col("v")).alias("total")])
            .from_table("t")
            .filter(col("v").gt(lit(0)))
            .group_by([col("k")])
            .having(col("total").gt(lit(10)));
        let ctx = ctx();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(complete()).unwrap();

        assert!(plan.need_aggregate && plan.has_where && plan.has_having);
        assert_eq!(plan.aggregation_keys, vec!["k"]);
        assert_eq!(plan.aggregates[0].column_name, "sum(v)");
        assert_eq!(plan.aggregation_header.names(), vec!["k", "v"]);
        assert_eq!(plan.required_source_columns, vec!["k", "v"]);
        assert_eq!(plan.selected_columns, vec!["k", "total"]);
        assert_eq!(plan.final_projection.sample_header().names(), vec!["k", "total"]);
    }

    #[test]
    fn aggregates_in_where_are_rejected() {
        let query = SelectQuery::new().select([col("k")]).filter(sum(col("v")).gt(lit(1)));
        let ctx = ctx();
        assert!(matches!(
            ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).err(),
            Some(QueryError::Planning(_))
        ));
    }

    #[test]
    fn nested_aggregates_are_rejected() {
        let query = SelectQuery::new().select([sum(sum(col("v")))]);
        let ctx = ctx();
        let err = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(complete()).unwrap_err();
        assert!(matches!(err, QueryError::Planning(_)));
    }

    #[test]
    fn required_result_columns_prune_the_select_list() {
        let query = SelectQuery::new().select([col("k"), col("v"), col("s")]);
        let ctx = ctx();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &["v".to_string()], &ctx, 0)
            .unwrap()
            .analyze(complete())
            .unwrap();
        assert_eq!(plan.selected_columns, vec!["v"]);
        assert_eq!(plan.required_source_columns, vec!["v"]);
    }

    #[test]
    fn constant_query_still_reads_one_column() {
        let query = SelectQuery::new().select([lit(1)]);
        let ctx = ctx();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(complete()).unwrap();
        assert_eq!(plan.required_source_columns, vec!["k"]);
    }

    #[test]
    fn in_subquery_registers_only_on_real_stages() {
        let sub = SelectQuery::new().select([col("dummy")]);
        let query = SelectQuery::new().select([col("k")]).filter(col("k").in_subquery(sub));
        let ctx = ctx();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(complete()).unwrap();
        assert_eq!(plan.subqueries_for_sets.len(), 1);

        let coordinator = analyze_stages(ProcessingStage::WithMergeableState, ProcessingStage::Complete).unwrap();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(coordinator).unwrap();
        assert!(plan.subqueries_for_sets.is_empty());
    }

    #[test]
    fn order_by_uses_select_aliases() {
        let query = SelectQuery::new()
            .select([col("v").multiply(lit(2)).alias("double")])
            .order_by([col("double").desc()]);
        let ctx = ctx();
        let plan = ExpressionAnalyzer::new(&query, source(), None, &[], &ctx, 0).unwrap().analyze(complete()).unwrap();
        assert_eq!(plan.order_by[0].column_name, "double");
        assert!(plan.order_by[0].descending);
    }
}
