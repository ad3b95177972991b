//! Logical query tree.
//!
//! This is the already-parsed, already-resolved shape of a `SELECT`
//! statement. There is no SQL parser; queries are assembled with the fluent
//! constructors below.
//!
//! ```
//! use blockflow::query::*;
//!
//! let q = SelectQuery::new()
//!     .select([col("k"), sum(col("v")).alias("total")])
//!     .from_table("events")
//!     .filter(col("v").gt(lit(0)))
//!     .group_by([col("k")])
//!     .order_by([col("total").desc()])
//!     .limit(10);
//! assert_eq!(q.select[1].column_name(), "total");
//! assert!(q.has_aggregation_syntax());
//! ```

use crate::combiners::AggregateKind;
pub use crate::expression::functions::ScalarFunction;
use crate::types::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Function { func: ScalarFunction, args: Vec<Expr> },
    Aggregate { kind: AggregateKind, args: Vec<Expr> },
    InSubquery { expr: Box<Expr>, subquery: Box<SelectWithUnionQuery>, negated: bool },
    InList { expr: Box<Expr>, list: Vec<Value>, negated: bool },
    Alias { expr: Box<Expr>, alias: String },
}

impl Expr {
    /// The name of the column this expression produces.
    #[must_use]
    pub fn column_name(&self) -> String {
        match self {
            Self::Column(name) => name.clone(),
            Self::Literal(v) => v.to_string(),
            Self::Function { func, args } => format!("{}({})", func.name(), join_names(args)),
            Self::Aggregate { kind, args } => format!("{}({})", kind.name(), join_names(args)),
            Self::InSubquery { expr, subquery, negated } => format!(
                "{}({}, _subquery{:016x})",
                if *negated { "notIn" } else { "in" },
                expr.column_name(),
                subquery.fingerprint()
            ),
            Self::InList { expr, list, negated } => {
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                format!("{}({}, ({}))", if *negated { "notIn" } else { "in" }, expr.column_name(), items.join(", "))
            }
            Self::Alias { alias, .. } => alias.clone(),
        }
    }

    /// Strip a top-level alias.
    #[must_use]
    pub fn unaliased(&self) -> &Self {
        match self {
            Self::Alias { expr, .. } => expr.unaliased(),
            other => other,
        }
    }

    #[must_use]
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Self::Aggregate { .. }));
        found
    }

    /// Pre-order traversal. Does not descend into subqueries.
    pub fn walk(&self, f: &mut dyn FnMut(&Self)) {
        f(self);
        match self {
            Self::Function { args, .. } | Self::Aggregate { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Self::InSubquery { expr, .. } | Self::InList { expr, .. } | Self::Alias { expr, .. } => expr.walk(f),
            Self::Column(_) | Self::Literal(_) => {}
        }
    }

    #[must_use]
    pub fn alias(self, alias: impl Into<String>) -> Self {
        Self::Alias { expr: Box::new(self), alias: alias.into() }
    }

    #[must_use]
    pub fn asc(self) -> OrderByElement {
        OrderByElement::new(self, false)
    }

    #[must_use]
    pub fn desc(self) -> OrderByElement {
        OrderByElement::new(self, true)
    }

    #[must_use]
    pub fn in_subquery(self, subquery: impl Into<SelectWithUnionQuery>) -> Self {
        Self::InSubquery { expr: Box::new(self), subquery: Box::new(subquery.into()), negated: false }
    }

    #[must_use]
    pub fn not_in_subquery(self, subquery: impl Into<SelectWithUnionQuery>) -> Self {
        Self::InSubquery { expr: Box::new(self), subquery: Box::new(subquery.into()), negated: true }
    }

    #[must_use]
    pub fn in_list(self, list: impl IntoIterator<Item = Value>) -> Self {
        Self::InList { expr: Box::new(self), list: list.into_iter().collect(), negated: false }
    }
}

fn join_names(args: &[Expr]) -> String {
    args.iter().map(Expr::column_name).collect::<Vec<_>>().join(", ")
}

macro_rules! binary_ops {
    ($($method:ident => $func:ident),* $(,)?) => {
        impl Expr {
            $(
                #[must_use]
                pub fn $method(self, rhs: Self) -> Self {
                    func(ScalarFunction::$func, [self, rhs])
                }
            )*
        }
    };
}

binary_ops! {
    plus => Plus,
    minus => Minus,
    multiply => Multiply,
    divide => Divide,
    modulo => Modulo,
    equals => Equals,
    not_equals => NotEquals,
    lt => Less,
    lt_eq => LessOrEquals,
    gt => Greater,
    gt_eq => GreaterOrEquals,
    and => And,
    or => Or,
}

#[must_use]
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

#[must_use]
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

#[must_use]
pub fn func(func: ScalarFunction, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Function { func, args: args.into_iter().collect() }
}

#[must_use]
pub fn aggregate(kind: AggregateKind, args: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Aggregate { kind, args: args.into_iter().collect() }
}

#[must_use]
pub fn count() -> Expr {
    aggregate(AggregateKind::Count, [])
}

#[must_use]
pub fn sum(e: Expr) -> Expr {
    aggregate(AggregateKind::Sum, [e])
}

#[must_use]
pub fn min(e: Expr) -> Expr {
    aggregate(AggregateKind::Min, [e])
}

#[must_use]
pub fn max(e: Expr) -> Expr {
    aggregate(AggregateKind::Max, [e])
}

#[must_use]
pub fn avg(e: Expr) -> Expr {
    aggregate(AggregateKind::Avg, [e])
}

#[must_use]
pub fn uniq(e: Expr) -> Expr {
    aggregate(AggregateKind::Uniq, [e])
}

#[must_use]
pub fn any(e: Expr) -> Expr {
    aggregate(AggregateKind::Any, [e])
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderByElement {
    pub expr: Expr,
    pub descending: bool,
    /// `None` means `NULLS LAST`.
    pub nulls_first: Option<bool>,
    pub collation: Option<String>,
}

impl OrderByElement {
    #[must_use]
    pub const fn new(expr: Expr, descending: bool) -> Self {
        Self { expr, descending, nulls_first: None, collation: None }
    }

    #[must_use]
    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = Some(true);
        self
    }

    #[must_use]
    pub fn collate(mut self, locale: impl Into<String>) -> Self {
        self.collation = Some(locale.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    /// RIGHT and FULL joins emit right-side rows that never matched.
    #[must_use]
    pub const fn emits_non_joined(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }

    /// LEFT and FULL joins keep left-side rows without a match.
    #[must_use]
    pub const fn keeps_unmatched_left(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TableExpr {
    Table(String),
    Subquery(Box<SelectWithUnionQuery>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableExpr,
    pub using: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitBy {
    pub length: usize,
    pub by: Vec<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub offset: usize,
    pub length: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub distinct: bool,
    pub select: Vec<Expr>,
    /// `None` reads the single-row `one` table.
    pub from: Option<TableExpr>,
    pub join: Option<JoinClause>,
    pub prewhere: Option<Expr>,
    pub where_: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub with_totals: bool,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByElement>,
    pub limit_by: Option<LimitBy>,
    pub limit: Option<Limit>,
    pub sample: Option<f64>,
    pub final_: bool,
}

impl SelectQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn select(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.select = exprs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    #[must_use]
    pub fn from_table(mut self, name: impl Into<String>) -> Self {
        self.from = Some(TableExpr::Table(name.into()));
        self
    }

    #[must_use]
    pub fn from_subquery(mut self, q: impl Into<SelectWithUnionQuery>) -> Self {
        self.from = Some(TableExpr::Subquery(Box::new(q.into())));
        self
    }

    #[must_use]
    pub fn join(mut self, kind: JoinKind, table: TableExpr, using: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.join = Some(JoinClause { kind, table, using: using.into_iter().map(Into::into).collect() });
        self
    }

    #[must_use]
    pub fn prewhere(mut self, e: Expr) -> Self {
        self.prewhere = Some(e);
        self
    }

    #[must_use]
    pub fn filter(mut self, e: Expr) -> Self {
        self.where_ = Some(e);
        self
    }

    #[must_use]
    pub fn group_by(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.group_by = exprs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_totals(mut self) -> Self {
        self.with_totals = true;
        self
    }

    #[must_use]
    pub fn having(mut self, e: Expr) -> Self {
        self.having = Some(e);
        self
    }

    #[must_use]
    pub fn order_by(mut self, elems: impl IntoIterator<Item = OrderByElement>) -> Self {
        self.order_by = elems.into_iter().collect();
        self
    }

    #[must_use]
    pub fn limit_by(mut self, length: usize, by: impl IntoIterator<Item = Expr>) -> Self {
        self.limit_by = Some(LimitBy { length, by: by.into_iter().collect() });
        self
    }

    #[must_use]
    pub fn limit(mut self, length: usize) -> Self {
        self.limit = Some(Limit { offset: 0, length });
        self
    }

    #[must_use]
    pub fn limit_offset(mut self, offset: usize, length: usize) -> Self {
        self.limit = Some(Limit { offset, length });
        self
    }

    #[must_use]
    pub fn sample(mut self, ratio: f64) -> Self {
        self.sample = Some(ratio);
        self
    }

    #[must_use]
    pub fn final_(mut self) -> Self {
        self.final_ = true;
        self
    }

    /// `(length, offset)` of the LIMIT clause, `(0, 0)` without one.
    #[must_use]
    pub fn limit_length_and_offset(&self) -> (usize, usize) {
        self.limit.map_or((0, 0), |l| (l.length, l.offset))
    }

    /// GROUP BY present or an aggregate function used anywhere it may appear.
    #[must_use]
    pub fn has_aggregation_syntax(&self) -> bool {
        !self.group_by.is_empty()
            || self.select.iter().any(Expr::contains_aggregate)
            || self.having.as_ref().is_some_and(Expr::contains_aggregate)
            || self.order_by.iter().any(|o| o.expr.contains_aggregate())
    }

    /// WITH TOTALS here or in any select of a FROM-clause subquery, recursively.
    #[must_use]
    pub fn has_with_totals_in_any_subquery_in_from(&self) -> bool {
        if self.with_totals {
            return true;
        }
        match &self.from {
            Some(TableExpr::Subquery(union)) => {
                union.selects.iter().any(Self::has_with_totals_in_any_subquery_in_from)
            }
            _ => false,
        }
    }
}

/// One or more selects combined with `UNION ALL`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectWithUnionQuery {
    pub selects: Vec<SelectQuery>,
}

impl SelectWithUnionQuery {
    #[must_use]
    pub fn new(selects: impl IntoIterator<Item = SelectQuery>) -> Self {
        Self { selects: selects.into_iter().collect() }
    }

    #[must_use]
    pub fn union_all(mut self, q: SelectQuery) -> Self {
        self.selects.push(q);
        self
    }

    /// Stable identity used to name set columns.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        use std::hash::{DefaultHasher, Hash, Hasher};
        let mut h = DefaultHasher::new();
        serde_json::to_string(self).unwrap_or_default().hash(&mut h);
        h.finish()
    }
}

impl From<SelectQuery> for SelectWithUnionQuery {
    fn from(q: SelectQuery) -> Self {
        Self { selects: vec![q] }
    }
}
