//! Filters and queries handed to an [`Adapter`](crate::adapter::Adapter).
//!
//! The core needs equality, IN-lists, null checks and range comparisons
//! keyed by field name, plus ordering and paging for batched iteration.
//! Translating them into a dialect is the adapter's job.

use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of [`Filter::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
}

impl CmpOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Lte => "<=",
            CmpOp::Gt => ">",
            CmpOp::Gte => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Lte => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Gte => ordering != Ordering::Less,
        }
    }
}

/// A boolean condition over the fields of one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every row.
    #[default]
    All,
    /// All inner filters must match.
    And(Vec<Filter>),
    /// `field = value`
    Eq(String, Value),
    /// `field IN (values...)`
    In(String, Vec<Value>),
    /// `field IS NULL`
    Nil(String),
    /// `field <op> value`
    Cmp(String, CmpOp, Value),
    /// Negation.
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(field.into(), values)
    }

    pub fn nil(field: impl Into<String>) -> Self {
        Filter::Nil(field.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Lte, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Cmp(field.into(), CmpOp::Gte, value.into())
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// Equality on every `(field, value)` pair.
    pub fn eq_all(fields: &[String], values: &[Value]) -> Self {
        fields
            .iter()
            .zip(values)
            .fold(Filter::All, |acc, (f, v)| acc.and_eq(f.clone(), v.clone()))
    }

    /// Conjunction, flattening nested `And`s and dropping `All`.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn and_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.and(Filter::eq(field, value))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Filter::All)
    }

    /// Evaluate against a row, looking fields up through `get`.
    ///
    /// Missing fields read as NULL. Comparison uses [`Value::same`], so an
    /// `Int` column matches a `BigInt` filter value. NULL never equals
    /// anything, including NULL, and never compares.
    pub fn matches<F>(&self, get: &F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Filter::All => true,
            Filter::And(inner) => inner.iter().all(|f| f.matches(get)),
            Filter::Eq(field, expected) => get(field)
                .is_some_and(|actual| !actual.is_null() && actual.same(expected)),
            Filter::In(field, values) => get(field).is_some_and(|actual| {
                !actual.is_null() && values.iter().any(|v| actual.same(v))
            }),
            Filter::Nil(field) => get(field).is_none_or(|v| v.is_null()),
            Filter::Cmp(field, op, expected) => get(field)
                .and_then(|actual| actual.compare(expected))
                .is_some_and(|ordering| op.holds(ordering)),
            Filter::Not(inner) => !inner.matches(get),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "TRUE"),
            Filter::And(inner) => {
                let parts: Vec<String> = inner.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(" AND "))
            }
            Filter::Eq(field, value) => write!(f, "{field} = {value}"),
            Filter::In(field, values) => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "{field} IN ({})", parts.join(", "))
            }
            Filter::Nil(field) => write!(f, "{field} IS NULL"),
            Filter::Cmp(field, op, value) => write!(f, "{field} {} {value}", op.as_str()),
            Filter::Not(inner) => write!(f, "NOT ({inner})"),
        }
    }
}

/// Aggregate function computed by [`Adapter::aggregate`](crate::adapter::Adapter::aggregate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl Aggregate {
    pub const fn as_str(self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Max => "max",
            Aggregate::Min => "min",
        }
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.descending { "DESC" } else { "ASC" };
        write!(f, "{} {direction}", self.field)
    }
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Filter,
    pub sort: Vec<Sort>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Skip the soft-delete default scope.
    pub unscoped: bool,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::All,
            sort: Vec::new(),
            limit: None,
            offset: None,
            unscoped: false,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = self.filter.and(filter);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }

    #[must_use]
    pub fn unscoped(mut self) -> Self {
        self.unscoped = true;
        self
    }

    /// The same rows without ordering, limit or offset, as aggregates see them.
    #[must_use]
    pub fn unpaged(mut self) -> Self {
        self.sort.clear();
        self.limit = None;
        self.offset = None;
        self
    }
}
