//! Query constraints and canonical subscription keys.
//!
//! A [`SubscriptionKey`] identifies one live push subscription. Keys are
//! canonicalized on construction so that equivalent queries compare equal
//! regardless of the order in which their filters were listed.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Comparison operator for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOp {
    /// Field equals value.
    Eq,
    /// Array field contains value.
    ArrayContains,
}

/// Sort direction for an ordering clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// A filter clause. The value is held as canonical JSON text so that
/// filters are totally ordered and hashable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    value: String,
}

impl Filter {
    /// The filter value as JSON.
    pub fn value(&self) -> Value {
        serde_json::from_str(&self.value).unwrap_or(Value::Null)
    }

    /// Evaluate the filter against a top-level field of `document`.
    pub fn matches(&self, document: &Value) -> bool {
        let Some(field) = document.get(&self.field) else {
            return false;
        };
        let value = self.value();
        match self.op {
            FilterOp::Eq => *field == value,
            FilterOp::ArrayContains => field.as_array().is_some_and(|items| items.contains(&value)),
        }
    }
}

/// An ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A single query constraint as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Filter(Filter),
    OrderBy(OrderBy),
    Limit(u32),
}

impl Constraint {
    /// Equality filter.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, FilterOp::Eq, value)
    }

    /// Array-contains filter.
    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, FilterOp::ArrayContains, value)
    }

    fn filter(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Filter(Filter {
            field: field.into(),
            op,
            value: value.into().to_string(),
        })
    }

    /// Ordering clause.
    pub fn order_by(field: impl Into<String>, direction: Direction) -> Self {
        Self::OrderBy(OrderBy {
            field: field.into(),
            direction,
        })
    }

    /// Result limit.
    pub fn limit(n: u32) -> Self {
        Self::Limit(n)
    }
}

/// Canonical identity of one live subscription.
///
/// Filters are sorted and deduplicated. Ordering clauses keep their relative
/// order since it changes the query's meaning. When several limits are given
/// the last one wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    path: String,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<u32>,
}

impl SubscriptionKey {
    /// Build a canonical key from a collection path and constraints.
    pub fn new(path: impl Into<String>, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        let mut filters = Vec::new();
        let mut order_by: Vec<OrderBy> = Vec::new();
        let mut limit = None;

        for constraint in constraints {
            match constraint {
                Constraint::Filter(f) => filters.push(f),
                Constraint::OrderBy(o) => {
                    // A repeated field keeps its first position.
                    if !order_by.iter().any(|existing| existing.field == o.field) {
                        order_by.push(o);
                    }
                }
                Constraint::Limit(n) => limit = Some(n),
            }
        }

        filters.sort();
        filters.dedup();

        Self {
            path: path.into(),
            filters,
            order_by,
            limit,
        }
    }

    /// Key for a whole collection with no constraints.
    pub fn collection(path: impl Into<String>) -> Self {
        Self::new(path, std::iter::empty())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// True if `document` satisfies every filter. Ordering and limit are
    /// ignored, so this answers whether a record belongs to the query, not
    /// whether the provider would return it.
    pub fn matches(&self, document: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(document))
    }

    /// JSON form sent to the realtime provider.
    pub fn to_wire(&self) -> Value {
        let filters: Vec<Value> = self
            .filters
            .iter()
            .map(|f| {
                serde_json::json!({
                    "field": f.field,
                    "op": f.op,
                    "value": f.value(),
                })
            })
            .collect();

        serde_json::json!({
            "path": self.path,
            "filters": filters,
            "orderBy": self.order_by,
            "limit": self.limit,
        })
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for filter in &self.filters {
            let op = match filter.op {
                FilterOp::Eq => "==",
                FilterOp::ArrayContains => "contains",
            };
            write!(f, " [{} {} {}]", filter.field, op, filter.value)?;
        }
        for order in &self.order_by {
            let dir = match order.direction {
                Direction::Asc => "asc",
                Direction::Desc => "desc",
            };
            write!(f, " order({} {})", order.field, dir)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " limit({})", limit)?;
        }
        Ok(())
    }
}
