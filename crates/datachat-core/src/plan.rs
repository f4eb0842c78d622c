//! The intent plan: canonical structured representation of a query.
//!
//! Backend-independent. Created per request from model output or the
//! rule-based planner, immutable once handed to a compiler.

use crate::value::Value;
use serde::Serialize;
use std::fmt;

/// What to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Count,
    Sum,
    Mean,
    Max,
    Min,
    Median,
    Select,
    Distinct,
    Top,
    GroupBy,
}

impl Operation {
    /// Parse an operation name, canonicalizing the synonyms models emit.
    pub fn parse(s: &str) -> Option<Operation> {
        match s.trim().to_lowercase().as_str() {
            "count" => Some(Operation::Count),
            "sum" => Some(Operation::Sum),
            "mean" | "avg" | "average" => Some(Operation::Mean),
            "max" | "maximum" => Some(Operation::Max),
            "min" | "minimum" => Some(Operation::Min),
            "median" => Some(Operation::Median),
            "select" => Some(Operation::Select),
            "distinct" => Some(Operation::Distinct),
            "top" => Some(Operation::Top),
            "group_by" | "groupby" => Some(Operation::GroupBy),
            _ => None,
        }
    }

    /// Aggregations that need a numeric target column.
    pub fn is_aggregation(&self) -> bool {
        matches!(
            self,
            Operation::Sum | Operation::Mean | Operation::Max | Operation::Min | Operation::Median
        )
    }

    /// Name used when synthesizing output column names.
    pub fn synthesized_name(&self) -> &'static str {
        match self {
            Operation::Count => "count",
            Operation::Sum => "sum",
            Operation::Mean => "mean",
            Operation::Max => "max",
            Operation::Min => "min",
            Operation::Median => "median",
            Operation::Select => "select",
            Operation::Distinct => "distinct",
            Operation::Top => "top",
            Operation::GroupBy => "group_by",
        }
    }

    pub const ALL: [Operation; 10] = [
        Operation::Count,
        Operation::Sum,
        Operation::Mean,
        Operation::Max,
        Operation::Min,
        Operation::Median,
        Operation::Select,
        Operation::Distinct,
        Operation::Top,
        Operation::GroupBy,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.synthesized_name())
    }
}

/// Filter comparison operators. The closed set every backend must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
}

impl FilterOp {
    /// Parse an operator, accepting both symbol and word synonyms.
    pub fn parse(s: &str) -> Option<FilterOp> {
        match s.trim().to_lowercase().as_str() {
            "==" | "=" | "eq" | "equals" => Some(FilterOp::Equals),
            "!=" | "<>" | "ne" | "not_equals" | "not-equals" => Some(FilterOp::NotEquals),
            ">" | "gt" => Some(FilterOp::Gt),
            ">=" | "gte" => Some(FilterOp::Gte),
            "<" | "lt" => Some(FilterOp::Lt),
            "<=" | "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            "not in" | "nin" | "not_in" | "not-in" => Some(FilterOp::NotIn),
            "contains" | "like" => Some(FilterOp::Contains),
            "startswith" | "starts_with" | "starts-with" => Some(FilterOp::StartsWith),
            "endswith" | "ends_with" | "ends-with" => Some(FilterOp::EndsWith),
            _ => None,
        }
    }

    /// SQL comparison symbol for the scalar operators.
    pub fn sql_symbol(&self) -> Option<&'static str> {
        match self {
            FilterOp::Equals => Some("="),
            FilterOp::NotEquals => Some("<>"),
            FilterOp::Gt => Some(">"),
            FilterOp::Gte => Some(">="),
            FilterOp::Lt => Some("<"),
            FilterOp::Lte => Some("<="),
            _ => None,
        }
    }
}

/// A filter value: a scalar, or a list for `in` / `not-in`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl FilterValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            FilterValue::Scalar(v) => Some(v),
            FilterValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            FilterValue::List(v) => Some(v),
            FilterValue::Scalar(_) => None,
        }
    }
}

/// One filter predicate. Predicates are AND-joined.
#[derive(Debug, Clone, Serialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

/// The canonical intent plan.
#[derive(Debug, Clone, Serialize)]
pub struct IntentPlan {
    pub operation: Operation,
    pub group_by: Vec<String>,
    pub target: Option<String>,
    pub filters: Vec<Filter>,
    /// Projection hint; empty means backend default (`*`).
    pub columns: Vec<String>,
    /// Ordering hint; empty means execution-defined order.
    pub order_by: Vec<String>,
    pub limit: Option<u32>,
}

impl IntentPlan {
    pub fn new(operation: Operation) -> IntentPlan {
        IntentPlan {
            operation,
            group_by: Vec::new(),
            target: None,
            filters: Vec::new(),
            columns: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Every column name the plan references, for schema round-trip checks.
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = Vec::new();
        cols.extend(self.group_by.iter().map(|s| s.as_str()));
        if let Some(t) = &self.target {
            cols.push(t);
        }
        cols.extend(self.filters.iter().map(|f| f.column.as_str()));
        cols.extend(self.columns.iter().map(|s| s.as_str()));
        cols.extend(self.order_by.iter().map(|s| s.as_str()));
        cols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_synonyms() {
        assert_eq!(Operation::parse("avg"), Some(Operation::Mean));
        assert_eq!(Operation::parse("AVERAGE"), Some(Operation::Mean));
        assert_eq!(Operation::parse("groupby"), Some(Operation::GroupBy));
        assert_eq!(Operation::parse("group_by"), Some(Operation::GroupBy));
        assert_eq!(Operation::parse("frobnicate"), None);
    }

    #[test]
    fn test_filter_op_synonyms() {
        assert_eq!(FilterOp::parse("eq"), Some(FilterOp::Equals));
        assert_eq!(FilterOp::parse("=="), Some(FilterOp::Equals));
        assert_eq!(FilterOp::parse("nin"), Some(FilterOp::NotIn));
        assert_eq!(FilterOp::parse("not in"), Some(FilterOp::NotIn));
        assert_eq!(FilterOp::parse("startswith"), Some(FilterOp::StartsWith));
        assert_eq!(FilterOp::parse("between"), None);
    }

    #[test]
    fn test_referenced_columns() {
        let mut plan = IntentPlan::new(Operation::Mean);
        plan.target = Some("salario".into());
        plan.group_by = vec!["genero".into()];
        plan.filters.push(Filter {
            column: "departamento".into(),
            op: FilterOp::Equals,
            value: FilterValue::Scalar(Value::Text("IT".into())),
        });
        let cols = plan.referenced_columns();
        assert!(cols.contains(&"salario"));
        assert!(cols.contains(&"genero"));
        assert!(cols.contains(&"departamento"));
    }
}
