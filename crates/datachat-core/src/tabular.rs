//! Tabular compiler: intent plan -> dataset expression.
//!
//! Emits a statement in the restricted dataset-expression language executed
//! by the sandbox, e.g.
//!
//! ```text
//! out = df.filter(departamento == "IT" && salario >= 1000).group_by("genero").mean("salario")
//! ```
//!
//! The emitted surface is bounded: the dataset name, column identifiers,
//! literals, comparison operators, `&&`, and the allow-listed methods the
//! sandbox interprets. Nothing else is ever generated.

use crate::error::{DataChatError, Result};
use crate::plan::{Filter, FilterOp, FilterValue, IntentPlan, Operation};
use crate::value::Value;

/// Default row count for `top` when the plan gives no limit.
const DEFAULT_TOP_LIMIT: u32 = 10;

/// Compile a plan into a sandbox statement over the named dataset.
pub fn compile_plan(plan: &IntentPlan, dataset: &str) -> Result<String> {
    for col in plan.referenced_columns() {
        if !is_identifier(col) {
            return Err(DataChatError::UnsupportedOperation(format!(
                "column name not expressible in the tabular backend: {}",
                col
            )));
        }
    }

    let mut base = dataset.to_string();
    if !plan.filters.is_empty() {
        let parts: Vec<String> = plan.filters.iter().map(render_filter).collect::<Result<_>>()?;
        base = format!("{}.filter({})", base, parts.join(" && "));
    }

    let expr = match plan.operation {
        Operation::Count => {
            if plan.group_by.is_empty() {
                format!("{}.count()", base)
            } else {
                format!("{}.count()", grouped(&base, &plan.group_by))
            }
        }
        Operation::Sum | Operation::Mean | Operation::Max | Operation::Min | Operation::Median => {
            let method = plan.operation.synthesized_name();
            match (&plan.target, plan.group_by.is_empty()) {
                (Some(target), true) => format!("{}.{}({})", base, method, quote(target)),
                (Some(target), false) => format!(
                    "{}.{}({})",
                    grouped(&base, &plan.group_by),
                    method,
                    quote(target)
                ),
                (None, false) => {
                    // Missing target under grouping degrades to grouped row
                    // counts; this mirrors the relational backend.
                    format!("{}.count()", grouped(&base, &plan.group_by))
                }
                (None, true) => {
                    return Err(DataChatError::UnsupportedOperation(format!(
                        "{} aggregation requires a target column",
                        method
                    )));
                }
            }
        }
        Operation::Select => {
            let mut expr = if plan.columns.is_empty() {
                base
            } else {
                format!("{}.select({})", base, quote_list(&plan.columns))
            };
            expr = with_sort(expr, &plan.order_by);
            if let Some(n) = plan.limit {
                expr = format!("{}.limit({})", expr, n);
            }
            expr
        }
        Operation::Distinct => {
            let mut expr = format!("{}.distinct({})", base, quote_list(&plan.columns));
            expr = with_sort(expr, &plan.order_by);
            if let Some(n) = plan.limit {
                expr = format!("{}.limit({})", expr, n);
            }
            expr
        }
        Operation::Top => {
            let mut expr = if plan.columns.is_empty() {
                base
            } else {
                format!("{}.select({})", base, quote_list(&plan.columns))
            };
            let sort_col = plan
                .order_by
                .first()
                .cloned()
                .or_else(|| plan.target.clone());
            if let Some(col) = sort_col {
                expr = format!("{}.sort_by({}, true)", expr, quote(col.trim_end_matches(" DESC")));
            }
            format!("{}.limit({})", expr, plan.limit.unwrap_or(DEFAULT_TOP_LIMIT))
        }
        Operation::GroupBy => {
            if plan.group_by.is_empty() {
                return Err(DataChatError::UnsupportedOperation(
                    "group_by operation requires at least one grouping column".to_string(),
                ));
            }
            match &plan.target {
                Some(target) => format!(
                    "{}.mean({})",
                    grouped(&base, &plan.group_by),
                    quote(target)
                ),
                None => format!("{}.count()", grouped(&base, &plan.group_by)),
            }
        }
    };

    Ok(format!("out = {}", expr))
}

fn grouped(base: &str, group_by: &[String]) -> String {
    format!("{}.group_by({})", base, quote_list(group_by))
}

fn with_sort(expr: String, order_by: &[String]) -> String {
    match order_by.first() {
        Some(col) => {
            let (name, desc) = match col.strip_suffix(" DESC") {
                Some(stripped) => (stripped, true),
                None => (col.as_str(), false),
            };
            if desc {
                format!("{}.sort_by({}, true)", expr, quote(name))
            } else {
                format!("{}.sort_by({})", expr, quote(name))
            }
        }
        None => expr,
    }
}

fn render_filter(filter: &Filter) -> Result<String> {
    let col = &filter.column;
    match filter.op {
        FilterOp::Equals => Ok(format!("{} == {}", col, scalar(filter)?)),
        FilterOp::NotEquals => Ok(format!("{} != {}", col, scalar(filter)?)),
        FilterOp::Gt => Ok(format!("{} > {}", col, scalar(filter)?)),
        FilterOp::Gte => Ok(format!("{} >= {}", col, scalar(filter)?)),
        FilterOp::Lt => Ok(format!("{} < {}", col, scalar(filter)?)),
        FilterOp::Lte => Ok(format!("{} <= {}", col, scalar(filter)?)),
        FilterOp::In => Ok(format!("{}.in({})", col, list(filter))),
        FilterOp::NotIn => Ok(format!("{}.not_in({})", col, list(filter))),
        FilterOp::Contains => Ok(format!("{}.contains({})", col, string_arg(filter))),
        FilterOp::StartsWith => Ok(format!("{}.starts_with({})", col, string_arg(filter))),
        FilterOp::EndsWith => Ok(format!("{}.ends_with({})", col, string_arg(filter))),
    }
}

fn scalar(filter: &Filter) -> Result<String> {
    match filter.value.as_scalar() {
        Some(v) => Ok(literal(v)),
        None => Err(DataChatError::UnsupportedOperation(format!(
            "operator {:?} expects a scalar value",
            filter.op
        ))),
    }
}

fn list(filter: &Filter) -> String {
    let items: Vec<String> = match &filter.value {
        FilterValue::List(vs) => vs.iter().map(literal).collect(),
        FilterValue::Scalar(v) => vec![literal(v)],
    };
    format!("[{}]", items.join(", "))
}

/// String predicates coerce their argument to text.
fn string_arg(filter: &Filter) -> String {
    match filter.value.as_scalar() {
        Some(Value::Text(s)) => quote(s),
        Some(other) => quote(other.to_string()),
        None => quote(""),
    }
}

/// Deterministic literal rendering: strings quoted with escapes, numerics
/// bare, booleans and null as keywords.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote(s),
    }
}

fn quote<S: AsRef<str>>(s: S) -> String {
    format!("\"{}\"", s.as_ref().replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ")
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
