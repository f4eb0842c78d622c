//! Relational compiler: intent plan -> SQL statement.
//!
//! Plans compile through a small select-statement tree rendered per dialect,
//! so no text-level rewriting is involved on this path. Free-form
//! model-authored SQL goes through the safety gate instead (see `safety`).

use crate::error::{DataChatError, Result};
use crate::plan::{Filter, FilterOp, FilterValue, IntentPlan, Operation};
use crate::value::Value;
use serde::Serialize;

/// Target SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Mysql,
    Postgres,
    Ansi,
}

impl Dialect {
    pub fn from_url(url: &str) -> Dialect {
        let lower = url.to_lowercase();
        if lower.starts_with("mysql") {
            Dialect::Mysql
        } else if lower.starts_with("postgres") {
            Dialect::Postgres
        } else if lower.starts_with("sqlite") {
            Dialect::Sqlite
        } else {
            Dialect::Ansi
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Ansi => "ansi",
        }
    }
}

/// One projected item.
#[derive(Debug, Clone)]
enum SelectItem {
    All,
    Column(String),
    CountStar { alias: String },
    Aggregate {
        func: &'static str,
        column: String,
        alias: String,
    },
}

/// A renderable read-only statement.
#[derive(Debug, Clone)]
struct SelectStatement {
    table: String,
    distinct: bool,
    items: Vec<SelectItem>,
    predicates: Vec<Filter>,
    group_by: Vec<String>,
    order_by: Vec<String>,
    limit: Option<u32>,
}

impl SelectStatement {
    fn new(table: &str) -> SelectStatement {
        SelectStatement {
            table: table.to_string(),
            distinct: false,
            items: Vec::new(),
            predicates: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    fn render(&self, _dialect: Dialect) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        let items: Vec<String> = self
            .items
            .iter()
            .map(|item| match item {
                SelectItem::All => "*".to_string(),
                SelectItem::Column(c) => c.clone(),
                SelectItem::CountStar { alias } => format!("COUNT(*) AS {}", alias),
                SelectItem::Aggregate { func, column, alias } => {
                    format!("{}({}) AS {}", func, column, alias)
                }
            })
            .collect();
        sql.push_str(&items.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        if !self.predicates.is_empty() {
            let parts: Vec<String> = self.predicates.iter().map(render_predicate).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&parts.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
        }
        sql
    }
}

/// Default row count for `top` when the plan gives no limit.
const DEFAULT_TOP_LIMIT: u32 = 10;

/// Compile an intent plan against a table into a dialect-ready statement.
pub fn compile_plan(plan: &IntentPlan, table: &str, dialect: Dialect) -> Result<String> {
    let mut stmt = SelectStatement::new(table);
    stmt.predicates = plan.filters.clone();
    stmt.order_by = plan.order_by.clone();
    stmt.limit = plan.limit;

    match plan.operation {
        Operation::Count => {
            if plan.group_by.is_empty() {
                stmt.items.push(SelectItem::CountStar {
                    alias: "count".to_string(),
                });
            } else {
                grouped_count(&mut stmt, &plan.group_by);
            }
        }
        Operation::Sum | Operation::Mean | Operation::Max | Operation::Min => {
            let func = match plan.operation {
                Operation::Sum => "SUM",
                Operation::Mean => "AVG",
                Operation::Max => "MAX",
                _ => "MIN",
            };
            match (&plan.target, plan.group_by.is_empty()) {
                (Some(target), true) => {
                    stmt.items.push(SelectItem::Aggregate {
                        func,
                        column: target.clone(),
                        alias: aggregate_alias(plan.operation, target),
                    });
                }
                (Some(target), false) => {
                    for g in &plan.group_by {
                        stmt.items.push(SelectItem::Column(g.clone()));
                    }
                    stmt.items.push(SelectItem::Aggregate {
                        func,
                        column: target.clone(),
                        alias: aggregate_alias(plan.operation, target),
                    });
                    stmt.group_by = plan.group_by.clone();
                }
                (None, false) => {
                    // Aggregation without a target degrades to grouped counts.
                    grouped_count(&mut stmt, &plan.group_by);
                }
                (None, true) => {
                    // No target and nothing to group: fall back to a row count.
                    stmt.items.push(SelectItem::CountStar {
                        alias: "count".to_string(),
                    });
                }
            }
        }
        Operation::Median => {
            return Err(DataChatError::UnsupportedOperation(
                "median is not available on the relational backend".to_string(),
            ));
        }
        Operation::Select => {
            projection(&mut stmt, &plan.columns);
        }
        Operation::Distinct => {
            stmt.distinct = true;
            projection(&mut stmt, &plan.columns);
        }
        Operation::Top => {
            projection(&mut stmt, &plan.columns);
            if stmt.order_by.is_empty() {
                if let Some(target) = &plan.target {
                    stmt.order_by.push(format!("{} DESC", target));
                }
            }
            stmt.limit = Some(plan.limit.unwrap_or(DEFAULT_TOP_LIMIT));
        }
        Operation::GroupBy => {
            if plan.group_by.is_empty() {
                return Err(DataChatError::UnsupportedOperation(
                    "group_by operation requires at least one grouping column".to_string(),
                ));
            }
            match &plan.target {
                // An unqualified grouped aggregation averages its target.
                Some(target) => {
                    for g in &plan.group_by {
                        stmt.items.push(SelectItem::Column(g.clone()));
                    }
                    stmt.items.push(SelectItem::Aggregate {
                        func: "AVG",
                        column: target.clone(),
                        alias: aggregate_alias(Operation::Mean, target),
                    });
                    stmt.group_by = plan.group_by.clone();
                }
                None => grouped_count(&mut stmt, &plan.group_by),
            }
        }
    }

    Ok(stmt.render(dialect))
}

fn grouped_count(stmt: &mut SelectStatement, group_by: &[String]) {
    for g in group_by {
        stmt.items.push(SelectItem::Column(g.clone()));
    }
    stmt.items.push(SelectItem::CountStar {
        alias: "count".to_string(),
    });
    stmt.group_by = group_by.to_vec();
}

fn projection(stmt: &mut SelectStatement, columns: &[String]) {
    if columns.is_empty() {
        stmt.items.push(SelectItem::All);
    } else {
        for c in columns {
            stmt.items.push(SelectItem::Column(c.clone()));
        }
    }
}

/// Synthesized output column name, shared with the tabular backend so the
/// summarizer can classify results uniformly.
pub fn aggregate_alias(op: Operation, target: &str) -> String {
    format!("{}_{}", op.synthesized_name(), target)
}

fn render_predicate(filter: &Filter) -> String {
    match filter.op {
        FilterOp::Equals
        | FilterOp::NotEquals
        | FilterOp::Gt
        | FilterOp::Gte
        | FilterOp::Lt
        | FilterOp::Lte => {
            let symbol = filter.op.sql_symbol().unwrap_or("=");
            let value = filter
                .value
                .as_scalar()
                .map(sql_literal)
                .unwrap_or_else(|| "NULL".to_string());
            format!("{} {} {}", filter.column, symbol, value)
        }
        FilterOp::In | FilterOp::NotIn => {
            let keyword = if filter.op == FilterOp::In { "IN" } else { "NOT IN" };
            let items: Vec<String> = match &filter.value {
                FilterValue::List(vs) => vs.iter().map(sql_literal).collect(),
                FilterValue::Scalar(v) => vec![sql_literal(v)],
            };
            format!("{} {} ({})", filter.column, keyword, items.join(", "))
        }
        FilterOp::Contains => like_predicate(filter, "%", "%"),
        FilterOp::StartsWith => like_predicate(filter, "", "%"),
        FilterOp::EndsWith => like_predicate(filter, "%", ""),
    }
}

/// Case-insensitive LIKE over the lowered column and pattern.
fn like_predicate(filter: &Filter, prefix: &str, suffix: &str) -> String {
    let needle = match filter.value.as_scalar() {
        Some(Value::Text(s)) => s.to_lowercase(),
        Some(other) => other.to_string().to_lowercase(),
        None => String::new(),
    };
    format!(
        "LOWER({}) LIKE '{}{}{}'",
        filter.column,
        prefix,
        escape_sql_string(&needle),
        suffix
    )
}

/// Render a scalar as a SQL literal: strings quoted, numerics bare.
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", escape_sql_string(s)),
    }
}

fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Filter, FilterOp, FilterValue, IntentPlan, Operation};
    use crate::value::Value;

    fn filter(column: &str, op: FilterOp, value: Value) -> Filter {
        Filter {
            column: column.to_string(),
            op,
            value: FilterValue::Scalar(value),
        }
    }

    #[test]
    fn test_count_star() {
        let plan = IntentPlan::new(Operation::Count);
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert_eq!(sql, "SELECT COUNT(*) AS count FROM empleados");
    }

    #[test]
    fn test_mean_with_group_and_filter() {
        let mut plan = IntentPlan::new(Operation::Mean);
        plan.target = Some("salario".into());
        plan.group_by = vec!["genero".into()];
        plan.filters.push(filter(
            "departamento",
            FilterOp::Equals,
            Value::Text("IT".into()),
        ));
        let sql = compile_plan(&plan, "empleados", Dialect::Mysql).unwrap();
        assert_eq!(
            sql,
            "SELECT genero, AVG(salario) AS mean_salario FROM empleados WHERE departamento = 'IT' GROUP BY genero"
        );
    }

    #[test]
    fn test_numeric_literal_is_bare() {
        let mut plan = IntentPlan::new(Operation::Count);
        plan.filters.push(filter("edad", FilterOp::Gte, Value::Int(30)));
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert!(sql.contains("edad >= 30"));
        assert!(!sql.contains("'30'"));
    }

    #[test]
    fn test_string_escaping() {
        let mut plan = IntentPlan::new(Operation::Count);
        plan.filters.push(filter(
            "nombre",
            FilterOp::Equals,
            Value::Text("O'Brien".into()),
        ));
        let sql = compile_plan(&plan, "t", Dialect::Sqlite).unwrap();
        assert!(sql.contains("nombre = 'O''Brien'"));
    }

    #[test]
    fn test_in_list() {
        let mut plan = IntentPlan::new(Operation::Count);
        plan.filters.push(Filter {
            column: "ciudad".into(),
            op: FilterOp::In,
            value: FilterValue::List(vec![
                Value::Text("Lima".into()),
                Value::Text("Quito".into()),
            ]),
        });
        let sql = compile_plan(&plan, "t", Dialect::Postgres).unwrap();
        assert!(sql.contains("ciudad IN ('Lima', 'Quito')"));
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let mut plan = IntentPlan::new(Operation::Select);
        plan.filters.push(filter(
            "nombre",
            FilterOp::Contains,
            Value::Text("Ana".into()),
        ));
        let sql = compile_plan(&plan, "t", Dialect::Sqlite).unwrap();
        assert!(sql.contains("LOWER(nombre) LIKE '%ana%'"));
    }

    #[test]
    fn test_distinct() {
        let mut plan = IntentPlan::new(Operation::Distinct);
        plan.columns = vec!["departamento".into()];
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert_eq!(sql, "SELECT DISTINCT departamento FROM empleados");
    }

    #[test]
    fn test_top_defaults_order_and_limit() {
        let mut plan = IntentPlan::new(Operation::Top);
        plan.columns = vec!["nombre".into(), "salario".into()];
        plan.target = Some("salario".into());
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert_eq!(
            sql,
            "SELECT nombre, salario FROM empleados ORDER BY salario DESC LIMIT 10"
        );
    }

    #[test]
    fn test_group_by_without_target_counts_rows() {
        let mut plan = IntentPlan::new(Operation::GroupBy);
        plan.group_by = vec!["departamento".into()];
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert_eq!(
            sql,
            "SELECT departamento, COUNT(*) AS count FROM empleados GROUP BY departamento"
        );
    }

    #[test]
    fn test_aggregation_without_target_degrades_to_count() {
        let mut plan = IntentPlan::new(Operation::Mean);
        plan.group_by = vec!["genero".into()];
        let sql = compile_plan(&plan, "empleados", Dialect::Sqlite).unwrap();
        assert!(sql.contains("COUNT(*) AS count"));
        assert!(sql.contains("GROUP BY genero"));
    }

    #[test]
    fn test_median_is_unsupported() {
        let mut plan = IntentPlan::new(Operation::Median);
        plan.target = Some("salario".into());
        assert!(matches!(
            compile_plan(&plan, "t", Dialect::Sqlite),
            Err(DataChatError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_every_operation_renders_or_reports() {
        // No enum member may panic or fall through silently.
        for op in Operation::ALL {
            let mut plan = IntentPlan::new(op);
            plan.target = Some("salario".into());
            plan.group_by = vec!["genero".into()];
            match compile_plan(&plan, "t", Dialect::Sqlite) {
                Ok(sql) => assert!(sql.starts_with("SELECT "), "bad sql for {}: {}", op, sql),
                Err(DataChatError::UnsupportedOperation(_)) => {
                    assert_eq!(op, Operation::Median);
                }
                Err(e) => panic!("unexpected error for {}: {}", op, e),
            }
        }
    }

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(Dialect::from_url("mysql+pymysql://u:p@h/db"), Dialect::Mysql);
        assert_eq!(Dialect::from_url("postgresql://u@h/db"), Dialect::Postgres);
        assert_eq!(Dialect::from_url("sqlite:///tmp/x.db"), Dialect::Sqlite);
        assert_eq!(Dialect::from_url("odbc://whatever"), Dialect::Ansi);
    }
}
