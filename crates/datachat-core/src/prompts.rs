//! Prompt builders for the LLM collaborator.
//!
//! Few-shot examples keep small local models on the rails; the pipeline
//! still treats every response as untrusted.

use crate::relational::Dialect;
use crate::schema::SchemaSnapshot;

pub const PLAN_SYSTEM: &str = "\
Return ONLY a valid JSON object with the keys: operation, group_by, target, filters. \
Valid operations: mean, sum, max, min, median, count, select, distinct, top, group_by. \
group_by: list of column names (possibly empty). \
target: numeric column to aggregate (or null when operation is count). \
filters: list of objects with fields column, operator, value. \
Allowed operators: eq, ne, gt, gte, lt, lte, in, nin, contains, startswith, endswith. \
Use only the columns provided. No extra text, JSON only.";

pub const SQL_SYSTEM: &str = "\
You translate natural-language questions (Spanish or English) into SQL. \
Use ONLY tables and columns from the schema provided. \
Answer with ONE valid SQL statement and no comments. \
DELETE, UPDATE, INSERT, ALTER, DROP, TRUNCATE, CREATE and REPLACE are forbidden. \
If the question cannot be answered from the schema, return: SELECT 'NO_ANSWER' AS reason. \
Prefer portable constructs; LIMIT is available on every supported engine.";

pub const TABULAR_SYSTEM: &str = "\
You translate natural-language questions into ONE expression over an in-memory dataset named df. \
The only allowed methods are: filter, select, distinct, group_by, sort_by, limit, count, sum, mean, median, min, max, \
and inside filter(): ==, !=, >, >=, <, <=, &&, in, not_in, contains, starts_with, ends_with. \
Use only the columns provided. Answer with the expression only, no prose, no code fences.";

/// Few-shot pairs for the plan prompt.
const PLAN_FEWSHOTS: &[(&str, &str)] = &[
    (
        "Columns: ['genero','salario','departamento']\nQuestion: salario promedio por género",
        r#"{"operation":"mean","group_by":["genero"],"target":"salario","filters":[]}"#,
    ),
    (
        "Columns: ['genero','salario','departamento']\nQuestion: salario promedio por género solo en el departamento IT",
        r#"{"operation":"mean","group_by":["genero"],"target":"salario","filters":[{"column":"departamento","operator":"eq","value":"IT"}]}"#,
    ),
];

/// Few-shot pairs for the SQL prompt.
const SQL_FEWSHOTS: &[(&str, &str)] = &[
    (
        "¿Cuál es el salario promedio de los hombres?",
        "SELECT AVG(salario) AS mean_salario FROM empleados WHERE genero = 'M'",
    ),
    (
        "Total de empleados por departamento",
        "SELECT departamento, COUNT(*) AS count FROM empleados GROUP BY departamento ORDER BY count DESC",
    ),
    (
        "How many employees are there in site 2?",
        "SELECT COUNT(*) AS count FROM empleados WHERE sede_id = 2",
    ),
];

/// Few-shot pairs for the direct tabular-expression prompt.
const TABULAR_FEWSHOTS: &[(&str, &str)] = &[
    (
        "salario promedio por género",
        "df.group_by(\"genero\").mean(\"salario\")",
    ),
    (
        "cuenta por departamento",
        "df.group_by(\"departamento\").count()",
    ),
];

/// Build the user prompt asking for a structured plan.
pub fn plan_prompt(columns: &[String], question: &str) -> String {
    let mut prompt = String::new();
    for (q, a) in PLAN_FEWSHOTS {
        prompt.push_str(&format!("Example:\n{}\nAnswer: {}\n\n", q, a));
    }
    prompt.push_str(&format!(
        "Now answer ONLY with JSON.\nColumns: [{}]\nQuestion: {}",
        quote_join(columns),
        question
    ));
    prompt
}

/// Build the user prompt asking for a SQL statement.
pub fn sql_prompt(schema: &SchemaSnapshot, dialect: Dialect, question: &str) -> String {
    let mut prompt = format!(
        "Dialect: {}\nSchema (table: [columns]):\n{}\n\n",
        dialect.name(),
        schema.describe()
    );
    for (q, a) in SQL_FEWSHOTS {
        prompt.push_str(&format!("Example: {}\nAnswer: {}\n\n", q, a));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

/// Build the user prompt asking for a direct dataset expression.
pub fn tabular_prompt(columns: &[String], question: &str) -> String {
    let mut prompt = format!("Columns: [{}]\n\n", quote_join(columns));
    for (q, a) in TABULAR_FEWSHOTS {
        prompt.push_str(&format!("Example: {}\nAnswer: {}\n\n", q, a));
    }
    prompt.push_str(&format!("Question: {}", question));
    prompt
}

fn quote_join(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("'{}'", c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, SchemaSnapshot, TableSchema};
    use crate::value::ColumnType;

    #[test]
    fn test_plan_prompt_lists_columns_and_question() {
        let cols = vec!["genero".to_string(), "salario".to_string()];
        let p = plan_prompt(&cols, "salario promedio");
        assert!(p.contains("'genero', 'salario'"));
        assert!(p.contains("salario promedio"));
        assert!(p.contains("Example:"));
    }

    #[test]
    fn test_sql_prompt_mentions_dialect_and_schema() {
        let schema = SchemaSnapshot {
            tables: vec![TableSchema {
                name: "empleados".into(),
                columns: vec![ColumnInfo {
                    name: "salario".into(),
                    ty: ColumnType::Float,
                }],
            }],
        };
        let p = sql_prompt(&schema, Dialect::Sqlite, "cuantos empleados hay");
        assert!(p.contains("Dialect: sqlite"));
        assert!(p.contains("empleados"));
        assert!(p.contains("cuantos empleados hay"));
    }
}
