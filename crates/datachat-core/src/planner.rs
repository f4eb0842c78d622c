//! Rule-based planner: the deterministic fallback.
//!
//! Pure function of (question, table schema) with no model access. Always
//! returns a structurally valid plan, even for an empty question or a schema
//! with no numeric columns. Keyword tables are bilingual (Spanish/English),
//! matching the questions the system is asked in practice.

use crate::plan::{IntentPlan, Operation};
use crate::schema::TableSchema;

/// Operation keyword groups, most specific first; first match wins. Median
/// precedes mean because "mediana"/"median" contain "media"; count words
/// come last as the most generic bucket.
const OPERATION_KEYWORDS: &[(Operation, &[&str])] = &[
    (Operation::Median, &["mediana", "median"]),
    (
        Operation::Mean,
        &["promedio", "media", "average", "mean", "avg"],
    ),
    (
        Operation::Sum,
        &["suma", "sumar", "totalizar", "sum total", "sum of", "sum "],
    ),
    (
        Operation::Max,
        &["maximo", "mayor", "mas alto", "maximum", "highest", "max "],
    ),
    (
        Operation::Min,
        &["minimo", "menor", "mas bajo", "minimum", "lowest", "min "],
    ),
    (
        Operation::Count,
        &[
            "cuantos",
            "cuantas",
            "conteo",
            "contar",
            "numero de",
            "cantidad de",
            "total de",
            "how many",
            "count",
            "number of",
        ],
    ),
];

/// Domain-word synonyms -> canonical column names. Only canonical names
/// actually present in the schema are used.
const COLUMN_SYNONYMS: &[(&str, &[&str])] = &[
    (
        "genero",
        &["genero", "sexo", "hombre", "hombres", "mujer", "mujeres"],
    ),
    ("gender", &["gender", "male", "female", "men", "women"]),
    ("departamento", &["departamento", "area", "dept"]),
    ("department", &["department", "dept", "team"]),
    (
        "salario",
        &["salario", "sueldo", "compensacion", "pago"],
    ),
    ("salary", &["salary", "wage", "pay", "compensation"]),
    ("edad", &["edad", "anos", "anios"]),
    ("age", &["age", "years old"]),
];

/// Canonical columns worth grouping by, in output order.
const GROUPABLE: &[&str] = &["genero", "gender", "departamento", "department"];

/// Numeric target preference order.
const TARGET_PREFERENCE: &[&str] = &["salario", "salary", "edad", "age"];

/// Derive a plan from the question and schema. Total: never fails.
pub fn plan_from_rules(question: &str, schema: &TableSchema) -> IntentPlan {
    let qnorm = normalize(question);

    let operation = detect_operation(&qnorm);
    let mut plan = IntentPlan::new(operation);

    let mentioned = mentioned_canonicals(&qnorm, schema);

    for canon in GROUPABLE {
        if mentioned.contains(canon) {
            if let Some(actual) = actual_column(schema, canon) {
                plan.group_by.push(actual);
            }
        }
    }

    if operation != Operation::Count {
        plan.target = pick_target(&qnorm, schema);
    }

    plan
}

/// Case-fold and strip diacritics so keyword matching is accent-insensitive.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

fn detect_operation(qnorm: &str) -> Operation {
    for (op, words) in OPERATION_KEYWORDS {
        if words.iter().any(|w| qnorm.contains(w)) {
            return *op;
        }
    }
    // The source defaulted to mean when nothing matched; a missing numeric
    // target then degrades to a row count at compile time.
    Operation::Mean
}

/// Canonical column names whose synonyms appear in the question and whose
/// canonical column exists in the schema.
fn mentioned_canonicals(qnorm: &str, schema: &TableSchema) -> Vec<&'static str> {
    let mut hits = Vec::new();
    for (canon, words) in COLUMN_SYNONYMS {
        if actual_column(schema, canon).is_some() && words.iter().any(|w| qnorm.contains(w)) {
            hits.push(*canon);
        }
    }
    hits
}

/// Find the schema's real spelling of a canonical column name.
fn actual_column(schema: &TableSchema, canon: &str) -> Option<String> {
    schema
        .columns
        .iter()
        .find(|c| normalize(&c.name) == canon)
        .map(|c| c.name.clone())
}

fn pick_target(qnorm: &str, schema: &TableSchema) -> Option<String> {
    // An explicitly mentioned numeric column wins.
    for canon in TARGET_PREFERENCE {
        if let Some((_, words)) = COLUMN_SYNONYMS.iter().find(|(c, _)| c == canon) {
            if words.iter().any(|w| qnorm.contains(w)) {
                if let Some(col) = numeric_column(schema, canon) {
                    return Some(col);
                }
            }
        }
    }
    // Otherwise the first preferred numeric column present.
    for canon in TARGET_PREFERENCE {
        if let Some(col) = numeric_column(schema, canon) {
            return Some(col);
        }
    }
    // Otherwise any declared numeric column.
    schema.numeric_columns().first().map(|c| c.name.clone())
}

fn numeric_column(schema: &TableSchema, canon: &str) -> Option<String> {
    schema
        .columns
        .iter()
        .find(|c| normalize(&c.name) == canon && c.ty.is_numeric())
        .map(|c| c.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnInfo, TableSchema};
    use crate::value::ColumnType;

    fn employees() -> TableSchema {
        TableSchema {
            name: "empleados".to_string(),
            columns: vec![
                ColumnInfo {
                    name: "genero".to_string(),
                    ty: ColumnType::Text,
                },
                ColumnInfo {
                    name: "salario".to_string(),
                    ty: ColumnType::Float,
                },
                ColumnInfo {
                    name: "departamento".to_string(),
                    ty: ColumnType::Text,
                },
                ColumnInfo {
                    name: "edad".to_string(),
                    ty: ColumnType::Integer,
                },
            ],
        }
    }

    #[test]
    fn test_average_salary_by_gender() {
        let plan = plan_from_rules("salario promedio por género", &employees());
        assert_eq!(plan.operation, Operation::Mean);
        assert_eq!(plan.group_by, vec!["genero"]);
        assert_eq!(plan.target.as_deref(), Some("salario"));
    }

    #[test]
    fn test_count_question_has_no_target() {
        let plan = plan_from_rules("¿Cuántos empleados hay?", &employees());
        assert_eq!(plan.operation, Operation::Count);
        assert!(plan.target.is_none());
    }

    #[test]
    fn test_accents_do_not_matter() {
        let a = plan_from_rules("máximo salario", &employees());
        let b = plan_from_rules("maximo salario", &employees());
        assert_eq!(a.operation, Operation::Max);
        assert_eq!(b.operation, Operation::Max);
        assert_eq!(a.target, b.target);
    }

    #[test]
    fn test_english_question() {
        let plan = plan_from_rules("average salary by department", &employees());
        assert_eq!(plan.operation, Operation::Mean);
        assert_eq!(plan.group_by, vec!["departamento"]);
        assert_eq!(plan.target.as_deref(), Some("salario"));
    }

    #[test]
    fn test_age_target_when_mentioned() {
        let plan = plan_from_rules("promedio de edad", &employees());
        assert_eq!(plan.operation, Operation::Mean);
        assert_eq!(plan.target.as_deref(), Some("edad"));
    }

    #[test]
    fn test_total_on_empty_question() {
        // Must not panic and must produce a structurally valid plan.
        let plan = plan_from_rules("", &employees());
        assert!(plan.group_by.iter().all(|g| employees().has_column(g)));
    }

    #[test]
    fn test_total_on_schema_without_numeric_columns() {
        let schema = TableSchema {
            name: "notas".to_string(),
            columns: vec![ColumnInfo {
                name: "texto".to_string(),
                ty: ColumnType::Text,
            }],
        };
        let plan = plan_from_rules("promedio de salario", &schema);
        assert_eq!(plan.operation, Operation::Mean);
        // No numeric column to target; compilers degrade this to a count.
        assert!(plan.target.is_none());
    }

    #[test]
    fn test_group_by_only_when_column_exists() {
        let schema = TableSchema {
            name: "ventas".to_string(),
            columns: vec![ColumnInfo {
                name: "monto".to_string(),
                ty: ColumnType::Float,
            }],
        };
        let plan = plan_from_rules("ventas por departamento", &schema);
        assert!(plan.group_by.is_empty());
    }
}
