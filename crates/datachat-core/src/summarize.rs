//! Deterministic natural-language summaries of tabular results.
//!
//! Pure function of (result, total row count, language, original question).
//! Bilingual Spanish/English; no model involvement.

use crate::frame::TabularResult;
use crate::planner::normalize;
use crate::value::{format_number, Value};
use serde::Serialize;

/// Summary language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    En,
}

impl Language {
    pub fn parse(s: &str) -> Option<Language> {
        match s.trim().to_lowercase().as_str() {
            "es" | "spanish" | "espanol" | "español" => Some(Language::Es),
            "en" | "english" | "ingles" | "inglés" => Some(Language::En),
            _ => None,
        }
    }
}

/// Spanish marker words; a question containing any of them is summarized in
/// Spanish. No marker means English.
const SPANISH_MARKERS: &[&str] = &[
    "cuantos",
    "cuantas",
    "cuanto",
    "cual",
    "cuales",
    "promedio",
    "mediana",
    "suma",
    "sumar",
    "maximo",
    "minimo",
    "mayor",
    "menor",
    "numero de",
    "cantidad",
    "empleados",
    "salario",
    "sueldo",
    "genero",
    "departamento",
    "muestra",
    "filas",
    "tabla",
    "quienes",
];

/// Infer the summary language from the question wording.
pub fn detect_language(question: &str) -> Language {
    let qnorm = normalize(question);
    if SPANISH_MARKERS.iter().any(|m| qnorm.contains(m)) {
        Language::Es
    } else {
        Language::En
    }
}

/// Fields shown in a single-row key=value listing.
const KV_FIELD_CAP: usize = 4;
/// Entries displayed in a top-N phrasing.
const TOP_DISPLAY_CAP: usize = 5;
/// Example values / column names in the generic summary.
const EXAMPLE_CAP: usize = 3;

/// Build a one-line summary of a result table.
///
/// `total_rows` is the pre-truncation row count, which can exceed
/// `result.rows.len()` when the caller applied a row cap.
pub fn summarize(
    result: &TabularResult,
    total_rows: usize,
    lang: Language,
    question: &str,
) -> String {
    if result.rows.is_empty() {
        return match lang {
            Language::Es => "No se encontraron resultados para tu consulta.".to_string(),
            Language::En => "No results were found for your query.".to_string(),
        };
    }

    if result.rows.len() == 1 && result.columns.len() == 1 {
        return single_value(result, lang, question);
    }

    if result.rows.len() == 1 {
        return key_value_listing(result, lang);
    }

    if result.rows.len() <= 10 && result.columns.len() == 2 && second_column_numeric(result) {
        return top_listing(result, lang);
    }

    generic_summary(result, total_rows, lang)
}

/// Classify a single-cell result by its synthesized column name.
fn single_value(result: &TabularResult, lang: Language, question: &str) -> String {
    let column = result.columns[0].to_lowercase();
    let value = &result.rows[0][0];
    let rendered = format_number(value);

    if column == "count" || column.starts_with("count_") || column.contains("total") {
        let noun = guess_entity_noun(question, lang);
        return match lang {
            Language::Es => format!("Se encontraron {} {}.", rendered, noun),
            Language::En => format!("Found {} {}.", rendered, noun),
        };
    }
    if let Some(target) = column.strip_prefix("mean_").or_else(|| column.strip_prefix("avg_")) {
        return match lang {
            Language::Es => format!("El promedio de {} es {}.", target, rendered),
            Language::En => format!("The average {} is {}.", target, rendered),
        };
    }
    if let Some(target) = column.strip_prefix("sum_") {
        return match lang {
            Language::Es => format!("La suma de {} es {}.", target, rendered),
            Language::En => format!("The total {} is {}.", target, rendered),
        };
    }
    if let Some(target) = column.strip_prefix("max_") {
        return match lang {
            Language::Es => format!("El valor máximo de {} es {}.", target, rendered),
            Language::En => format!("The maximum {} is {}.", target, rendered),
        };
    }
    if let Some(target) = column.strip_prefix("min_") {
        return match lang {
            Language::Es => format!("El valor mínimo de {} es {}.", target, rendered),
            Language::En => format!("The minimum {} is {}.", target, rendered),
        };
    }
    if let Some(target) = column.strip_prefix("median_") {
        return match lang {
            Language::Es => format!("La mediana de {} es {}.", target, rendered),
            Language::En => format!("The median {} is {}.", target, rendered),
        };
    }
    format!("{}: {}", result.columns[0], rendered)
}

/// Single row, several columns: bounded key=value listing.
fn key_value_listing(result: &TabularResult, lang: Language) -> String {
    let row = &result.rows[0];
    let mut parts: Vec<String> = result
        .columns
        .iter()
        .zip(row.iter())
        .take(KV_FIELD_CAP)
        .map(|(c, v)| format!("{}={}", c, format_number(v)))
        .collect();
    if result.columns.len() > KV_FIELD_CAP {
        parts.push("…".to_string());
    }
    match lang {
        Language::Es => format!("Resultado: {}.", parts.join(", ")),
        Language::En => format!("Result: {}.", parts.join(", ")),
    }
}

fn second_column_numeric(result: &TabularResult) -> bool {
    result
        .rows
        .iter()
        .all(|r| matches!(r[1], Value::Int(_) | Value::Float(_) | Value::Null))
        && result.rows.iter().any(|r| !r[1].is_null())
}

/// Small two-column numeric results read as a ranking.
fn top_listing(result: &TabularResult, lang: Language) -> String {
    let metric = &result.columns[1];
    let shown: Vec<String> = result
        .rows
        .iter()
        .take(TOP_DISPLAY_CAP)
        .map(|r| format!("{} ({})", r[0], format_number(&r[1])))
        .collect();
    let remainder = result.rows.len().saturating_sub(TOP_DISPLAY_CAP);

    let mut sentence = match lang {
        Language::Es => format!("Top {} por {}: {}", result.rows.len(), metric, shown.join(", ")),
        Language::En => format!("Top {} by {}: {}", result.rows.len(), metric, shown.join(", ")),
    };
    if remainder > 0 {
        sentence.push_str(&match lang {
            Language::Es => format!(" y {} más", remainder),
            Language::En => format!(" and {} more", remainder),
        });
    }
    sentence.push('.');
    sentence
}

/// Fallback: row count plus a few example values and column names.
fn generic_summary(result: &TabularResult, total_rows: usize, lang: Language) -> String {
    let examples: Vec<String> = result
        .rows
        .iter()
        .take(EXAMPLE_CAP)
        .map(|r| r[0].to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let mut columns: Vec<String> = result.columns.iter().take(EXAMPLE_CAP).cloned().collect();
    if result.columns.len() > EXAMPLE_CAP {
        columns.push("…".to_string());
    }

    let mut sentence = match lang {
        Language::Es => format!("Se encontraron {} fila(s)", group_count(total_rows)),
        Language::En => format!("Found {} row(s)", group_count(total_rows)),
    };
    if !examples.is_empty() {
        sentence.push_str(&match lang {
            Language::Es => format!(". Ejemplos de {}: {}", result.columns[0], examples.join(", ")),
            Language::En => format!(". Examples of {}: {}", result.columns[0], examples.join(", ")),
        });
    }
    sentence.push_str(&match lang {
        Language::Es => format!(". Columnas: {}.", columns.join(", ")),
        Language::En => format!(". Columns: {}.", columns.join(", ")),
    });
    sentence
}

fn group_count(n: usize) -> String {
    crate::value::group_thousands(n as i64)
}

/// Best-effort entity noun for count phrasings, taken from the word after a
/// counting keyword in the question.
fn guess_entity_noun(question: &str, lang: Language) -> String {
    let qnorm = normalize(question);
    let markers = ["cuantos", "cuantas", "how many", "number of", "numero de", "cantidad de"];
    for marker in markers {
        if let Some(pos) = qnorm.find(marker) {
            let rest = &qnorm[pos + marker.len()..];
            if let Some(word) = rest.split_whitespace().find(|w| w.len() > 2) {
                return word.to_string();
            }
        }
    }
    match lang {
        Language::Es => "registros".to_string(),
        Language::En => "records".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> TabularResult {
        TabularResult {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn test_count_scenario() {
        let t = table(&["total"], vec![vec![Value::Int(42)]]);
        let s = summarize(&t, 1, Language::En, "how many employees are there?");
        assert!(s.contains("42"), "summary was: {}", s);
        assert!(s.contains("employees"), "summary was: {}", s);
    }

    #[test]
    fn test_top_scenario() {
        let t = table(
            &["genero", "salario"],
            vec![
                vec![Value::Text("M".into()), Value::Int(50000)],
                vec![Value::Text("F".into()), Value::Int(52000)],
            ],
        );
        let s = summarize(&t, 2, Language::Es, "salario por genero");
        assert!(s.starts_with("Top"), "summary was: {}", s);
        assert!(s.contains("M (50,000)"), "summary was: {}", s);
        assert!(s.contains("F (52,000)"), "summary was: {}", s);
    }

    #[test]
    fn test_empty_scenario_both_languages() {
        let t = table(&["x"], vec![]);
        assert_eq!(
            summarize(&t, 0, Language::Es, "lo que sea"),
            "No se encontraron resultados para tu consulta."
        );
        assert_eq!(
            summarize(&t, 0, Language::En, "whatever"),
            "No results were found for your query."
        );
    }

    #[test]
    fn test_key_value_scenario() {
        let t = table(
            &["a", "b", "c"],
            vec![vec![Value::Int(1), Value::Int(2), Value::Int(3)]],
        );
        let s = summarize(&t, 1, Language::En, "show me the record");
        for col in ["a", "b", "c"] {
            assert!(s.contains(&format!("{}=", col)), "summary was: {}", s);
        }
    }

    #[test]
    fn test_key_value_caps_at_four_fields() {
        let t = table(
            &["a", "b", "c", "d", "e"],
            vec![vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::Int(4),
                Value::Int(5),
            ]],
        );
        let s = summarize(&t, 1, Language::En, "q");
        assert!(!s.contains("e="), "summary was: {}", s);
        assert!(s.contains('…'), "summary was: {}", s);
    }

    #[test]
    fn test_mean_phrasing() {
        let t = table(&["mean_salario"], vec![vec![Value::Float(47000.0)]]);
        let s = summarize(&t, 1, Language::Es, "salario promedio");
        assert!(s.contains("promedio"), "summary was: {}", s);
        assert!(s.contains("salario"), "summary was: {}", s);
        assert!(s.contains("47000.00"), "summary was: {}", s);
    }

    #[test]
    fn test_top_remainder() {
        let rows: Vec<Vec<Value>> = (0..8)
            .map(|i| vec![Value::Text(format!("d{}", i)), Value::Int(100 - i)])
            .collect();
        let t = table(&["departamento", "count"], rows);
        let s = summarize(&t, 8, Language::En, "count by department");
        assert!(s.contains("and 3 more"), "summary was: {}", s);
    }

    #[test]
    fn test_generic_summary() {
        let rows: Vec<Vec<Value>> = (0..20)
            .map(|i| {
                vec![
                    Value::Text(format!("n{}", i)),
                    Value::Text("x".into()),
                    Value::Int(i),
                    Value::Int(i),
                ]
            })
            .collect();
        let t = table(&["nombre", "ciudad", "edad", "otro"], rows);
        let s = summarize(&t, 20, Language::En, "show everything");
        assert!(s.contains("20"), "summary was: {}", s);
        assert!(s.contains("n0"), "summary was: {}", s);
        assert!(s.contains("nombre"), "summary was: {}", s);
        // Only three column names plus ellipsis.
        assert!(!s.contains("otro"), "summary was: {}", s);
    }

    #[test]
    fn test_non_finite_float_renders_literally() {
        let t = table(&["mean_x"], vec![vec![Value::Float(f64::NAN)]]);
        let s = summarize(&t, 1, Language::En, "average x");
        assert!(s.contains("NaN"), "summary was: {}", s);
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language("¿Cuántos empleados hay?"), Language::Es);
        assert_eq!(detect_language("salario promedio por género"), Language::Es);
        assert_eq!(detect_language("how many rows are there?"), Language::En);
        assert_eq!(detect_language(""), Language::En);
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("es"), Some(Language::Es));
        assert_eq!(Language::parse("English"), Some(Language::En));
        assert_eq!(Language::parse("fr"), None);
    }
}
