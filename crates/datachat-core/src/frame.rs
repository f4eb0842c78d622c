//! In-memory tabular dataset loaded from a CSV file.
//!
//! Parses the header and rows into typed cells, inferring a primitive type
//! per column over a bounded sample. Quoted fields may contain commas and
//! doubled quotes; embedded newlines are not supported.

use crate::error::{DataChatError, Result};
use crate::value::{ColumnType, Value};
use serde::Serialize;
use std::path::Path;

/// Rows sampled for type inference.
const TYPE_SAMPLE_ROWS: usize = 2000;

/// An in-memory dataset: column names, inferred types, and rows.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Binding name the dataset is exposed under in generated code.
    pub name: String,
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub rows: Vec<Vec<Value>>,
}

/// The uniform result shape produced by both execution backends.
#[derive(Debug, Clone, Serialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn empty() -> Self {
        TabularResult {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl Frame {
    /// Load a CSV file. Fails with `SchemaUnavailable` when the file cannot
    /// be read or has no header row.
    pub fn from_csv_path(path: &Path) -> Result<Frame> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DataChatError::SchemaUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let name = "df".to_string();
        Frame::from_csv_text(name, &text)
    }

    /// Parse CSV text into a typed frame.
    pub fn from_csv_text(name: String, text: &str) -> Result<Frame> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| DataChatError::SchemaUnavailable("empty CSV file".to_string()))?;
        let columns: Vec<String> = split_csv_line(header)
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect();
        if columns.iter().any(|c| c.is_empty()) {
            return Err(DataChatError::SchemaUnavailable(
                "CSV header has an empty column name".to_string(),
            ));
        }

        let mut raw_rows: Vec<Vec<String>> = Vec::new();
        for (idx, line) in lines.enumerate() {
            let fields = split_csv_line(line);
            if fields.len() != columns.len() {
                return Err(DataChatError::SchemaUnavailable(format!(
                    "CSV row {} has {} fields, expected {}",
                    idx + 2,
                    fields.len(),
                    columns.len()
                )));
            }
            raw_rows.push(fields);
        }

        let types = infer_types(&columns, &raw_rows);
        let rows = raw_rows
            .into_iter()
            .map(|fields| {
                fields
                    .into_iter()
                    .zip(types.iter())
                    .map(|(field, ty)| parse_cell(&field, *ty))
                    .collect()
            })
            .collect();

        Ok(Frame {
            name,
            columns,
            types,
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.column_index(name).map(|i| self.types[i])
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn to_result(&self) -> TabularResult {
        TabularResult {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        }
    }
}

/// Split one CSV line into fields. Supports quoted fields with embedded
/// commas and doubled quotes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
            }
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Infer a column type from a bounded sample of raw fields.
///
/// All-integer columns become Integer; mixed integer/float become Float;
/// all true/false become Boolean; anything else is Text. Empty fields are
/// nulls and do not vote.
fn infer_types(columns: &[String], rows: &[Vec<String>]) -> Vec<ColumnType> {
    (0..columns.len())
        .map(|col| {
            let mut saw_value = false;
            let mut all_int = true;
            let mut all_num = true;
            let mut all_bool = true;
            for row in rows.iter().take(TYPE_SAMPLE_ROWS) {
                let field = row[col].trim();
                if field.is_empty() {
                    continue;
                }
                saw_value = true;
                if field.parse::<i64>().is_err() {
                    all_int = false;
                }
                if field.parse::<f64>().is_err() {
                    all_num = false;
                }
                if !field.eq_ignore_ascii_case("true") && !field.eq_ignore_ascii_case("false") {
                    all_bool = false;
                }
            }
            if !saw_value {
                ColumnType::Text
            } else if all_bool {
                ColumnType::Boolean
            } else if all_int {
                ColumnType::Integer
            } else if all_num {
                ColumnType::Float
            } else {
                ColumnType::Text
            }
        })
        .collect()
}

fn parse_cell(field: &str, ty: ColumnType) -> Value {
    let field = field.trim();
    if field.is_empty() {
        return Value::Null;
    }
    match ty {
        ColumnType::Integer => field.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(field.to_string())),
        ColumnType::Float => field.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(field.to_string())),
        ColumnType::Boolean => Value::Bool(field.eq_ignore_ascii_case("true")),
        ColumnType::Text => Value::Text(field.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEES_CSV: &str = "\
genero,salario,departamento,edad
M,50000,IT,34
F,52000,IT,29
M,41000,Ventas,45
F,47500.5,Ventas,38
";

    #[test]
    fn test_parse_employees_csv() {
        let frame = Frame::from_csv_text("df".into(), EMPLOYEES_CSV).unwrap();
        assert_eq!(
            frame.columns,
            vec!["genero", "salario", "departamento", "edad"]
        );
        assert_eq!(frame.row_count(), 4);
        assert_eq!(frame.column_type("genero"), Some(ColumnType::Text));
        // Mixed int/float salaries widen to float
        assert_eq!(frame.column_type("salario"), Some(ColumnType::Float));
        assert_eq!(frame.column_type("edad"), Some(ColumnType::Integer));
    }

    #[test]
    fn test_quoted_fields() {
        let csv = "name,notes\n\"Lopez, Ana\",\"said \"\"hi\"\"\"\n";
        let frame = Frame::from_csv_text("df".into(), csv).unwrap();
        assert_eq!(frame.rows[0][0], Value::Text("Lopez, Ana".into()));
        assert_eq!(frame.rows[0][1], Value::Text("said \"hi\"".into()));
    }

    #[test]
    fn test_empty_cells_are_null() {
        let csv = "a,b\n1,\n,2\n";
        let frame = Frame::from_csv_text("df".into(), csv).unwrap();
        assert!(frame.rows[0][1].is_null());
        assert!(frame.rows[1][0].is_null());
        assert_eq!(frame.column_type("a"), Some(ColumnType::Integer));
    }

    #[test]
    fn test_ragged_row_is_error() {
        let csv = "a,b\n1,2\n3\n";
        let err = Frame::from_csv_text("df".into(), csv).unwrap_err();
        assert!(matches!(err, DataChatError::SchemaUnavailable(_)));
    }

    #[test]
    fn test_empty_file_is_error() {
        let err = Frame::from_csv_text("df".into(), "").unwrap_err();
        assert!(matches!(err, DataChatError::SchemaUnavailable(_)));
    }

    #[test]
    fn test_boolean_inference() {
        let csv = "activo,n\ntrue,1\nfalse,2\n";
        let frame = Frame::from_csv_text("df".into(), csv).unwrap();
        assert_eq!(frame.column_type("activo"), Some(ColumnType::Boolean));
        assert_eq!(frame.rows[0][0], Value::Bool(true));
    }
}
