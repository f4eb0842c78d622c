//! Plan extraction from raw model output.
//!
//! Model responses are untrusted: the plan object may be wrapped in prose or
//! a code fence, use single quotes, or contain unescaped interior quotes.
//! Extraction slices out the first `{` .. last `}` region, parses it with a
//! best-effort repair pass, and maps the result into an `IntentPlan` with
//! field-level synonym normalization. Acceptance is all-or-nothing.

use crate::error::{DataChatError, Result};
use crate::plan::{Filter, FilterOp, FilterValue, IntentPlan, Operation};
use crate::value::Value;
use regex::Regex;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?si)```(?:json|python|sql)?\s*(.*?)\s*```").unwrap()
});

/// Extract an intent plan from raw model text.
pub fn extract_plan(raw: &str) -> Result<IntentPlan> {
    let unwrapped = unwrap_code_block(raw);

    let start = unwrapped.find('{').ok_or(DataChatError::NoPlanFound)?;
    let end = unwrapped.rfind('}').ok_or(DataChatError::NoPlanFound)?;
    if end < start {
        return Err(DataChatError::NoPlanFound);
    }
    let candidate = &unwrapped[start..=end];

    let json = parse_with_repair(candidate)?;
    plan_from_json(&json)
}

/// Strip a Markdown code fence if the whole payload is wrapped in one.
pub fn unwrap_code_block(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(caps) = CODE_FENCE.captures(trimmed) {
        caps[1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Parse a JSON object, tolerating single-quoted strings and unescaped
/// interior double quotes. Failure after repair is `MalformedPlan`.
fn parse_with_repair(candidate: &str) -> Result<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(candidate) {
        return Ok(v);
    }

    // Single-quoted JSON: swap quote style wholesale, as the source did.
    if candidate.contains('\'') && candidate.matches('"').count() < 2 {
        let swapped = candidate.replace('\'', "\"");
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&swapped) {
            return Ok(v);
        }
    }

    let repaired = repair_interior_quotes(candidate);
    serde_json::from_str::<serde_json::Value>(&repaired)
        .map_err(|e| DataChatError::MalformedPlan(format!("unparseable plan object: {}", e)))
}

/// Escape unescaped double quotes that appear inside string values.
///
/// A closing quote is one whose next non-whitespace character is a JSON
/// structural character (`,` `}` `]` `:`) or end of input; any other quote
/// found while inside a string is treated as interior and escaped.
pub fn repair_interior_quotes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string && c == '\\' && i + 1 < chars.len() {
            out.push(c);
            out.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == '"' {
            if !in_string {
                in_string = true;
                out.push(c);
            } else {
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                match chars.get(j) {
                    None | Some(',') | Some('}') | Some(']') | Some(':') => {
                        in_string = false;
                        out.push(c);
                    }
                    _ => {
                        out.push('\\');
                        out.push('"');
                    }
                }
            }
        } else {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// Map a parsed JSON object into an `IntentPlan`.
fn plan_from_json(json: &serde_json::Value) -> Result<IntentPlan> {
    let obj = json
        .as_object()
        .ok_or_else(|| DataChatError::MalformedPlan("plan is not a JSON object".to_string()))?;

    let op_str = obj
        .get("operation")
        .and_then(|v| v.as_str())
        .ok_or_else(|| DataChatError::MalformedPlan("missing operation".to_string()))?;
    let operation = Operation::parse(op_str)
        .ok_or_else(|| DataChatError::MalformedPlan(format!("unknown operation: {}", op_str)))?;

    let mut plan = IntentPlan::new(operation);
    plan.group_by = string_list(obj.get("group_by"));
    plan.columns = string_list(obj.get("columns"));
    plan.order_by = string_list(obj.get("order_by"));
    plan.target = obj
        .get("target")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());
    plan.limit = obj
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|n| n as u32);

    if let Some(serde_json::Value::Array(items)) = obj.get("filters") {
        for item in items {
            match item {
                serde_json::Value::Object(_) => {
                    if let Some(f) = filter_from_object(item) {
                        plan.filters.push(f);
                    }
                }
                serde_json::Value::String(s) => {
                    if let Some(f) = parse_filter_string(s) {
                        plan.filters.push(f);
                    }
                }
                // Other filter shapes are dropped, best effort.
                _ => {}
            }
        }
    }

    Ok(plan)
}

fn string_list(v: Option<&serde_json::Value>) -> Vec<String> {
    match v {
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

fn filter_from_object(item: &serde_json::Value) -> Option<Filter> {
    let obj = item.as_object()?;
    let column = obj.get("column")?.as_str()?.to_string();
    // Models sometimes emit "op" instead of "operator".
    let op_raw = obj
        .get("operator")
        .or_else(|| obj.get("op"))?
        .as_str()?;
    let op = FilterOp::parse(op_raw)?;
    let value = json_to_filter_value(obj.get("value")?);
    Some(Filter { column, op, value })
}

fn json_to_filter_value(v: &serde_json::Value) -> FilterValue {
    match v {
        serde_json::Value::Array(items) => {
            FilterValue::List(items.iter().map(json_to_value).collect())
        }
        other => FilterValue::Scalar(json_to_value(other)),
    }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

static FILTER_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*([\w\s]+?)\s+(not\s+in|in)\s+(.+)$").unwrap());
static FILTER_STRING_OP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([\w\s]+?)\s+(contains|startswith|endswith)\s+(.+)$").unwrap()
});
static FILTER_WORD_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*([\w\s]+?)\s+(eq|ne|gt|gte|lt|lte)\s+(.+?)\s*$").unwrap());
static FILTER_SYMBOL_OP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([\w\s]+?)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$").unwrap());

/// Parse a filter written as a bare string, e.g. `"salario >= 1000"`,
/// `"departamento eq 'IT'"`, `"ciudad in ['Lima','Quito']"`.
pub fn parse_filter_string(s: &str) -> Option<Filter> {
    if let Some(caps) = FILTER_IN.captures(s) {
        let op = if caps[2].to_lowercase().starts_with("not") {
            FilterOp::NotIn
        } else {
            FilterOp::In
        };
        return Some(Filter {
            column: caps[1].trim().to_string(),
            op,
            value: parse_literal(caps[3].trim()),
        });
    }
    if let Some(caps) = FILTER_STRING_OP.captures(s) {
        let op = FilterOp::parse(&caps[2])?;
        return Some(Filter {
            column: caps[1].trim().to_string(),
            op,
            value: FilterValue::Scalar(Value::Text(strip_quotes(caps[3].trim()).to_string())),
        });
    }
    if let Some(caps) = FILTER_WORD_OP.captures(s) {
        let op = FilterOp::parse(&caps[2])?;
        return Some(Filter {
            column: caps[1].trim().to_string(),
            op,
            value: parse_literal(caps[3].trim()),
        });
    }
    if let Some(caps) = FILTER_SYMBOL_OP.captures(s) {
        let op = FilterOp::parse(&caps[2])?;
        return Some(Filter {
            column: caps[1].trim().to_string(),
            op,
            value: parse_literal(caps[3].trim()),
        });
    }
    None
}

/// Parse a literal fragment: number, quoted string, bracketed list, or bare
/// word.
fn parse_literal(raw: &str) -> FilterValue {
    let raw = raw.trim();
    if raw.starts_with('[') && raw.ends_with(']') {
        let inner = &raw[1..raw.len() - 1];
        let items = inner
            .split(',')
            .map(|part| scalar_literal(part.trim()))
            .collect();
        return FilterValue::List(items);
    }
    FilterValue::Scalar(scalar_literal(raw))
}

fn scalar_literal(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float(f);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::Text(strip_quotes(raw).to_string()),
    }
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}
