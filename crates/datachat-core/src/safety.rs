//! Safety gate for model-authored SQL.
//!
//! Free-form statements from the model are untrusted. The gate enforces
//! read-only execution (mutating keywords reject the request outright),
//! injects a row cap when none is present, and normalizes constructs the
//! target engine does not support. Normalization is idempotent and ends
//! with a cleanup pass that removes dangling boolean connectives left by
//! predicate-stripping rewrites.

use crate::error::{DataChatError, Result};
use crate::extract::unwrap_code_block;
use crate::relational::Dialect;
use regex::Regex;
use std::sync::LazyLock;

static FORBIDDEN_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|ALTER|DROP|TRUNCATE|CREATE|REPLACE)\b").unwrap()
});

static STARTS_WITH_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^SELECT\b").unwrap());

static HAS_LIMIT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());

/// Validate a model-authored statement and inject a row cap.
///
/// Rejection is fatal for the request; it is never silently downgraded.
pub fn sanitize_sql(raw: &str, max_rows: usize) -> Result<String> {
    let mut stmt = unwrap_code_block(raw);
    stmt = stmt.trim().trim_end_matches(';').trim().to_string();

    if stmt.is_empty() {
        return Err(DataChatError::UnsafeStatement {
            reason: "empty statement".to_string(),
            code: raw.to_string(),
        });
    }
    if let Some(m) = FORBIDDEN_SQL.find(&stmt) {
        return Err(DataChatError::UnsafeStatement {
            reason: format!("mutating keyword not allowed: {}", m.as_str().to_uppercase()),
            code: stmt,
        });
    }
    if !STARTS_WITH_SELECT.is_match(&stmt) {
        return Err(DataChatError::UnsafeStatement {
            reason: "only SELECT statements are allowed".to_string(),
            code: stmt,
        });
    }
    if !HAS_LIMIT.is_match(&stmt) {
        stmt = format!("{} LIMIT {}", stmt, max_rows);
    }
    Ok(stmt)
}

static YEAR_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bYEAR\s*\(\s*([^()]+?)\s*\)").unwrap());
static NOW_FN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bNOW\s*\(\s*\)").unwrap());
static CURDATE_FN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCURDATE\s*\(\s*\)").unwrap());

/// Degenerate guard predicates some models attach ("since forever"), e.g.
/// `fecha >= '1900-01-01'`. Stripping them must not leave dangling
/// connectives; see `fix_dangling_connectives`.
static STALE_DATE_PREDICATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\w.]+\s*(?:>=|>)\s*'(?:1900-01-01|1970-01-01|0000-00-00)'").unwrap()
});

static WHERE_AND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\s+AND\b").unwrap());
static AND_AND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bAND\s+AND\b").unwrap());
static WHERE_BEFORE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bWHERE\s+(GROUP\s+BY|ORDER\s+BY|LIMIT|HAVING)\b").unwrap()
});
static TRAILING_WHERE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bWHERE\s*$").unwrap());
static TRAILING_AND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bAND\s*$").unwrap());
static AND_BEFORE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bAND\s+(GROUP\s+BY|ORDER\s+BY|LIMIT|HAVING)\b").unwrap()
});
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"  +").unwrap());

/// Rewrite constructs the target engine lacks. Idempotent:
/// `normalize_dialect(normalize_dialect(s, d), d) == normalize_dialect(s, d)`.
pub fn normalize_dialect(stmt: &str, dialect: Dialect) -> String {
    let mut out = stmt.to_string();

    if dialect == Dialect::Sqlite {
        out = YEAR_FN
            .replace_all(&out, "CAST(STRFTIME('%Y', $1) AS INTEGER)")
            .to_string();
        out = NOW_FN.replace_all(&out, "CURRENT_TIMESTAMP").to_string();
        out = CURDATE_FN.replace_all(&out, "DATE('now')").to_string();
        out = STALE_DATE_PREDICATE.replace_all(&out, "").to_string();
    }

    fix_dangling_connectives(&out)
}

/// Remove boolean-connective artifacts left by predicate stripping:
/// `WHERE AND`, `AND AND`, `WHERE` directly before a clause keyword, and a
/// trailing `WHERE`/`AND`.
pub fn fix_dangling_connectives(stmt: &str) -> String {
    let mut out = stmt.trim().to_string();
    // Repeated application handles stacked artifacts (`WHERE AND AND ...`).
    loop {
        let before = out.clone();
        out = AND_AND.replace_all(&out, "AND").to_string();
        out = WHERE_AND.replace_all(&out, "WHERE").to_string();
        out = AND_BEFORE_CLAUSE.replace_all(&out, "$1").to_string();
        out = WHERE_BEFORE_CLAUSE.replace_all(&out, "$1").to_string();
        out = TRAILING_AND.replace_all(&out, "").to_string();
        out = TRAILING_WHERE.replace_all(&out, "").to_string();
        out = MULTI_SPACE.replace_all(&out, " ").to_string();
        out = out.trim().to_string();
        if out == before {
            return out;
        }
    }
}
