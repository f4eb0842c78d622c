//! Datasource descriptors.
//!
//! A request targets either a relational connection URL or a tabular file
//! path. Connection URLs are validated against a conservative scheme
//! allow-list before any connection attempt, and descriptors render with
//! credentials redacted.

use crate::redact::redact_credentials;
use crate::relational::Dialect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Connection-URL schemes accepted for relational sources. `file://` and
/// anything else outside the list is rejected outright.
const ALLOWED_SCHEMES: &[&str] = &[
    "postgres",
    "postgresql",
    "postgresql+psycopg",
    "postgresql+psycopg2",
    "mysql",
    "mysql+pymysql",
    "sqlite",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSource {
    /// Relational engine behind a connection URL.
    Relational { url: String },
    /// Tabular file (CSV) on local disk.
    Tabular { path: PathBuf },
}

impl DataSource {
    pub fn dialect(&self) -> Option<Dialect> {
        match self {
            DataSource::Relational { url } => Some(Dialect::from_url(url)),
            DataSource::Tabular { .. } => None,
        }
    }

    /// Redacted, loggable descriptor.
    pub fn describe(&self) -> String {
        match self {
            DataSource::Relational { url } => redact_credentials(url),
            DataSource::Tabular { path } => path.display().to_string(),
        }
    }

    /// For SQLite URLs, the filesystem path of the database.
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        match self {
            DataSource::Relational { url } => {
                let lower = url.to_lowercase();
                if !lower.starts_with("sqlite") {
                    return None;
                }
                // sqlite:///relative.db vs sqlite:////absolute/path.db
                url.splitn(2, "://")
                    .nth(1)
                    .map(|rest| rest.strip_prefix('/').unwrap_or(rest))
                    .map(|rest| {
                        if rest.is_empty() || rest == ":memory:" {
                            PathBuf::from(":memory:")
                        } else {
                            PathBuf::from(rest)
                        }
                    })
            }
            DataSource::Tabular { .. } => None,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Conservative connection-URL validation: a known scheme, and for SQLite a
/// real path (in-memory is allowed).
pub fn validate_connection_url(url: &str) -> bool {
    let url = url.trim();
    let Some(idx) = url.find("://") else {
        return false;
    };
    let scheme = url[..idx].to_lowercase();
    if scheme.starts_with("file") {
        return false;
    }
    ALLOWED_SCHEMES.contains(&scheme.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_schemes() {
        assert!(validate_connection_url("postgresql://u:p@h:5432/db"));
        assert!(validate_connection_url("mysql+pymysql://u:p@h:3306/db"));
        assert!(validate_connection_url("sqlite:///tmp/data.db"));
    }

    #[test]
    fn test_rejected_schemes() {
        assert!(!validate_connection_url("file:///etc/passwd"));
        assert!(!validate_connection_url("mssql+pyodbc://u:p@h/db"));
        assert!(!validate_connection_url("not a url"));
        assert!(!validate_connection_url(""));
    }

    #[test]
    fn test_describe_redacts_password() {
        let ds = DataSource::Relational {
            url: "mysql://root:hunter2@db:3306/hr".to_string(),
        };
        let desc = ds.describe();
        assert!(!desc.contains("hunter2"));
        assert!(desc.contains("mysql://root:"));
    }

    #[test]
    fn test_sqlite_path_extraction() {
        let ds = DataSource::Relational {
            url: "sqlite:///var/data/hr.db".to_string(),
        };
        assert_eq!(ds.sqlite_path().unwrap(), PathBuf::from("var/data/hr.db"));

        let ds = DataSource::Relational {
            url: "mysql://u:p@h/db".to_string(),
        };
        assert!(ds.sqlite_path().is_none());
    }

    #[test]
    fn test_dialect() {
        let ds = DataSource::Relational {
            url: "postgresql://u@h/db".to_string(),
        };
        assert_eq!(ds.dialect(), Some(Dialect::Postgres));
        let ds = DataSource::Tabular {
            path: PathBuf::from("x.csv"),
        };
        assert_eq!(ds.dialect(), None);
    }
}
