//! Engine configuration.
//!
//! Loaded from a TOML file with per-field defaults; a missing file means
//! defaults. Covers the LLM backend, sandbox limits, and answer options.

use crate::llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Sandbox limit knobs as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_rows() -> usize {
    10_000
}

fn default_max_cells() -> usize {
    2_000_000
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            timeout_ms: default_timeout_ms(),
            max_rows: default_max_rows(),
            max_cells: default_max_cells(),
        }
    }
}

impl SandboxConfig {
    pub fn to_limits(&self) -> crate::sandbox::SandboxLimits {
        crate::sandbox::SandboxLimits {
            timeout: Duration::from_millis(self.timeout_ms),
            max_rows: self.max_rows,
            max_cells: self.max_cells,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Default answer language; None means infer from the question.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_answer_max_rows")]
    pub max_rows: usize,
    /// Path of the SQLite audit database; None disables persistence.
    #[serde(default)]
    pub audit_db: Option<String>,
}

fn default_answer_max_rows() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            llm: LlmConfig::default(),
            sandbox: SandboxConfig::default(),
            language: None,
            max_rows: default_answer_max_rows(),
            audit_db: None,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> EngineConfig {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<EngineConfig>(&text) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Invalid config at {}: {} - using defaults", path.display(), e);
                    EngineConfig::default()
                }
            },
            Err(_) => {
                info!("No config at {} - using defaults", path.display());
                EngineConfig::default()
            }
        }
    }
}
