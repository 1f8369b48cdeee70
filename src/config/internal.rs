//! Internal implementation for the config module
//!
//! Handles .sqlrepair/config.toml. Every section is optional; a missing file
//! yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::live::{Backend, Timeouts};
use crate::paths;
use crate::repair::RepairConfig;
use crate::rules::database::DatabaseRuleSpec;

// =============================================================================
// Config Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusSection,
    #[serde(default)]
    pub repair: RepairSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    /// `[[database_rules.<database_id>]]` tables, in declaration order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub database_rules: BTreeMap<String, Vec<DatabaseRuleSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSection {
    /// Corpus database, relative to the project root
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from(".sqlrepair/corpus.db")
}

impl Default for CorpusSection {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairSection {
    /// Executions per query before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Rows fetched per probe
    #[serde(default = "default_fetch_rows")]
    pub fetch_rows: usize,
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_secs: u64,
    /// Treat Unfixable as a failing outcome
    #[serde(default)]
    pub strict: bool,
}

fn default_max_attempts() -> usize {
    5
}
fn default_fetch_rows() -> usize {
    10
}
fn default_statement_timeout() -> u64 {
    30
}

impl Default for RepairSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            fetch_rows: default_fetch_rows(),
            statement_timeout_secs: default_statement_timeout(),
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    /// Connection string; `{database}` is replaced by the database id
    #[serde(default = "default_dsn")]
    pub dsn: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_backend() -> Backend {
    Backend::Postgres
}
fn default_dsn() -> String {
    "host=localhost user=postgres dbname={database}".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dsn: default_dsn(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Config {
    pub fn repair_config(&self) -> RepairConfig {
        RepairConfig {
            max_attempts: self.repair.max_attempts.max(1),
            fetch_rows: self.repair.fetch_rows.max(1),
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_secs(self.connection.connect_timeout_secs),
            statement: Duration::from_secs(self.repair.statement_timeout_secs),
        }
    }
}

// =============================================================================
// Load / Save
// =============================================================================

pub fn load(root: &Path) -> Result<Config> {
    let path = paths::config_path(root);

    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    toml::from_str(&contents).with_context(|| format!("Failed to parse config: {}", path.display()))
}

pub fn save(root: &Path, config: &Config) -> Result<()> {
    let path = paths::config_path(root);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    fs::write(&path, contents)?;
    Ok(())
}

/// Precedence: command line, then `SQLREPAIR_DSN`, then the config file.
pub fn resolve_dsn(cli: Option<&str>, env: Option<String>, configured: &str) -> String {
    cli.map(str::to_string)
        .or(env.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| configured.to_string())
}
