//! Config module - `.sqlrepair/config.toml`
//!
//! Corpus location, repair budgets, the live connection, and the
//! database-specific rule tables.
//!
//! # Example
//!
//! ```no_run
//! use sqlrepair::config;
//! use std::path::Path;
//!
//! let root = Path::new(".");
//! let cfg = config::load(root)?;
//! let rules = config::database_rules(&cfg)?;
//! println!("max attempts: {}", cfg.repair.max_attempts);
//! println!("databases with rules: {}", rules.databases().count());
//! # Ok::<(), anyhow::Error>(())
//! ```

mod internal;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::paths;
use crate::rules::DatabaseRules;

pub use internal::{Config, ConnectionSection, CorpusSection, RepairSection};

/// Load config from `.sqlrepair/config.toml`; defaults when the file is missing.
pub fn load(root: &Path) -> Result<Config> {
    internal::load(root)
}

pub fn save(root: &Path, config: &Config) -> Result<()> {
    internal::save(root, config)
}

/// Absolute path of the corpus database.
pub fn corpus_path(root: &Path, config: &Config) -> PathBuf {
    paths::resolve(root, &config.corpus.path)
}

/// Compile the `[database_rules]` tables.
pub fn database_rules(config: &Config) -> Result<DatabaseRules> {
    DatabaseRules::from_specs(&config.database_rules)
}

/// Effective DSN template: `cli`, else `SQLREPAIR_DSN`, else the config.
pub fn dsn(config: &Config, cli: Option<&str>) -> String {
    internal::resolve_dsn(cli, std::env::var(paths::DSN_ENV).ok(), &config.connection.dsn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::Backend;
    use crate::rules::database::DatabaseRuleSpec;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.repair.max_attempts, 5);
        assert_eq!(config.repair.fetch_rows, 10);
        assert_eq!(config.connection.backend, Backend::Postgres);
        assert_eq!(
            corpus_path(dir.path(), &config),
            dir.path().join(".sqlrepair/corpus.db")
        );
    }

    #[test]
    fn test_parse_full_config() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(paths::data_dir(dir.path())).unwrap();
        std::fs::write(
            paths::config_path(dir.path()),
            r#"
[repair]
max_attempts = 3
strict = true

[connection]
backend = "sqlite"
dsn = "/data/{database}.sqlite"

[[database_rules.db-3]]
id = "rename_parent_ref"
kind = "rename"
from = "parent_id"
to = "parent_category_id"

[[database_rules.db-3]]
id = "geography"
kind = "regex"
pattern = 'ST_DWithin\((\w+)\.location,'
replacement = "ST_DWithin($1.location::geography,"
unless = "location::geography"
"#,
        )
        .unwrap();

        let config = load(dir.path()).unwrap();
        assert_eq!(config.repair.max_attempts, 3);
        assert_eq!(config.repair.fetch_rows, 10);
        assert!(config.repair.strict);
        assert_eq!(config.connection.backend, Backend::Sqlite);
        assert_eq!(config.database_rules["db-3"].len(), 2);
        assert!(matches!(
            &config.database_rules["db-3"][0],
            DatabaseRuleSpec::Rename { from, .. } if from == "parent_id"
        ));

        let rules = database_rules(&config).unwrap();
        assert_eq!(
            rules.apply_database_rules("db-3", "SELECT parent_id FROM c"),
            "SELECT parent_category_id FROM c"
        );
    }

    #[test]
    fn test_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.repair.strict = true;
        save(dir.path(), &config).unwrap();
        assert_eq!(load(dir.path()).unwrap(), config);
    }

    #[test]
    fn test_dsn_precedence() {
        assert_eq!(
            internal::resolve_dsn(Some("cli"), Some("env".into()), "file"),
            "cli"
        );
        assert_eq!(internal::resolve_dsn(None, Some("env".into()), "file"), "env");
        assert_eq!(internal::resolve_dsn(None, Some("  ".into()), "file"), "file");
        assert_eq!(internal::resolve_dsn(None, None, "file"), "file");
    }
}
