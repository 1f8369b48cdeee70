//! Single source of truth for the sqlrepair filesystem layout.
//!
//! This module defines WHERE data lives. It has no I/O, no validation,
//! no business logic.
//!
//! ```text
//! project/.sqlrepair/
//! ├── config.toml              # Repair settings, connection, database rules
//! └── corpus.db                # Query corpus, attempt log, eventlog
//! ```
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use sqlrepair::paths;
//!
//! let root = Path::new("/work/datasets");
//! assert_eq!(
//!     paths::corpus_path(root),
//!     Path::new("/work/datasets/.sqlrepair/corpus.db")
//! );
//! ```

use std::path::{Path, PathBuf};

/// Environment variable that overrides the configured DSN.
pub const DSN_ENV: &str = "SQLREPAIR_DSN";

/// Project data directory: `.sqlrepair/`
pub fn data_dir(root: &Path) -> PathBuf {
    root.join(".sqlrepair")
}

/// Project config: `.sqlrepair/config.toml`
pub fn config_path(root: &Path) -> PathBuf {
    data_dir(root).join("config.toml")
}

/// Default corpus database: `.sqlrepair/corpus.db`
pub fn corpus_path(root: &Path) -> PathBuf {
    data_dir(root).join("corpus.db")
}

/// Resolve a configured path against the project root. Absolute paths are
/// returned unchanged.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let root = Path::new("/p");
        assert_eq!(config_path(root), Path::new("/p/.sqlrepair/config.toml"));
        assert_eq!(corpus_path(root), Path::new("/p/.sqlrepair/corpus.db"));
    }

    #[test]
    fn test_resolve() {
        let root = Path::new("/p");
        assert_eq!(resolve(root, Path::new("c.db")), Path::new("/p/c.db"));
        assert_eq!(resolve(root, Path::new("/abs/c.db")), Path::new("/abs/c.db"));
    }
}
