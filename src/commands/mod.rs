pub mod export;
pub mod fix;
pub mod import;
pub mod log;
pub mod repair;
pub mod rules;

use anyhow::Result;
use std::path::{Path, PathBuf};

use sqlrepair::config::{self, Config};
use sqlrepair::corpus::CorpusStore;
use sqlrepair::paths;

/// Nearest ancestor of the working directory holding `.sqlrepair/`, else the
/// working directory itself.
pub fn project_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(find_root(&cwd).unwrap_or(cwd))
}

fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| paths::data_dir(dir).is_dir())
        .map(Path::to_path_buf)
}

/// Root, config and an open corpus store.
pub fn open_project() -> Result<(PathBuf, Config, CorpusStore)> {
    let root = project_root()?;
    let cfg = config::load(&root)?;
    let store = CorpusStore::open(&config::corpus_path(&root, &cfg))?;
    Ok((root, cfg, store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_root_walks_up() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(paths::data_dir(dir.path())).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_root(&nested).as_deref(), Some(dir.path()));
    }
}
