//! Corpus of generated queries.
//!
//! The SQLite store in [`store`] is the authoritative copy. JSON files are
//! the interchange format for `import` and `export`:
//!
//! ```json
//! [{"database_id": "db-3", "query_number": 12, "title": "...", "sql_text": "SELECT ..."}]
//! ```

pub mod store;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use store::{CorpusStore, ImportSummary};

/// One stored query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub database_id: String,
    pub query_number: u32,
    #[serde(default)]
    pub title: String,
    pub sql_text: String,
    /// Set by the store on every overwrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl QueryRecord {
    pub fn new(
        database_id: impl Into<String>,
        query_number: u32,
        title: impl Into<String>,
        sql_text: impl Into<String>,
    ) -> Self {
        Self {
            database_id: database_id.into(),
            query_number,
            title: title.into(),
            sql_text: sql_text.into(),
            updated_at: None,
        }
    }

    /// `<database_id>#<query_number>`
    pub fn id(&self) -> String {
        query_id(&self.database_id, self.query_number)
    }
}

pub fn query_id(database_id: &str, query_number: u32) -> String {
    format!("{}#{}", database_id, query_number)
}

/// Read and validate a JSON corpus file.
pub fn read_json(path: &Path) -> Result<Vec<QueryRecord>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus file: {}", path.display()))?;
    let records: Vec<QueryRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse corpus file: {}", path.display()))?;

    for (index, record) in records.iter().enumerate() {
        if record.database_id.trim().is_empty() {
            bail!("record {} in {} has an empty database_id", index, path.display());
        }
    }
    Ok(records)
}

pub fn write_json(path: &Path, records: &[QueryRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(records)?;
    fs::write(path, contents)
        .with_context(|| format!("Failed to write corpus file: {}", path.display()))
}
