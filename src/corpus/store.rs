//! SQLite corpus store.
//!
//! Tables:
//! - `queries` - one row per query, keyed by (database_id, query_number)
//! - `repair_attempts` - append-only attempt log
//! - `eventlog` - append-only transition events (see [`crate::eventlog`])

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use super::QueryRecord;
use crate::eventlog;
use crate::repair::AttemptRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
}

pub struct CorpusStore {
    conn: Connection,
}

impl CorpusStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open corpus: {}", path.display()))?;
        // Parallel repair workers each hold their own connection.
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS queries (
                database_id TEXT NOT NULL,
                query_number INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                sql_text TEXT NOT NULL,
                updated_at TEXT,
                PRIMARY KEY (database_id, query_number)
            );

            CREATE TABLE IF NOT EXISTS repair_attempts (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                database_id TEXT NOT NULL,
                query_number INTEGER NOT NULL,
                attempt_number INTEGER NOT NULL,
                rule_applied TEXT,
                category TEXT,
                success INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_attempts_query
                ON repair_attempts(database_id, query_number);
            CREATE INDEX IF NOT EXISTS idx_attempts_run ON repair_attempts(run_id);
            "#,
        )?;
        conn.execute_batch(eventlog::SCHEMA)?;
        Ok(())
    }

    /// Underlying connection, for the eventlog sink.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Import records in one transaction. Existing rows are kept unless
    /// `replace` is set.
    pub fn import(&mut self, records: &[QueryRecord], replace: bool) -> Result<ImportSummary> {
        let tx = self.conn.transaction()?;
        let mut summary = ImportSummary::default();
        let now = Utc::now();

        for record in records {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM queries WHERE database_id = ?1 AND query_number = ?2)",
                params![record.database_id, record.query_number],
                |row| row.get(0),
            )?;
            match (exists, replace) {
                (false, _) => {
                    tx.execute(
                        "INSERT INTO queries (database_id, query_number, title, sql_text, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            record.database_id,
                            record.query_number,
                            record.title,
                            record.sql_text,
                            now
                        ],
                    )?;
                    summary.inserted += 1;
                }
                (true, true) => {
                    tx.execute(
                        "UPDATE queries SET title = ?3, sql_text = ?4, updated_at = ?5
                         WHERE database_id = ?1 AND query_number = ?2",
                        params![
                            record.database_id,
                            record.query_number,
                            record.title,
                            record.sql_text,
                            now
                        ],
                    )?;
                    summary.replaced += 1;
                }
                (true, false) => summary.skipped += 1,
            }
        }

        tx.commit()?;
        Ok(summary)
    }

    /// Distinct database ids, sorted.
    pub fn databases(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT database_id FROM queries ORDER BY database_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn load_database(&self, database_id: &str) -> Result<Vec<QueryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT database_id, query_number, title, sql_text, updated_at
             FROM queries WHERE database_id = ?1 ORDER BY query_number",
        )?;
        let records = stmt
            .query_map([database_id], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn load_all(&self) -> Result<Vec<QueryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT database_id, query_number, title, sql_text, updated_at
             FROM queries ORDER BY database_id, query_number",
        )?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn load(&self, database_id: &str, query_number: u32) -> Result<Option<QueryRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT database_id, query_number, title, sql_text, updated_at
                 FROM queries WHERE database_id = ?1 AND query_number = ?2",
                params![database_id, query_number],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queries", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Compare-and-swap overwrite of `sql_text`. Returns false, and changes
    /// nothing, when the stored text is no longer `expected`.
    pub fn overwrite_sql(
        &self,
        database_id: &str,
        query_number: u32,
        expected: &str,
        new_text: &str,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE queries SET sql_text = ?4, updated_at = ?5
             WHERE database_id = ?1 AND query_number = ?2 AND sql_text = ?3",
            params![database_id, query_number, expected, new_text, Utc::now()],
        )?;
        Ok(changed == 1)
    }

    // =========================================================================
    // Attempt log
    // =========================================================================

    pub fn record_attempts(&self, attempts: &[AttemptRecord]) -> Result<()> {
        if attempts.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO repair_attempts
                    (run_id, database_id, query_number, attempt_number, rule_applied,
                     category, success, outcome, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for a in attempts {
                stmt.execute(params![
                    a.run_id.to_string(),
                    a.database_id,
                    a.query_number,
                    a.attempt_number,
                    a.rule_applied,
                    a.category,
                    a.success,
                    a.outcome,
                    a.recorded_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent `limit` attempts, optionally for one database, oldest first.
    pub fn attempts(&self, database_id: Option<&str>, limit: usize) -> Result<Vec<AttemptRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, database_id, query_number, attempt_number, rule_applied,
                    category, success, outcome, recorded_at
             FROM repair_attempts
             WHERE ?1 IS NULL OR database_id = ?1
             ORDER BY seq DESC
             LIMIT ?2",
        )?;
        let mut attempts = stmt
            .query_map(params![database_id, limit as i64], attempt_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        attempts.reverse();
        Ok(attempts)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<QueryRecord> {
    Ok(QueryRecord {
        database_id: row.get(0)?,
        query_number: row.get(1)?,
        title: row.get(2)?,
        sql_text: row.get(3)?,
        updated_at: row.get::<_, Option<DateTime<Utc>>>(4)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<AttemptRecord> {
    let run_id: String = row.get(0)?;
    Ok(AttemptRecord {
        run_id: Uuid::parse_str(&run_id).unwrap_or_else(|_| Uuid::nil()),
        database_id: row.get(1)?,
        query_number: row.get(2)?,
        attempt_number: row.get(3)?,
        rule_applied: row.get(4)?,
        category: row.get(5)?,
        success: row.get(6)?,
        outcome: row.get(7)?,
        recorded_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> CorpusStore {
        let mut store = CorpusStore::open_in_memory().unwrap();
        store
            .import(
                &[
                    QueryRecord::new("db-2", 1, "a", "SELECT 1"),
                    QueryRecord::new("db-1", 2, "b", "SELECT 2"),
                    QueryRecord::new("db-1", 1, "c", "SELECT 3"),
                ],
                false,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_import_skips_existing_unless_replace() {
        let mut store = seeded();
        let again = [QueryRecord::new("db-1", 1, "c", "SELECT 30")];

        let summary = store.import(&again, false).unwrap();
        assert_eq!(summary, ImportSummary { inserted: 0, replaced: 0, skipped: 1 });
        assert_eq!(store.load("db-1", 1).unwrap().unwrap().sql_text, "SELECT 3");

        let summary = store.import(&again, true).unwrap();
        assert_eq!(summary.replaced, 1);
        assert_eq!(store.load("db-1", 1).unwrap().unwrap().sql_text, "SELECT 30");
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_databases_and_ordering() {
        let store = seeded();
        assert_eq!(store.databases().unwrap(), vec!["db-1", "db-2"]);
        let numbers: Vec<u32> = store
            .load_database("db-1")
            .unwrap()
            .iter()
            .map(|r| r.query_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(store.load("db-9", 1).unwrap().is_none());
    }

    #[test]
    fn test_overwrite_is_compare_and_swap() {
        let store = seeded();
        assert!(store.overwrite_sql("db-1", 2, "SELECT 2", "SELECT 22").unwrap());
        // A second writer holding the stale original loses.
        assert!(!store.overwrite_sql("db-1", 2, "SELECT 2", "SELECT 99").unwrap());
        let record = store.load("db-1", 2).unwrap().unwrap();
        assert_eq!(record.sql_text, "SELECT 22");
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_attempt_log_round_trip() {
        let store = seeded();
        let run_id = Uuid::new_v4();
        let attempts: Vec<AttemptRecord> = (1..=3)
            .map(|n| AttemptRecord {
                run_id,
                database_id: if n == 3 { "db-2" } else { "db-1" }.to_string(),
                query_number: 1,
                attempt_number: n,
                rule_applied: Some("extend_group_by".to_string()),
                category: Some("group_by_violation".to_string()),
                success: n == 2,
                outcome: "fix_applied".to_string(),
                recorded_at: Utc::now(),
            })
            .collect();
        store.record_attempts(&attempts).unwrap();

        let all = store.attempts(None, 10).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].attempt_number, 1);
        assert_eq!(all[0].run_id, run_id);

        let db1 = store.attempts(Some("db-1"), 1).unwrap();
        assert_eq!(db1.len(), 1);
        assert_eq!(db1[0].attempt_number, 2);
        assert!(db1[0].success);
    }

    #[test]
    fn test_open_on_disk_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".sqlrepair").join("corpus.db");
        {
            let mut store = CorpusStore::open(&path).unwrap();
            store
                .import(&[QueryRecord::new("db-1", 1, "", "SELECT 1")], false)
                .unwrap();
        }
        let reopened = CorpusStore::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
