//! Live database boundary.
//!
//! The repair loop only ever talks to a [`LiveDatabase`]: run a statement
//! with a bounded fetch, roll back, read schema metadata. Errors come back
//! typed so the loop can tell a defect in the query apart from a broken
//! connection.

pub mod postgres;
pub mod sqlite;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure at the live-database boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The database rejected the statement. Goes to the classifier.
    #[error("{message}")]
    Query {
        message: String,
        /// 1-based character offset into the submitted SQL.
        position: Option<usize>,
        code: Option<String>,
    },
    /// Timeout, authentication, refused or dropped connection. Never
    /// consumes retry budget.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl ExecError {
    pub fn query(message: impl Into<String>) -> Self {
        ExecError::Query {
            message: message.into(),
            position: None,
            code: None,
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, ExecError::Infrastructure(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Postgres => "postgres",
            Backend::Sqlite => "sqlite",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of schema metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub table: String,
    pub column: String,
    pub data_type: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub statement: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            statement: Duration::from_secs(30),
        }
    }
}

pub trait LiveDatabase: Send {
    fn backend(&self) -> Backend;

    /// Execute `sql` inside a transaction and fetch at most `max_rows` rows.
    /// Returns the number of rows fetched. The transaction is left for
    /// [`LiveDatabase::rollback`].
    fn probe(&mut self, sql: &str, max_rows: usize) -> Result<usize, ExecError>;

    /// Roll back whatever `probe` left open. A no-op outside a transaction.
    fn rollback(&mut self) -> Result<(), ExecError>;

    /// Every `(table, column, type)` visible to the connection, from a single
    /// metadata query.
    fn schema_columns(&mut self) -> Result<Vec<ColumnInfo>, ExecError>;
}

/// Open a connection for `database_id`. `{database}` in `dsn` is replaced by
/// the id.
pub fn connect(
    backend: Backend,
    dsn: &str,
    database_id: &str,
    timeouts: Timeouts,
) -> Result<Box<dyn LiveDatabase>, ExecError> {
    let dsn = dsn.replace("{database}", database_id);
    tracing::debug!(backend = %backend, database = database_id, "connecting");
    match backend {
        Backend::Postgres => Ok(Box::new(postgres::PostgresDatabase::connect(&dsn, timeouts)?)),
        Backend::Sqlite => Ok(Box::new(sqlite::SqliteDatabase::open(&dsn, timeouts)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_substitutes_database_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db-7.sqlite");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (id INTEGER)")
            .unwrap();

        let template = dir.path().join("{database}.sqlite");
        let mut db = connect(
            Backend::Sqlite,
            template.to_str().unwrap(),
            "db-7",
            Timeouts::default(),
        )
        .unwrap();
        assert_eq!(db.backend(), Backend::Sqlite);
        assert_eq!(db.schema_columns().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_sqlite_file_is_infrastructure() {
        let err = connect(
            Backend::Sqlite,
            "/nonexistent/dir/{database}.sqlite",
            "db-1",
            Timeouts::default(),
        )
        .err()
        .unwrap();
        assert!(err.is_infrastructure());
    }
}
