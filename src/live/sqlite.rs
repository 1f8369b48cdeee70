//! SQLite live backend.

use std::path::Path;
use std::time::Instant;

use rusqlite::{ffi::ErrorCode, Connection, OpenFlags};

use super::{Backend, ColumnInfo, ExecError, LiveDatabase, Timeouts};

/// Progress handler granularity, in virtual machine instructions.
const PROGRESS_OPS: i32 = 1_000;

pub struct SqliteDatabase {
    conn: Connection,
    timeouts: Timeouts,
}

impl SqliteDatabase {
    /// Open an existing database file read-only. `dsn` is a path, optionally
    /// prefixed with `sqlite://`.
    pub fn open(dsn: &str, timeouts: Timeouts) -> Result<Self, ExecError> {
        let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
        let conn = Connection::open_with_flags(
            Path::new(path),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ExecError::Infrastructure(format!("cannot open {}: {}", path, e)))?;
        Self::from_connection(conn, timeouts)
    }

    /// Wrap an already open connection (in-memory databases in tests).
    pub fn from_connection(conn: Connection, timeouts: Timeouts) -> Result<Self, ExecError> {
        conn.busy_timeout(timeouts.connect).map_err(map_error)?;
        Ok(Self { conn, timeouts })
    }

    fn fetch(&self, sql: &str, max_rows: usize) -> Result<usize, ExecError> {
        self.conn.execute_batch("BEGIN").map_err(map_error)?;
        let statement = sql.trim().trim_end_matches(';').trim_end();
        let mut stmt = self.conn.prepare(statement).map_err(map_error)?;
        let mut rows = stmt.query([]).map_err(map_error)?;

        let mut fetched = 0;
        while fetched < max_rows {
            match rows.next().map_err(map_error)? {
                Some(_) => fetched += 1,
                None => break,
            }
        }
        Ok(fetched)
    }

    /// Run `f` with the statement deadline armed; SQLite interrupts the
    /// statement once it passes.
    fn bounded<T>(&self, f: impl FnOnce(&Self) -> Result<T, ExecError>) -> Result<T, ExecError> {
        let deadline = Instant::now() + self.timeouts.statement;
        self.conn
            .progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
        let result = f(self);
        self.conn.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
        result
    }

    fn read_columns(&self) -> Result<Vec<ColumnInfo>, ExecError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.name, p.name, p.type
                 FROM sqlite_master m
                 JOIN pragma_table_info(m.name) p
                 WHERE m.type IN ('table', 'view') AND m.name NOT LIKE 'sqlite_%'
                 ORDER BY m.name, p.cid",
            )
            .map_err(map_error)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    table: row.get(0)?,
                    column: row.get(1)?,
                    data_type: row.get(2)?,
                })
            })
            .map_err(map_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_error)?;
        Ok(columns)
    }
}

impl LiveDatabase for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn probe(&mut self, sql: &str, max_rows: usize) -> Result<usize, ExecError> {
        self.bounded(|db| db.fetch(sql, max_rows))
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK").map_err(map_error)
    }

    fn schema_columns(&mut self) -> Result<Vec<ColumnInfo>, ExecError> {
        self.bounded(Self::read_columns)
    }
}

fn map_error(err: rusqlite::Error) -> ExecError {
    let infrastructure = matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::OperationInterrupted
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::PermissionDenied
                | ErrorCode::SystemIoFailure
                | ErrorCode::OutOfMemory
        )
    );
    if infrastructure {
        return ExecError::Infrastructure(err.to_string());
    }

    let code = err.sqlite_error_code().map(|c| format!("{:?}", c));
    let message = match &err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg.clone(),
        other => other.to_string(),
    };
    ExecError::Query {
        message,
        position: None,
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn shop() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL);
             INSERT INTO customers VALUES (1, 'a'), (2, 'b'), (3, 'c');",
        )
        .unwrap();
        SqliteDatabase::from_connection(conn, Timeouts::default()).unwrap()
    }

    #[test]
    fn test_probe_bounds_fetch() {
        let mut db = shop();
        assert_eq!(db.probe("SELECT * FROM customers;", 2).unwrap(), 2);
        db.rollback().unwrap();
        assert_eq!(db.probe("SELECT * FROM customers", 10).unwrap(), 3);
        db.rollback().unwrap();
    }

    #[test]
    fn test_probe_rolls_back_side_effects() {
        let mut db = shop();
        db.probe("DELETE FROM customers", 10).unwrap();
        db.rollback().unwrap();
        assert_eq!(db.probe("SELECT * FROM customers", 10).unwrap(), 3);
        db.rollback().unwrap();
    }

    #[test]
    fn test_query_error_carries_message() {
        let mut db = shop();
        let err = db.probe("SELECT nme FROM customers", 10).unwrap_err();
        db.rollback().unwrap();
        match err {
            ExecError::Query { message, .. } => assert!(message.contains("no such column: nme")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_statement_timeout_is_infrastructure() {
        let conn = Connection::open_in_memory().unwrap();
        let mut db = SqliteDatabase::from_connection(
            conn,
            Timeouts {
                connect: Duration::from_secs(1),
                statement: Duration::from_millis(0),
            },
        )
        .unwrap();
        let err = db
            .probe(
                "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n) SELECT count(*) FROM n",
                1,
            )
            .unwrap_err();
        assert!(err.is_infrastructure(), "{:?}", err);
        db.rollback().unwrap();
    }

    #[test]
    fn test_schema_read_honours_statement_timeout() {
        let conn = Connection::open_in_memory().unwrap();
        for t in 0..50 {
            conn.execute_batch(&format!(
                "CREATE TABLE t{t} (a INTEGER, b TEXT, c REAL, d TEXT, e INTEGER);"
            ))
            .unwrap();
        }
        let mut db = SqliteDatabase::from_connection(
            conn,
            Timeouts {
                connect: Duration::from_secs(1),
                statement: Duration::from_millis(0),
            },
        )
        .unwrap();
        let err = db.schema_columns().unwrap_err();
        assert!(err.is_infrastructure(), "{:?}", err);
    }

    #[test]
    fn test_schema_columns() {
        let mut db = shop();
        let columns = db.schema_columns().unwrap();
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[0].table, "customers");
        assert_eq!(columns[0].column, "id");
        assert_eq!(columns[0].data_type, "INTEGER");
    }
}
