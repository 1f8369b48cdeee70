//! PostgreSQL live backend.
//!
//! Each probe runs as `BEGIN; SET LOCAL statement_timeout; DECLARE ...
//! CURSOR FOR <query>; FETCH n`, so only `n` rows ever cross the wire. The
//! caller rolls the transaction back afterwards. The schema read runs under
//! the same timeout in its own transaction.

use ::postgres::error::{DbError, ErrorPosition};
use ::postgres::{Client, Config, NoTls};

use super::{Backend, ColumnInfo, ExecError, LiveDatabase, Timeouts};

const CURSOR_NAME: &str = "sqlrepair_probe";

/// SQLSTATE classes that mean the connection or server is unusable rather
/// than the statement being wrong.
const INFRASTRUCTURE_CLASSES: &[&str] = &["08", "28", "53", "57", "58", "XX"];

pub struct PostgresDatabase {
    client: Client,
    timeouts: Timeouts,
}

impl PostgresDatabase {
    pub fn connect(dsn: &str, timeouts: Timeouts) -> Result<Self, ExecError> {
        let mut config: Config = dsn
            .parse()
            .map_err(|e| ExecError::Infrastructure(format!("invalid dsn: {}", e)))?;
        config.connect_timeout(timeouts.connect);
        let client = config
            .connect(NoTls)
            .map_err(|e| ExecError::Infrastructure(format!("connect failed: {}", e)))?;
        Ok(Self { client, timeouts })
    }
}

impl LiveDatabase for PostgresDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn probe(&mut self, sql: &str, max_rows: usize) -> Result<usize, ExecError> {
        self.client
            .batch_execute("BEGIN")
            .map_err(|e| map_error(e, 0))?;
        self.client
            .batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                self.timeouts.statement.as_millis()
            ))
            .map_err(|e| map_error(e, 0))?;

        let (declare, offset) = declare_cursor(sql);
        self.client
            .batch_execute(&declare)
            .map_err(|e| map_error(e, offset))?;

        let rows = self
            .client
            .query(&format!("FETCH {} FROM {}", max_rows, CURSOR_NAME), &[])
            .map_err(|e| map_error(e, 0))?;
        Ok(rows.len())
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        self.client
            .batch_execute("ROLLBACK")
            .map_err(|e| map_error(e, 0))
    }

    fn schema_columns(&mut self) -> Result<Vec<ColumnInfo>, ExecError> {
        self.client
            .batch_execute(&format!(
                "BEGIN; SET LOCAL statement_timeout = {}",
                self.timeouts.statement.as_millis()
            ))
            .map_err(|e| map_error(e, 0))?;
        let result = self.client.query(
            "SELECT table_name::text, column_name::text, data_type::text
             FROM information_schema.columns
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema')
             ORDER BY table_name, ordinal_position",
            &[],
        );
        let rolled_back = self.client.batch_execute("ROLLBACK");
        let rows = result.map_err(|e| map_error(e, 0))?;
        rolled_back.map_err(|e| map_error(e, 0))?;
        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                table: row.get(0),
                column: row.get(1),
                data_type: row.get(2),
            })
            .collect())
    }
}

/// The cursor declaration for `sql` and the number of characters it puts in
/// front of the caller's text. Leading whitespace is kept so server
/// positions line up with the stored text.
fn declare_cursor(sql: &str) -> (String, usize) {
    let prefix = format!("DECLARE {} NO SCROLL CURSOR FOR ", CURSOR_NAME);
    let statement = sql.trim_end().trim_end_matches(';').trim_end();
    let offset = prefix.chars().count();
    (format!("{}{}", prefix, statement), offset)
}

/// Server position (1-based, in the declared text) back to a 1-based
/// position in the caller's SQL.
fn caller_position(server: u32, offset: usize) -> Option<usize> {
    (server as usize).checked_sub(offset).filter(|p| *p > 0)
}

/// `offset` is the length, in characters, of any text prepended to the
/// caller's SQL; reported positions are shifted back by it.
fn map_error(err: ::postgres::Error, offset: usize) -> ExecError {
    if err.is_closed() {
        return ExecError::Infrastructure(format!("connection closed: {}", err));
    }
    let Some(db) = err.as_db_error() else {
        return ExecError::Infrastructure(err.to_string());
    };

    let code = db.code().code();
    if code
        .get(..2)
        .is_some_and(|class| INFRASTRUCTURE_CLASSES.contains(&class))
    {
        return ExecError::Infrastructure(format!("{} ({})", db.message(), code));
    }

    ExecError::Query {
        message: render_message(db),
        position: match db.position() {
            Some(ErrorPosition::Original(p)) => caller_position(*p, offset),
            _ => None,
        },
        code: Some(code.to_string()),
    }
}

/// Message plus DETAIL and HINT lines, the way psql prints them. The
/// classifier reads hints such as "Perhaps you meant to reference ...".
fn render_message(db: &DbError) -> String {
    let mut message = db.message().to_string();
    if let Some(detail) = db.detail() {
        message.push_str("\nDETAIL:  ");
        message.push_str(detail);
    }
    if let Some(hint) = db.hint() {
        message.push_str("\nHINT:  ");
        message.push_str(hint);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1-based position of `needle` in `haystack`, counted in characters.
    fn char_position(haystack: &str, needle: &str) -> u32 {
        let byte = haystack.find(needle).unwrap();
        haystack[..byte].chars().count() as u32 + 1
    }

    #[test]
    fn test_declare_keeps_leading_whitespace() {
        let sql = "\n    SELECT id FROM customers c JOIN orders o ON o.customer_id = c.id;\n";
        let (declare, offset) = declare_cursor(sql);
        assert!(declare.ends_with("c.id"));

        let server = char_position(&declare, "id FROM");
        assert_eq!(
            caller_position(server, offset),
            Some(char_position(sql, "id FROM") as usize)
        );
    }

    #[test]
    fn test_position_inside_prefix_is_dropped() {
        let (declare, offset) = declare_cursor("SELECT 1");
        assert_eq!(caller_position(char_position(&declare, "CURSOR"), offset), None);
        assert_eq!(caller_position(offset as u32 + 1, offset), Some(1));
    }
}
