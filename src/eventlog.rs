//! Append-only eventlog in the corpus database.
//!
//! One row per repair state transition. Advisory telemetry: nothing in the
//! engine reads it back to make decisions.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

pub const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS eventlog (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- Global ordering
        event_type TEXT NOT NULL,               -- e.g. 'repair.fix_applied'
        timestamp TEXT NOT NULL,                -- RFC 3339
        source_id TEXT NOT NULL,                -- query id, e.g. 'db-3#12'
        data TEXT NOT NULL,                     -- Event-specific JSON payload
        CHECK(json_valid(data))
    );

    CREATE INDEX IF NOT EXISTS idx_eventlog_type ON eventlog(event_type);
    CREATE INDEX IF NOT EXISTS idx_eventlog_source ON eventlog(source_id);
"#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub seq: i64,
    pub event_type: String,
    pub timestamp: String,
    pub source_id: String,
    pub data: serde_json::Value,
}

/// Insert one event and return its sequence number.
pub fn insert_event(
    conn: &Connection,
    event_type: &str,
    timestamp: &str,
    source_id: &str,
    data: &serde_json::Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO eventlog (event_type, timestamp, source_id, data)
         VALUES (?1, ?2, ?3, ?4)",
        params![event_type, timestamp, source_id, data.to_string()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Events for one source, oldest first.
pub fn events_for(conn: &Connection, source_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT seq, event_type, timestamp, source_id, data
         FROM eventlog WHERE source_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map([source_id], |row| {
        let data: String = row.get(4)?;
        Ok(Event {
            seq: row.get(0)?,
            event_type: row.get(1)?,
            timestamp: row.get(2)?,
            source_id: row.get(3)?,
            data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_read_back() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();

        let first = insert_event(
            &conn,
            "repair.pending",
            "2026-01-01T00:00:00Z",
            "db-1#1",
            &serde_json::json!({"attempt": 0}),
        )
        .unwrap();
        let second = insert_event(
            &conn,
            "repair.executing",
            "2026-01-01T00:00:01Z",
            "db-1#1",
            &serde_json::json!({"attempt": 1}),
        )
        .unwrap();
        assert!(second > first);

        let events = events_for(&conn, "db-1#1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "repair.executing");
        assert_eq!(events[1].data["attempt"], 1);
    }
}
