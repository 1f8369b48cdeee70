//! Transition sinks.
//!
//! The session emits one [`Transition`] per state change. Tracing output is
//! produced by the session itself; sinks decide where the structured record
//! goes.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::RepairState;
use crate::eventlog;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub run_id: Uuid,
    pub query_id: String,
    pub state: RepairState,
    /// Executions so far.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub trait TransitionSink {
    fn record(&mut self, transition: &Transition);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl TransitionSink for NullSink {
    fn record(&mut self, _transition: &Transition) {}
}

/// Keeps transitions in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub transitions: Vec<Transition>,
}

impl MemorySink {
    pub fn states(&self) -> Vec<RepairState> {
        self.transitions.iter().map(|t| t.state).collect()
    }

    pub fn count(&self, state: RepairState) -> usize {
        self.transitions.iter().filter(|t| t.state == state).count()
    }
}

impl TransitionSink for MemorySink {
    fn record(&mut self, transition: &Transition) {
        self.transitions.push(transition.clone());
    }
}

/// Appends to the corpus database's `eventlog` table. Write failures are
/// logged and otherwise ignored.
pub struct EventLogSink<'a> {
    conn: &'a Connection,
}

impl<'a> EventLogSink<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl TransitionSink for EventLogSink<'_> {
    fn record(&mut self, transition: &Transition) {
        let data = match serde_json::to_value(transition) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize transition");
                return;
            }
        };
        let event_type = format!("repair.{}", transition.state.as_str());
        if let Err(e) = eventlog::insert_event(
            self.conn,
            &event_type,
            &transition.timestamp.to_rfc3339(),
            &transition.query_id,
            &data,
        ) {
            tracing::warn!(error = %e, query = %transition.query_id, "failed to write eventlog");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventlog_sink_writes_rows() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(eventlog::SCHEMA).unwrap();
        let mut sink = EventLogSink::new(&conn);
        sink.record(&Transition {
            run_id: Uuid::nil(),
            query_id: "db-1#4".to_string(),
            state: RepairState::FixApplied,
            attempt: 2,
            category: Some("missing_column".to_string()),
            rules: vec!["resolve_missing_column".to_string()],
            detail: None,
            timestamp: Utc::now(),
        });

        let events = eventlog::events_for(&conn, "db-1#4").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "repair.fix_applied");
        assert_eq!(events[0].data["rules"][0], "resolve_missing_column");
        assert_eq!(events[0].data["state"], "fix_applied");
    }
}
