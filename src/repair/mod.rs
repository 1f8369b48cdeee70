//! Iterative repair loop.
//!
//! ```text
//! Pending -> Executing -> Succeeded
//!                 |
//!                 v
//!            Classifying -> Unfixable | Exhausted
//!                 |
//!                 v
//!            FixApplied -> Executing ...
//! ```
//!
//! A query is executed against a live database, the error classified, the
//! matching rewrites applied, and the result executed again. Only text that
//! executed successfully is written back to the corpus. `Unfixable` and
//! `Exhausted` are outcomes, not errors; a [`RepairError`] means the run
//! itself could not continue.

mod session;
pub mod sink;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::corpus::{CorpusStore, QueryRecord};
use crate::live::ExecError;
use crate::rules::{self, DatabaseRules};

pub use session::RepairSession;
pub use sink::{EventLogSink, MemorySink, NullSink, Transition, TransitionSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairState {
    Pending,
    Executing,
    Classifying,
    FixApplied,
    Succeeded,
    Unfixable,
    Exhausted,
    Cancelled,
}

impl RepairState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairState::Pending => "pending",
            RepairState::Executing => "executing",
            RepairState::Classifying => "classifying",
            RepairState::FixApplied => "fix_applied",
            RepairState::Succeeded => "succeeded",
            RepairState::Unfixable => "unfixable",
            RepairState::Exhausted => "exhausted",
            RepairState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RepairState::Succeeded
                | RepairState::Unfixable
                | RepairState::Exhausted
                | RepairState::Cancelled
        )
    }
}

impl std::fmt::Display for RepairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairConfig {
    /// Retry ceiling, counted in executions.
    pub max_attempts: usize,
    /// Rows fetched per probe.
    pub fetch_rows: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            fetch_rows: 10,
        }
    }
}

/// Shared cancel flag plus an optional deadline. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(budget: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(budget),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Error)]
pub enum RepairError {
    /// Connectivity, timeout or authentication failure. Aborts the run.
    #[error("infrastructure failure ({context}): {message}")]
    Infrastructure { context: String, message: String },
    #[error("corpus store failure: {0:#}")]
    Store(anyhow::Error),
}

impl RepairError {
    pub fn infrastructure(context: &str, error: ExecError) -> Self {
        let message = match error {
            ExecError::Infrastructure(message) => message,
            ExecError::Query { message, .. } => message,
        };
        RepairError::Infrastructure {
            context: context.to_string(),
            message,
        }
    }
}

/// One row of the `repair_attempts` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub run_id: Uuid,
    pub database_id: String,
    pub query_number: u32,
    pub attempt_number: u32,
    pub rule_applied: Option<String>,
    pub category: Option<String>,
    pub success: bool,
    pub outcome: String,
    pub recorded_at: DateTime<Utc>,
}

/// Terminal result for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub query_id: String,
    pub database_id: String,
    pub query_number: u32,
    pub state: RepairState,
    pub executions: u32,
    pub final_sql: String,
    /// Static and error-driven rule ids, in application order.
    pub rules_applied: Vec<String>,
    pub categories: Vec<String>,
    /// Whether the corpus row was overwritten.
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub succeeded: usize,
    pub unfixable: usize,
    pub exhausted: usize,
    pub cancelled: usize,
    pub persisted: usize,
    pub executions: usize,
}

impl RepairSummary {
    pub fn add(&mut self, outcome: &RepairOutcome) {
        match outcome.state {
            RepairState::Succeeded => self.succeeded += 1,
            RepairState::Unfixable => self.unfixable += 1,
            RepairState::Exhausted => self.exhausted += 1,
            RepairState::Cancelled => self.cancelled += 1,
            _ => {}
        }
        if outcome.persisted {
            self.persisted += 1;
        }
        self.executions += outcome.executions as usize;
    }

    pub fn merge(&mut self, other: &RepairSummary) {
        self.succeeded += other.succeeded;
        self.unfixable += other.unfixable;
        self.exhausted += other.exhausted;
        self.cancelled += other.cancelled;
        self.persisted += other.persisted;
        self.executions += other.executions;
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.unfixable + self.exhausted + self.cancelled
    }

    /// Exit status rule: no `Exhausted` or `Cancelled`, and no `Unfixable`
    /// in strict mode.
    pub fn exit_ok(&self, strict: bool) -> bool {
        self.exhausted == 0 && self.cancelled == 0 && !(strict && self.unfixable > 0)
    }
}

/// What a batch run covers and whether static rules go first.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Restrict to these query numbers. Empty selects all.
    pub queries: Vec<u32>,
    pub skip_static: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DatabaseReport {
    pub database_id: String,
    pub outcomes: Vec<RepairOutcome>,
    pub summary: RepairSummary,
}

/// Repair every selected query of one database, sequentially.
///
/// Static rules (structural, then database-specific) run first unless
/// skipped; their output is the loop's starting text but is only persisted
/// if the loop verifies it.
pub fn run_database(
    session: &mut RepairSession<'_>,
    store: &CorpusStore,
    database_id: &str,
    database_rules: &DatabaseRules,
    options: &BatchOptions,
) -> Result<DatabaseReport, RepairError> {
    let records = store
        .load_database(database_id)
        .map_err(RepairError::Store)?;
    let selected: Vec<&QueryRecord> = records
        .iter()
        .filter(|r| options.queries.is_empty() || options.queries.contains(&r.query_number))
        .collect();
    tracing::info!(database = database_id, queries = selected.len(), "repairing database");

    let mut report = DatabaseReport {
        database_id: database_id.to_string(),
        ..Default::default()
    };
    for record in selected {
        let outcome = if options.skip_static {
            session.repair_query(record, store)?
        } else {
            let fix = rules::fix_static(database_id, &record.sql_text, database_rules);
            session.repair_from(record, &fix.text, &fix.applied, store)?
        };
        report.summary.add(&outcome);
        report.outcomes.push(outcome);
    }
    Ok(report)
}
