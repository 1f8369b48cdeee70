//! One repair session: a live connection, its schema snapshot, and the
//! execute -> classify -> fix loop for each query.

use chrono::Utc;
use uuid::Uuid;

use super::sink::{Transition, TransitionSink};
use super::{AttemptRecord, CancelToken, RepairConfig, RepairError, RepairOutcome, RepairState};
use crate::classify::{self, ErrorCategory};
use crate::corpus::{CorpusStore, QueryRecord};
use crate::live::{ExecError, LiveDatabase};
use crate::rules;
use crate::schema::{self, SchemaSnapshot};

pub struct RepairSession<'a> {
    db: &'a mut dyn LiveDatabase,
    sink: &'a mut dyn TransitionSink,
    schema: SchemaSnapshot,
    config: RepairConfig,
    cancel: CancelToken,
    run_id: Uuid,
}

/// Mutable state of one query's pass through the loop.
struct Working {
    query_id: String,
    text: String,
    executions: u32,
    rules: Vec<String>,
    categories: Vec<String>,
    attempts: Vec<AttemptRecord>,
}

impl<'a> RepairSession<'a> {
    /// Take the schema snapshot and start a session. Fails when the
    /// metadata query does.
    pub fn new(
        db: &'a mut dyn LiveDatabase,
        sink: &'a mut dyn TransitionSink,
        config: RepairConfig,
        cancel: CancelToken,
    ) -> Result<Self, RepairError> {
        let schema = schema::snapshot(db).map_err(|e| RepairError::infrastructure("schema snapshot", e))?;
        Ok(Self::with_schema(db, sink, schema, config, cancel))
    }

    pub fn with_schema(
        db: &'a mut dyn LiveDatabase,
        sink: &'a mut dyn TransitionSink,
        schema: SchemaSnapshot,
        config: RepairConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            db,
            sink,
            schema,
            config,
            cancel,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn schema(&self) -> &SchemaSnapshot {
        &self.schema
    }

    /// Repair the stored text of `record`.
    pub fn repair_query(
        &mut self,
        record: &QueryRecord,
        store: &CorpusStore,
    ) -> Result<RepairOutcome, RepairError> {
        self.repair_from(record, &record.sql_text, &[], store)
    }

    /// Repair starting from `initial` (the stored text after static rules,
    /// which are listed in `static_rules`). Only a verified text is ever
    /// written back, and only over the unchanged stored original.
    pub fn repair_from(
        &mut self,
        record: &QueryRecord,
        initial: &str,
        static_rules: &[String],
        store: &CorpusStore,
    ) -> Result<RepairOutcome, RepairError> {
        let mut work = Working {
            query_id: record.id(),
            text: initial.to_string(),
            executions: 0,
            rules: static_rules.to_vec(),
            categories: Vec::new(),
            attempts: Vec::new(),
        };

        let result = self.run(record, &mut work, store);
        store
            .record_attempts(&work.attempts)
            .map_err(RepairError::Store)?;
        result
    }

    fn run(
        &mut self,
        record: &QueryRecord,
        work: &mut Working,
        store: &CorpusStore,
    ) -> Result<RepairOutcome, RepairError> {
        self.emit(work, RepairState::Pending, None, Vec::new(), None);

        if work.text.trim().is_empty() {
            self.log_attempt(work, None, None, false, RepairState::Unfixable);
            return Ok(self.finish(record, work, RepairState::Unfixable, Some("empty query text")));
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.finish(record, work, RepairState::Cancelled, None));
            }

            work.executions += 1;
            self.emit(work, RepairState::Executing, None, Vec::new(), None);
            let result = self.db.probe(&work.text, self.config.fetch_rows);
            let rolled_back = self.db.rollback();

            let (message, position) = match result {
                Ok(rows) => {
                    rolled_back.map_err(|e| RepairError::infrastructure(&work.query_id, e))?;
                    tracing::debug!(query = %work.query_id, rows, "probe succeeded");
                    return self.succeed(record, work, store);
                }
                Err(ExecError::Infrastructure(message)) => {
                    return Err(RepairError::Infrastructure {
                        context: work.query_id.clone(),
                        message,
                    });
                }
                Err(ExecError::Query {
                    message, position, ..
                }) => {
                    rolled_back.map_err(|e| RepairError::infrastructure(&work.query_id, e))?;
                    (message, position)
                }
            };

            self.emit(work, RepairState::Classifying, None, Vec::new(), Some(&message));
            let Some(classification) = classify::classify(&message) else {
                self.log_attempt(work, None, Some(ErrorCategory::Unclassified.as_str()), false, RepairState::Unfixable);
                return Ok(self.finish(record, work, RepairState::Unfixable, Some(&message)));
            };
            let classification = classification.with_position(position);
            let label = classification.label();
            for category in classification.categories() {
                if !work.categories.iter().any(|c| c == category.as_str()) {
                    work.categories.push(category.as_str().to_string());
                }
            }

            if work.executions as usize >= self.config.max_attempts {
                self.log_attempt(work, None, Some(&label), false, RepairState::Exhausted);
                return Ok(self.finish(record, work, RepairState::Exhausted, Some(&message)));
            }

            let fix = rules::apply_error_fixes(&work.text, &classification, &self.schema);
            if fix.text == work.text {
                self.log_attempt(work, None, Some(&label), false, RepairState::Unfixable);
                return Ok(self.finish(record, work, RepairState::Unfixable, Some("no rule changed the text")));
            }

            work.text = fix.text;
            work.rules.extend(fix.applied.iter().cloned());
            let applied = fix.applied.join(",");
            self.log_attempt(work, Some(&applied), Some(&label), false, RepairState::FixApplied);
            self.emit(work, RepairState::FixApplied, Some(label), fix.applied, None);
        }
    }

    fn succeed(
        &mut self,
        record: &QueryRecord,
        work: &mut Working,
        store: &CorpusStore,
    ) -> Result<RepairOutcome, RepairError> {
        let persisted = if work.text != record.sql_text {
            let swapped = store
                .overwrite_sql(&record.database_id, record.query_number, &record.sql_text, &work.text)
                .map_err(RepairError::Store)?;
            if !swapped {
                tracing::warn!(query = %work.query_id, "stored text changed during repair; not overwritten");
            }
            swapped
        } else {
            false
        };

        self.log_attempt(work, None, None, true, RepairState::Succeeded);
        let mut outcome = self.finish(record, work, RepairState::Succeeded, None);
        outcome.persisted = persisted;
        Ok(outcome)
    }

    fn finish(
        &mut self,
        record: &QueryRecord,
        work: &Working,
        state: RepairState,
        reason: Option<&str>,
    ) -> RepairOutcome {
        self.emit(work, state, None, Vec::new(), reason);
        RepairOutcome {
            query_id: work.query_id.clone(),
            database_id: record.database_id.clone(),
            query_number: record.query_number,
            state,
            executions: work.executions,
            final_sql: work.text.clone(),
            rules_applied: work.rules.clone(),
            categories: work.categories.clone(),
            persisted: false,
            reason: reason.map(str::to_string),
        }
    }

    fn log_attempt(
        &self,
        work: &mut Working,
        rule: Option<&str>,
        category: Option<&str>,
        success: bool,
        outcome: RepairState,
    ) {
        let (database_id, query_number) = split_query_id(&work.query_id);
        work.attempts.push(AttemptRecord {
            run_id: self.run_id,
            database_id,
            query_number,
            attempt_number: work.executions,
            rule_applied: rule.map(str::to_string),
            category: category.map(str::to_string),
            success,
            outcome: outcome.as_str().to_string(),
            recorded_at: Utc::now(),
        });
    }

    fn emit(
        &mut self,
        work: &Working,
        state: RepairState,
        category: Option<String>,
        rules: Vec<String>,
        detail: Option<&str>,
    ) {
        if state.is_terminal() {
            tracing::info!(query = %work.query_id, state = state.as_str(), executions = work.executions, detail, "repair finished");
        } else {
            tracing::debug!(
                query = %work.query_id,
                state = state.as_str(),
                attempt = work.executions,
                category = category.as_deref(),
                "transition"
            );
        }
        self.sink.record(&Transition {
            run_id: self.run_id,
            query_id: work.query_id.clone(),
            state,
            attempt: work.executions,
            category,
            rules,
            detail: detail.map(str::to_string),
            timestamp: Utc::now(),
        });
    }
}

fn split_query_id(query_id: &str) -> (String, u32) {
    match query_id.rsplit_once('#') {
        Some((database, number)) => (database.to_string(), number.parse().unwrap_or(0)),
        None => (query_id.to_string(), 0),
    }
}
