//! Repair loop state machine against a scripted database and a real
//! in-memory SQLite database.

use std::collections::VecDeque;

use rusqlite::Connection;
use sqlrepair::corpus::{CorpusStore, QueryRecord};
use sqlrepair::eventlog;
use sqlrepair::live::sqlite::SqliteDatabase;
use sqlrepair::live::{Backend, ColumnInfo, ExecError, LiveDatabase, Timeouts};
use sqlrepair::repair::{
    self, BatchOptions, CancelToken, EventLogSink, MemorySink, NullSink, RepairConfig, RepairError,
    RepairSession, RepairState,
};
use sqlrepair::rules::DatabaseRules;
use sqlrepair::schema::{self, SchemaSnapshot};

// =============================================================================
// Scripted database
// =============================================================================

type Responder = fn(usize, &str) -> Result<usize, ExecError>;

/// Replies from `script` first, then from `fallback(execution, sql)`.
struct ScriptedDatabase {
    script: VecDeque<Result<usize, ExecError>>,
    fallback: Responder,
    columns: Vec<ColumnInfo>,
    executed: Vec<String>,
    rollbacks: usize,
}

impl ScriptedDatabase {
    fn new(fallback: Responder) -> Self {
        Self {
            script: VecDeque::new(),
            fallback,
            columns: Vec::new(),
            executed: Vec::new(),
            rollbacks: 0,
        }
    }

    fn then(mut self, reply: Result<usize, ExecError>) -> Self {
        self.script.push_back(reply);
        self
    }

    fn with_columns(mut self, table: &str, columns: &[&str]) -> Self {
        for column in columns {
            self.columns.push(ColumnInfo {
                table: table.to_string(),
                column: column.to_string(),
                data_type: "integer".to_string(),
            });
        }
        self
    }
}

impl LiveDatabase for ScriptedDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn probe(&mut self, sql: &str, _max_rows: usize) -> Result<usize, ExecError> {
        self.executed.push(sql.to_string());
        let execution = self.executed.len();
        self.script
            .pop_front()
            .unwrap_or_else(|| (self.fallback)(execution, sql))
    }

    fn rollback(&mut self) -> Result<(), ExecError> {
        self.rollbacks += 1;
        Ok(())
    }

    fn schema_columns(&mut self) -> Result<Vec<ColumnInfo>, ExecError> {
        Ok(self.columns.clone())
    }
}

/// Every execution fails on `cN` with a hint towards `cN+1`, so each fix
/// makes progress and the loop only stops at the ceiling.
fn always_renamed(execution: usize, _sql: &str) -> Result<usize, ExecError> {
    Err(ExecError::query(format!(
        "column \"c{}\" does not exist\nHINT:  Perhaps you meant to reference the column \"t.c{}\".",
        execution - 1,
        execution
    )))
}

fn always_ok(_execution: usize, _sql: &str) -> Result<usize, ExecError> {
    Ok(1)
}

fn store_with(sql: &str) -> (CorpusStore, QueryRecord) {
    let mut store = CorpusStore::open_in_memory().unwrap();
    let record = QueryRecord::new("db-1", 7, "test query", sql);
    store.import(std::slice::from_ref(&record), false).unwrap();
    (store, record)
}

fn stored_sql(store: &CorpusStore) -> String {
    store.load("db-1", 7).unwrap().unwrap().sql_text
}

// =============================================================================
// State machine properties
// =============================================================================

#[test]
fn test_always_failing_query_executes_exactly_ceiling_times() {
    let (store, record) = store_with("SELECT c0 FROM t");
    let mut db = ScriptedDatabase::new(always_renamed);
    let mut sink = MemorySink::default();

    let outcome = {
        let mut session = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new()).unwrap();
        session.repair_query(&record, &store).unwrap()
    };

    assert_eq!(outcome.state, RepairState::Exhausted);
    assert_eq!(outcome.executions, 5);
    assert_eq!(sink.count(RepairState::Executing), 5);
    assert_eq!(sink.count(RepairState::FixApplied), 4);
    assert_eq!(db.executed.len(), 5);
    assert_eq!(db.rollbacks, 5);
    assert_eq!(db.executed[4], "SELECT c4 FROM t");
    // Exhausted never touches the corpus.
    assert_eq!(stored_sql(&store), "SELECT c0 FROM t");
    assert!(!outcome.persisted);

    let attempts = store.attempts(Some("db-1"), 100).unwrap();
    assert_eq!(attempts.len(), 5);
    assert_eq!(attempts.last().unwrap().outcome, "exhausted");
    assert!(attempts.iter().all(|a| !a.success));
}

#[test]
fn test_ceiling_is_configurable() {
    let (store, record) = store_with("SELECT c0 FROM t");
    let mut db = ScriptedDatabase::new(always_renamed);
    let mut sink = MemorySink::default();
    let config = RepairConfig {
        max_attempts: 2,
        fetch_rows: 10,
    };

    let outcome = RepairSession::new(&mut db, &mut sink, config, CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();
    assert_eq!(outcome.state, RepairState::Exhausted);
    assert_eq!(sink.count(RepairState::Executing), 2);
}

#[test]
fn test_no_progress_is_unfixable_without_reexecution() {
    let (store, record) = store_with("SELECT zzzzzz FROM t");
    // Empty schema and no hint: the missing-column rule has nothing to offer.
    let mut db = ScriptedDatabase::new(|_, _| Err(ExecError::query("column \"zzzzzz\" does not exist")));
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Unfixable);
    assert_eq!(outcome.executions, 1);
    assert_eq!(outcome.categories, vec!["missing_column"]);
    assert_eq!(sink.count(RepairState::Executing), 1);
    assert_eq!(sink.count(RepairState::FixApplied), 0);
    assert_eq!(stored_sql(&store), "SELECT zzzzzz FROM t");
}

#[test]
fn test_unclassified_error_is_unfixable() {
    let (store, record) = store_with("SELECT * FROM secrets");
    let mut db = ScriptedDatabase::new(|_, _| Err(ExecError::query("permission denied for table secrets")));
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Unfixable);
    assert!(outcome.categories.is_empty());
    let attempts = store.attempts(None, 10).unwrap();
    assert_eq!(attempts[0].category.as_deref(), Some("unclassified"));
}

#[test]
fn test_empty_sql_is_unfixable_with_zero_executions() {
    let (store, record) = store_with("   \n ");
    let mut db = ScriptedDatabase::new(always_ok);
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Unfixable);
    assert_eq!(outcome.executions, 0);
    assert!(db.executed.is_empty());
    assert_eq!(sink.states(), vec![RepairState::Pending, RepairState::Unfixable]);

    let attempts = store.attempts(None, 10).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].attempt_number, 0);
    assert_eq!(attempts[0].category, None);
    assert_eq!(attempts[0].outcome, "unfixable");
    assert!(!attempts[0].success);
}

#[test]
fn test_infrastructure_failure_mid_loop_keeps_original() {
    let (store, record) = store_with("SELECT c0 FROM t");
    let mut db = ScriptedDatabase::new(always_ok)
        .then(always_renamed(1, ""))
        .then(Err(ExecError::Infrastructure("connection reset by peer".to_string())));
    let mut sink = MemorySink::default();

    let result = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store);

    match result {
        Err(RepairError::Infrastructure { context, message }) => {
            assert_eq!(context, "db-1#7");
            assert!(message.contains("connection reset"));
        }
        other => panic!("expected infrastructure error, got {:?}", other),
    }
    assert_eq!(db.executed, vec!["SELECT c0 FROM t", "SELECT c1 FROM t"]);
    assert_eq!(stored_sql(&store), "SELECT c0 FROM t");
    // The fix before the failure is still on the audit trail.
    let attempts = store.attempts(None, 10).unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].outcome, "fix_applied");
}

#[test]
fn test_cancelled_before_execution() {
    let (store, record) = store_with("SELECT 1");
    let mut db = ScriptedDatabase::new(always_ok);
    let mut sink = NullSink;
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), cancel)
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Cancelled);
    assert_eq!(outcome.executions, 0);
    assert!(db.executed.is_empty());
}

#[test]
fn test_success_persists_rewritten_text() {
    let (store, record) = store_with("SELECT c0 FROM t");
    let mut db = ScriptedDatabase::new(always_ok).then(always_renamed(1, ""));
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Succeeded);
    assert_eq!(outcome.executions, 2);
    assert!(outcome.persisted);
    assert_eq!(outcome.rules_applied, vec!["resolve_missing_column"]);
    assert_eq!(stored_sql(&store), "SELECT c1 FROM t");
    assert_eq!(
        sink.states(),
        vec![
            RepairState::Pending,
            RepairState::Executing,
            RepairState::Classifying,
            RepairState::FixApplied,
            RepairState::Executing,
            RepairState::Succeeded,
        ]
    );
}

#[test]
fn test_success_without_change_does_not_write() {
    let (store, record) = store_with("SELECT 1");
    let mut db = ScriptedDatabase::new(always_ok);
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Succeeded);
    assert!(!outcome.persisted);
    assert!(outcome.rules_applied.is_empty());
    assert_eq!(stored_sql(&store), "SELECT 1");
    let attempts = store.attempts(None, 10).unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
}

#[test]
fn test_multi_category_rewrites_apply_in_catalogue_order() {
    let (store, record) = store_with("SELECT id, totl FROM orders o JOIN refunds r ON r.id = o.id");
    let mut db = ScriptedDatabase::new(always_ok)
        .with_columns("orders", &["id", "customer_id", "total"])
        .with_columns("refunds", &["id", "total"])
        .then(Err(ExecError::query(
            "column reference \"id\" is ambiguous; column \"totl\" does not exist",
        )));
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Succeeded);
    // Missing column precedes ambiguous column in the catalogue, whatever the
    // order inside the message.
    assert_eq!(outcome.categories, vec!["missing_column", "ambiguous_column"]);
    assert_eq!(
        outcome.rules_applied,
        vec!["resolve_missing_column", "qualify_ambiguous_column"]
    );
    assert_eq!(
        stored_sql(&store),
        "SELECT o.id, total FROM orders o JOIN refunds r ON r.id = o.id"
    );
}

#[test]
fn test_transitions_reach_the_eventlog() {
    let (store, record) = store_with("SELECT c0 FROM t");
    let mut db = ScriptedDatabase::new(always_ok).then(always_renamed(1, ""));
    let mut sink = EventLogSink::new(store.connection());

    RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    let events = eventlog::events_for(store.connection(), "db-1#7").unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "repair.pending",
            "repair.executing",
            "repair.classifying",
            "repair.fix_applied",
            "repair.executing",
            "repair.succeeded",
        ]
    );
    assert_eq!(events[3].data["category"], "missing_column");
}

// =============================================================================
// Live SQLite
// =============================================================================

fn shop() -> SqliteDatabase {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, region TEXT);
         CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, total REAL);
         INSERT INTO customers VALUES (1, 'ada', 'north'), (2, 'bob', 'south');
         INSERT INTO orders VALUES (10, 1, 9.5), (11, 1, 20.0), (12, 2, 3.25);",
    )
    .unwrap();
    SqliteDatabase::from_connection(conn, Timeouts::default()).unwrap()
}

#[test]
fn test_sqlite_snapshot() {
    let mut db = shop();
    let snapshot: SchemaSnapshot = schema::snapshot(&mut db).unwrap();
    assert!(snapshot.has_column("ORDERS", "customer_id"));
    assert_eq!(snapshot.tables_with_column("id"), vec!["customers", "orders"]);
}

#[test]
fn test_sqlite_repairs_misspelled_column() {
    let (store, record) = store_with("SELECT o.custmer_id, COUNT(*) FROM orders o GROUP BY o.custmer_id");
    let mut db = shop();
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Succeeded);
    assert_eq!(outcome.executions, 2);
    assert_eq!(
        stored_sql(&store),
        "SELECT o.customer_id, COUNT(*) FROM orders o GROUP BY o.customer_id"
    );
}

#[test]
fn test_sqlite_qualifies_ambiguous_column() {
    let (store, record) = store_with("SELECT id, total FROM customers c JOIN orders o ON o.customer_id = c.id");
    let mut db = shop();
    let mut sink = MemorySink::default();

    let outcome = RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new())
        .unwrap()
        .repair_query(&record, &store)
        .unwrap();

    assert_eq!(outcome.state, RepairState::Succeeded, "{:?}", outcome.reason);
    assert_eq!(
        stored_sql(&store),
        "SELECT c.id, total FROM customers c JOIN orders o ON o.customer_id = c.id"
    );
}

#[test]
fn test_batch_runs_static_rules_before_the_loop() {
    let mut store = CorpusStore::open_in_memory().unwrap();
    store
        .import(
            &[
                QueryRecord::new(
                    "shop",
                    1,
                    "",
                    "SELECT CASE WHEN total > 10 THEN 'big' THEN 'small' END AS size FROM orders",
                ),
                QueryRecord::new("shop", 2, "", "SELECT nothing_like_it FROM orders"),
                QueryRecord::new("shop", 3, "", "SELECT id FROM orders"),
            ],
            false,
        )
        .unwrap();
    let mut db = shop();
    let mut sink = MemorySink::default();
    let mut session =
        RepairSession::new(&mut db, &mut sink, RepairConfig::default(), CancelToken::new()).unwrap();

    let report = repair::run_database(
        &mut session,
        &store,
        "shop",
        &DatabaseRules::default(),
        &BatchOptions {
            queries: vec![1, 2],
            skip_static: false,
        },
    )
    .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.unfixable, 1);
    assert!(report.summary.exit_ok(false));
    assert!(!report.summary.exit_ok(true));

    let first = &report.outcomes[0];
    assert_eq!(first.executions, 1);
    assert_eq!(first.rules_applied, vec!["case_then_then_to_else"]);
    assert_eq!(
        store.load("shop", 1).unwrap().unwrap().sql_text,
        "SELECT CASE WHEN total > 10 THEN 'big' ELSE 'small' END AS size FROM orders"
    );
    assert_eq!(
        store.load("shop", 2).unwrap().unwrap().sql_text,
        "SELECT nothing_like_it FROM orders"
    );
}
