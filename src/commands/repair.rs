//! `sqlrepair repair` - the iterative loop against a live database.

use anyhow::{bail, Context, Result};
use colored::*;
use rayon::prelude::*;
use std::path::Path;
use std::time::Duration;

use sqlrepair::config::{self, Config};
use sqlrepair::corpus::CorpusStore;
use sqlrepair::live::{self, Backend};
use sqlrepair::repair::{
    self, BatchOptions, CancelToken, DatabaseReport, EventLogSink, RepairConfig, RepairError,
    RepairSession, RepairState, RepairSummary,
};
use sqlrepair::rules::DatabaseRules;

use crate::RepairArgs;

/// Everything a worker needs to process one database on its own connections.
struct RunContext<'a> {
    corpus_path: &'a Path,
    cfg: &'a Config,
    backend: Backend,
    dsn: String,
    repair: RepairConfig,
    database_rules: DatabaseRules,
    options: BatchOptions,
    cancel: CancelToken,
}

pub fn execute(args: RepairArgs) -> Result<i32> {
    let root = super::project_root()?;
    let cfg = config::load(&root)?;
    let corpus_path = config::corpus_path(&root, &cfg);
    let store = CorpusStore::open(&corpus_path)?;

    let databases = match &args.target.database {
        Some(id) => vec![id.clone()],
        None => store.databases()?,
    };
    if databases.is_empty() {
        bail!("Corpus is empty. Run 'sqlrepair import <file>' first.");
    }
    drop(store);

    let mut repair = cfg.repair_config();
    if let Some(n) = args.max_iterations {
        repair.max_attempts = n.max(1);
    }
    let cancel = match args.time_budget {
        Some(secs) => CancelToken::with_deadline(Duration::from_secs(secs)),
        None => CancelToken::new(),
    };
    let strict = args.strict || cfg.repair.strict;

    let ctx = RunContext {
        corpus_path: &corpus_path,
        cfg: &cfg,
        backend: args.backend.unwrap_or(cfg.connection.backend),
        dsn: config::dsn(&cfg, args.dsn.as_deref()),
        repair,
        database_rules: config::database_rules(&cfg)?,
        options: BatchOptions {
            queries: args.queries.clone(),
            skip_static: args.skip_static,
        },
        cancel,
    };
    tracing::info!(
        databases = databases.len(),
        backend = %ctx.backend,
        max_attempts = ctx.repair.max_attempts,
        parallel = args.parallel,
        "starting repair run"
    );

    let results: Vec<(String, Result<DatabaseReport>)> = if args.parallel {
        databases
            .par_iter()
            .map(|id| (id.clone(), repair_one(&ctx, id)))
            .collect()
    } else {
        until_first_error(&databases, |id| repair_one(&ctx, id))
    };

    let mut total = RepairSummary::default();
    let mut failure: Option<anyhow::Error> = None;
    println!();
    for (database_id, result) in results {
        match result {
            Ok(report) => {
                print_report(&report);
                total.merge(&report.summary);
            }
            Err(e) => {
                println!("{} {} {:#}", "Aborted:".red().bold(), database_id.bold(), e);
                failure.get_or_insert(e);
            }
        }
    }

    println!(
        "\n{} {} queries: {} succeeded, {} unfixable, {} exhausted, {} cancelled ({} rewritten, {} executions)",
        "Total:".bold(),
        total.total(),
        total.succeeded.to_string().green(),
        total.unfixable.to_string().yellow(),
        total.exhausted.to_string().red(),
        total.cancelled,
        total.persisted,
        total.executions
    );

    if let Some(e) = failure {
        return Err(e.context("repair run aborted"));
    }
    Ok(if total.exit_ok(strict) { 0 } else { 1 })
}

/// Run `f` over `databases` in order, stopping after the first failure.
fn until_first_error<T>(
    databases: &[String],
    mut f: impl FnMut(&str) -> Result<T>,
) -> Vec<(String, Result<T>)> {
    let mut results = Vec::with_capacity(databases.len());
    for id in databases {
        let result = f(id);
        let failed = result.is_err();
        results.push((id.clone(), result));
        if failed {
            break;
        }
    }
    results
}

/// Repair one database on its own live connection and corpus connection.
/// An infrastructure failure cancels every other worker.
fn repair_one(ctx: &RunContext<'_>, database_id: &str) -> Result<DatabaseReport> {
    let result = run_worker(ctx, database_id);
    if let Err(RepairError::Infrastructure { .. }) = &result {
        ctx.cancel.cancel();
    }
    result.with_context(|| format!("database {}", database_id))
}

fn run_worker(ctx: &RunContext<'_>, database_id: &str) -> Result<DatabaseReport, RepairError> {
    let store = CorpusStore::open(ctx.corpus_path).map_err(RepairError::Store)?;
    let mut db = live::connect(ctx.backend, &ctx.dsn, database_id, ctx.cfg.timeouts())
        .map_err(|e| RepairError::infrastructure(database_id, e))?;
    let mut sink = EventLogSink::new(store.connection());
    let mut session = RepairSession::new(db.as_mut(), &mut sink, ctx.repair, ctx.cancel.clone())?;
    tracing::debug!(database = database_id, run_id = %session.run_id(), tables = session.schema().table_count(), "session ready");

    repair::run_database(
        &mut session,
        &store,
        database_id,
        &ctx.database_rules,
        &ctx.options,
    )
}

fn print_report(report: &DatabaseReport) {
    println!("{}", report.database_id.bold());
    for outcome in &report.outcomes {
        let state = match outcome.state {
            RepairState::Succeeded => "succeeded".green(),
            RepairState::Unfixable => "unfixable".yellow(),
            RepairState::Exhausted => "exhausted".red(),
            RepairState::Cancelled => "cancelled".dimmed(),
            other => other.as_str().normal(),
        };
        let rules = if outcome.rules_applied.is_empty() {
            String::new()
        } else {
            format!(" [{}]", outcome.rules_applied.join(", "))
        };
        println!(
            "  #{:<4} {:<10} {} exec{}{}",
            outcome.query_number,
            state,
            outcome.executions,
            rules.cyan(),
            if outcome.persisted { " (saved)" } else { "" }
        );
    }
    let s = &report.summary;
    println!(
        "  {} succeeded, {} unfixable, {} exhausted, {} cancelled\n",
        s.succeeded, s.unfixable, s.exhausted, s.cancelled
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_run_stops_at_first_failure() {
        let databases: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut visited = Vec::new();
        let results = until_first_error(&databases, |id| {
            visited.push(id.to_string());
            if id == "b" {
                bail!("connection refused")
            }
            Ok(id.len())
        });

        assert_eq!(visited, vec!["a", "b"]);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
