//! Static fixer: structural rules, then database-specific rules, applied to
//! every selected stored query once.

use anyhow::{bail, Result};
use colored::*;

use sqlrepair::config;
use sqlrepair::rules;

pub fn execute(database: Option<&str>, dry_run: bool) -> Result<()> {
    let (_, cfg, store) = super::open_project()?;
    let database_rules = config::database_rules(&cfg)?;

    let databases = match database {
        Some(id) => vec![id.to_string()],
        None => store.databases()?,
    };
    if databases.is_empty() {
        bail!("Corpus is empty. Run 'sqlrepair import <file>' first.");
    }

    let mut scanned = 0;
    let mut changed = 0;
    let mut written = 0;

    for database_id in &databases {
        let records = store.load_database(database_id)?;
        if records.is_empty() {
            println!("{} no queries for {}", "Warning:".yellow(), database_id);
            continue;
        }
        for record in &records {
            scanned += 1;
            let fix = rules::fix_static(database_id, &record.sql_text, &database_rules);
            if !fix.changed() {
                continue;
            }
            changed += 1;
            println!("  {} {}", record.id().bold(), fix.applied.join(", ").cyan());

            if dry_run {
                continue;
            }
            if store.overwrite_sql(database_id, record.query_number, &record.sql_text, &fix.text)? {
                written += 1;
            } else {
                tracing::warn!(query = %record.id(), "stored text changed concurrently; skipped");
            }
        }
    }

    tracing::info!(scanned, changed, written, dry_run, "static fix finished");
    if dry_run {
        println!(
            "\n{} {} of {} queries would change",
            "Dry run:".bright_cyan(),
            changed,
            scanned
        );
    } else {
        println!(
            "\n{} {} of {} queries rewritten",
            "Fixed:".bright_green(),
            written,
            scanned
        );
    }
    Ok(())
}
