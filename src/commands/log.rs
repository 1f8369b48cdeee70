use anyhow::Result;
use colored::*;

pub fn execute(database: Option<&str>, limit: usize, json: bool) -> Result<()> {
    let (_, _, store) = super::open_project()?;
    let attempts = store.attempts(database, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&attempts)?);
        return Ok(());
    }

    if attempts.is_empty() {
        println!("No repair attempts recorded.");
        return Ok(());
    }

    for a in &attempts {
        let outcome = match a.outcome.as_str() {
            "succeeded" => a.outcome.green(),
            "fix_applied" => a.outcome.cyan(),
            "exhausted" => a.outcome.red(),
            _ => a.outcome.yellow(),
        };
        println!(
            "{}  {}#{:<4} #{:<2} {:<12} {:<24} {}",
            a.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            a.database_id,
            a.query_number,
            a.attempt_number,
            outcome,
            a.category.as_deref().unwrap_or("-"),
            a.rule_applied.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
