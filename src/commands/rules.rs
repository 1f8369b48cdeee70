use anyhow::Result;
use colored::*;

use sqlrepair::config;
use sqlrepair::rules::{ERROR_RULES, STRUCTURAL_RULES};

pub fn execute(database: Option<&str>) -> Result<()> {
    let (_, cfg, _) = super::open_project()?;
    let database_rules = config::database_rules(&cfg)?;

    if database.is_none() {
        println!("{}", "Structural rules (in order):".bright_cyan());
        for (i, rule) in STRUCTURAL_RULES.iter().enumerate() {
            println!("  {:>2}. {:<30} {}", i + 1, rule.id.bold(), rule.description);
        }

        println!("\n{}", "Error-driven rules:".bright_cyan());
        for rule in ERROR_RULES {
            println!(
                "  {:<30} {:<20} {}",
                rule.id.bold(),
                rule.category.as_str(),
                rule.signatures.join(", ").dimmed()
            );
        }
    }

    let databases: Vec<&str> = match database {
        Some(id) => vec![id],
        None => database_rules.databases().collect(),
    };
    println!("\n{}", "Database rules:".bright_cyan());
    if databases.iter().all(|id| database_rules.rules_for(id).is_empty()) {
        println!("  {}", "(none configured)".dimmed());
    }
    for id in databases {
        let rules = database_rules.rules_for(id);
        if rules.is_empty() {
            continue;
        }
        println!("  {}", id.bold());
        for rule in rules {
            println!("    {:<28} {}", rule.id, rule.describe());
        }
    }
    Ok(())
}
