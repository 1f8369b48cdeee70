use anyhow::Result;
use colored::*;
use std::path::Path;

use sqlrepair::{config, corpus, paths};

pub fn execute(file: &Path, replace: bool) -> Result<()> {
    let records = corpus::read_json(file)?;
    let (root, cfg, mut store) = super::open_project()?;
    if !paths::config_path(&root).exists() {
        config::save(&root, &cfg)?;
        tracing::info!(path = %paths::config_path(&root).display(), "wrote default config");
    }

    let summary = store.import(&records, replace)?;
    tracing::info!(
        file = %file.display(),
        inserted = summary.inserted,
        replaced = summary.replaced,
        skipped = summary.skipped,
        "import finished"
    );

    println!(
        "{} {} inserted, {} replaced, {} skipped ({} in corpus)",
        "Imported:".bright_green(),
        summary.inserted,
        summary.replaced,
        summary.skipped,
        store.count()?
    );
    if summary.skipped > 0 && !replace {
        println!("{}", "  existing queries were kept; pass --replace to overwrite".dimmed());
    }
    Ok(())
}
