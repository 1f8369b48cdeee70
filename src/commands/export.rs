use anyhow::Result;
use colored::*;
use std::path::Path;

use sqlrepair::corpus;

pub fn execute(file: &Path, database: Option<&str>) -> Result<()> {
    let (_, _, store) = super::open_project()?;
    let records = match database {
        Some(id) => store.load_database(id)?,
        None => store.load_all()?,
    };

    corpus::write_json(file, &records)?;
    println!(
        "{} {} queries to {}",
        "Exported:".bright_green(),
        records.len(),
        file.display()
    );
    Ok(())
}
