use crate::Result;
use crate::cli::{engine, load_context, report_status, run_blocking};
use colored::Colorize;
use std::path::Path;

pub async fn execute(config_path: &Path, update: bool) -> Result<()> {
    let ctx = load_context(config_path).await?;
    let engine = engine(&ctx);

    if update {
        println!("{} Updating index...", "⚡".bright_yellow());
        let status = run_blocking(move || Ok(engine.incremental_update())).await?;
        return report_status(status);
    }

    println!("{} Generating index...", "⚡".bright_yellow());
    let report = run_blocking(move || engine.full_build()).await?;
    println!(
        "{} Indexed {} gems under {} names",
        "✓".green(),
        report.packages.to_string().bold(),
        report.names.to_string().bold()
    );
    Ok(())
}
