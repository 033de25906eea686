use crate::Result;
use crate::cli::{engine, load_context, report_status, run_blocking};
use crate::constants::VERSIONS;
use crate::core::fetcher::MirrorFetcher;
use crate::registry::source::HttpSource;
use crate::utils::progress::ProgressTracker;
use colored::Colorize;
use std::path::Path;

/// Fetch every configured gem from the source, then refresh the index
pub async fn execute(config_path: &Path) -> Result<()> {
    let ctx = load_context(config_path).await?;
    let source = HttpSource::new(&ctx.config.source)?;
    println!(
        "{} Mirroring {} gems from {}",
        "⚡".bright_yellow(),
        ctx.config.source.gems.len(),
        source.host().cyan()
    );

    let fetcher = MirrorFetcher::new(ctx.clone(), source);
    let progress = ProgressTracker::new();

    let spinner = progress.add_spinner("Fetching upstream version list...");
    let upstream = fetcher.fetch_upstream_index().await;
    spinner.finish_and_clear();
    let upstream = upstream?;

    let _downloading = progress.add_spinner("Downloading gems...");
    let summary = fetcher.fetch_configured(&upstream).await;
    progress.finish_all();
    let summary = summary?;

    println!(
        "{} Fetched {}, skipped {}, failed {}",
        "📦".bright_blue(),
        summary.fetched.to_string().green(),
        summary.skipped,
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().normal()
        }
    );

    let engine = engine(&ctx);
    if engine.store().read_current(VERSIONS).is_err() {
        println!("{} No index yet, generating it...", "🔍".bright_blue());
        let report = run_blocking(move || engine.full_build()).await?;
        println!("{} Indexed {} gems", "✓".green(), report.packages);
        return Ok(());
    }

    let status = run_blocking(move || Ok(engine.incremental_update())).await?;
    report_status(status)
}
