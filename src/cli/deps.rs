use crate::Result;
use crate::cli::{engine, load_context, run_blocking};
use crate::core::fetcher::MirrorFetcher;
use crate::core::service::MirrorService;
use crate::registry::source::HttpSource;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

/// Show the dependency listing served for the given gems
pub async fn execute(config_path: &Path, names: Vec<String>, json: bool) -> Result<()> {
    let ctx = load_context(config_path).await?;
    let engine = engine(&ctx);
    let fetcher = MirrorFetcher::new(ctx.clone(), HttpSource::new(&ctx.config.source)?);
    let service = Arc::new(MirrorService::new(engine, fetcher));

    let listing = {
        let service = Arc::clone(&service);
        run_blocking(move || service.dependencies_for(&names)).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.is_empty() {
        println!("No local versions found.");
        return Ok(());
    }

    for entry in &listing {
        let platform = if entry.platform == crate::constants::DEFAULT_PLATFORM {
            String::new()
        } else {
            format!(" ({})", entry.platform)
        };
        println!("{} {}{}", entry.name.cyan(), entry.number.green(), platform.dimmed());
        if entry.dependencies.is_empty() {
            println!("  {}", "no runtime dependencies".dimmed());
        }
        for (dep, requirement) in &entry.dependencies {
            println!("  {} {} {}", "•".dimmed(), dep, requirement.yellow());
        }
    }

    println!("{}", "─".repeat(50));
    println!("Total: {} versions", listing.len().to_string().bold());
    Ok(())
}
