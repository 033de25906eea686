use crate::cli::{engine, load_context};
use crate::core::fetcher::{FetchKind, MirrorFetcher};
use crate::core::gem::GemIdentity;
use crate::core::version::is_valid_version;
use crate::registry::source::HttpSource;
use crate::utils::hash::sha256_file;
use crate::{MirrorError, Result};
use colored::Colorize;
use std::path::Path;

/// Pull a single gem version through the mirror
pub async fn execute(config_path: &Path, name: &str, version: &str, platform: &str) -> Result<()> {
    if !is_valid_version(version) {
        return Err(MirrorError::Config(format!("Invalid version: {}", version)));
    }

    let ctx = load_context(config_path).await?;
    let source = HttpSource::new(&ctx.config.source)?;
    let fetcher = MirrorFetcher::new(ctx.clone(), source).with_engine(engine(&ctx));
    let identity = GemIdentity::new(name, version, platform);

    println!("{} Fetching {}...", "⚡".bright_yellow(), identity.to_string().cyan());
    let fetched = fetcher.ensure(&identity, FetchKind::Package).await;
    if ctx.config.fetch_gemspecs {
        fetcher.ensure(&identity, FetchKind::DependencyBlob).await;
    }

    let path = fetcher.local_path(&identity, FetchKind::Package);
    if !path.is_file() {
        return Err(MirrorError::Fetch {
            resource: identity.gem_filename(),
            reason: "not available from the source".to_string(),
        });
    }

    let checksum = sha256_file(&path)?;
    let state = if fetched { "downloaded" } else { "already mirrored" };
    println!("{} {} {}", "✓".green(), identity.to_string().cyan(), state);
    println!("  {} {}", "path:".dimmed(), path.display());
    println!("  {} {}", "sha256:".dimmed(), checksum);

    Ok(())
}
