//! Command implementations behind the `gemmirror` binary

pub mod deps;
pub mod fetch;
pub mod index;
pub mod init;
pub mod list;
pub mod update;

use crate::core::config::MirrorConfig;
use crate::core::context::MirrorContext;
use crate::core::engine::{IndexEngine, UpdateStatus};
use crate::registry::reader::GemArchiveReader;
use crate::{MirrorError, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

/// Load the configuration and build the per-process context
pub async fn load_context(config_path: &Path) -> Result<Arc<MirrorContext>> {
    if !config_path.exists() {
        return Err(MirrorError::Config(format!(
            "{} not found. Run 'gemmirror init' first.",
            config_path.display()
        )));
    }

    let mut config = MirrorConfig::load(config_path).await?;
    config.resolve_destination(config_path);
    let ctx = Arc::new(MirrorContext::new(config)?);
    watch_interrupt(&ctx);
    Ok(ctx)
}

/// Ctrl-C sets the interrupt flag so running batches stop without committing
fn watch_interrupt(ctx: &MirrorContext) {
    let flag = ctx.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });
}

pub fn engine(ctx: &Arc<MirrorContext>) -> Arc<IndexEngine> {
    Arc::new(IndexEngine::new(Arc::clone(ctx), Arc::new(GemArchiveReader::new())))
}

/// Run index work on the blocking pool
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MirrorError::WorkerPool(e.to_string()))?
}

/// Print the outcome of an index update; a fatal status becomes the error
pub fn report_status(status: UpdateStatus) -> Result<()> {
    match status {
        UpdateStatus::Updated(report) => {
            println!("{} {}", "✓".green(), UpdateStatus::Updated(report.clone()));
            for name in &report.names {
                println!("  {} {}", "•".dimmed(), name.cyan());
            }
            Ok(())
        }
        UpdateStatus::NoChanges => {
            println!("{} {}", "•".yellow(), UpdateStatus::NoChanges);
            Ok(())
        }
        UpdateStatus::Fatal(e) => Err(e),
    }
}
