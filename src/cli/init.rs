use crate::constants::CONFIG_FILE;
use crate::core::config::TEMPLATE;
use crate::{MirrorError, Result};
use colored::Colorize;
use std::path::Path;
use tokio::fs;

pub async fn execute(path: &Path) -> Result<()> {
    let config_path = path.join(CONFIG_FILE);

    if config_path.exists() {
        return Err(MirrorError::Config(format!(
            "{} already exists in this directory",
            CONFIG_FILE
        )));
    }

    println!("{} Initializing new mirror...", "⚡".bright_yellow());

    fs::create_dir_all(path).await?;
    fs::write(&config_path, TEMPLATE).await?;

    println!("{} Created {}", "✓".green(), CONFIG_FILE);
    println!("\nNext steps:");
    println!("  1. Edit {} to set the source and the gems to mirror", CONFIG_FILE);
    println!("  2. Run {} to download them", "gemmirror update".cyan());
    println!("  3. Run {} to build the compact index", "gemmirror index".cyan());

    Ok(())
}
