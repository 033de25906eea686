use crate::cli::{engine, load_context};
use crate::{MirrorError, Result};
use colored::Colorize;
use std::path::Path;

/// Print every indexed gem with its versions
pub async fn execute(config_path: &Path) -> Result<()> {
    let ctx = load_context(config_path).await?;
    let engine = engine(&ctx);

    let index = match engine.current_index() {
        Ok(index) => index,
        Err(MirrorError::ArtifactMissing(_)) => {
            println!("No index found.");
            println!("Run 'gemmirror index' to generate one");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let groups = index.grouped_by_name();
    if groups.is_empty() {
        println!("The index is empty.");
        return Ok(());
    }

    println!("Indexed gems (created {}):", index.created_at().dimmed());
    println!("{}", "─".repeat(50));

    let mut versions_total = 0;
    for (name, gems) in groups {
        let versions: Vec<String> = gems.iter().map(|g| g.version_token()).collect();
        versions_total += versions.len();
        println!("{} {}", name.cyan(), versions.join(", ").green());
    }

    println!("{}", "─".repeat(50));
    println!(
        "Total: {} gems, {} versions",
        groups.len().to_string().bold(),
        versions_total.to_string().bold()
    );

    Ok(())
}
