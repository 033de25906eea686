use clap::{Parser, Subcommand};
use colored::Colorize;
use gemmirror::Result;
use gemmirror::constants::DEFAULT_PLATFORM;
use gemmirror::core::config::default_config_path;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "gemmirror")]
#[command(about = "Pull-through RubyGems mirror with an incremental compact index", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to gemmirror.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new gemmirror.toml
    Init {
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// Download the configured gems and refresh the index
    Update,

    /// Generate the compact index from the local gems
    Index {
        /// Only process gems changed since the last run
        #[arg(short, long)]
        update: bool,
    },

    /// List the gems in the index
    List,

    /// Fetch one gem version from the source
    Fetch {
        name: String,
        version: String,
        #[arg(short, long, default_value = DEFAULT_PLATFORM)]
        platform: String,
    },

    /// Show the dependency listing of local gems
    Deps {
        #[arg(required = true)]
        names: Vec<String>,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let start = Instant::now();
    let config = cli.config.unwrap_or_else(default_config_path);

    let result: Result<()> = match cli.command {
        Commands::Init { path } => gemmirror::cli::init::execute(&path).await,
        Commands::Update => gemmirror::cli::update::execute(&config).await,
        Commands::Index { update } => gemmirror::cli::index::execute(&config, update).await,
        Commands::List => gemmirror::cli::list::execute(&config).await,
        Commands::Fetch {
            name,
            version,
            platform,
        } => gemmirror::cli::fetch::execute(&config, &name, &version, &platform).await,
        Commands::Deps { names, json } => gemmirror::cli::deps::execute(&config, names, json).await,
    };

    match result {
        Ok(()) => {
            let elapsed = start.elapsed();
            println!(
                "\n{} Completed in {:.2}s",
                "✓".green().bold(),
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("{} failed: {}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}
