//! lexcorpus CLI
//!
//! Local execution entry point. Source implementations are registered by
//! downstream builds; the stock registry is empty.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lexcorpus::{
    config::load_config, error::Result, pipeline::Orchestrator, services::Scraper,
    storage::CorpusStore,
};

/// lexcorpus - legal document corpus builder
#[derive(Parser, Debug)]
#[command(
    name = "lexcorpus",
    version,
    about = "Builds and maintains a deduplicated corpus of public legal documents"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "lexcorpus.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape all due sources and reconcile the corpus
    Run {
        /// Re-index every source regardless of its refresh interval
        #[arg(long)]
        refresh: bool,

        /// Only run the named sources
        #[arg(long)]
        sources: Vec<String>,
    },

    /// Validate the configuration file
    Validate,

    /// Show corpus record counts per source
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Document sources linked into this build.
fn registry() -> Vec<Arc<dyn Scraper>> {
    Vec::new()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Run { refresh, sources } => {
            let mut scrapers = registry();
            if !sources.is_empty() {
                scrapers.retain(|s| sources.contains(&s.descriptor().name));
            }
            if scrapers.is_empty() {
                log::warn!("No scrapers registered in this build; nothing to run.");
                return Ok(());
            }

            let orchestrator = Orchestrator::new(config, None);
            orchestrator.run(&scrapers, refresh).await?;
        }

        Command::Validate => {
            config.validate()?;
            log::info!("Configuration OK");
        }

        Command::Info => {
            let store =
                CorpusStore::load(&config.corpus.path, config.cleaning.min_content_chars).await?;
            if store.is_empty() {
                log::info!("Corpus at {} is empty.", config.corpus.path.display());
            } else {
                for (source, count) in store.count_by_source() {
                    log::info!("{source}: {count} documents");
                }
                log::info!("total: {} documents", store.len());
            }
        }
    }

    Ok(())
}
