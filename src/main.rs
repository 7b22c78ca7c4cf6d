use clap::{Parser, Subcommand};
use espoo_importer::config::Config;
use espoo_importer::importer::fetch::{FeedClient, HttpFeedClient};
use espoo_importer::importer::{EspooImporter, ImportOptions};
use espoo_importer::logging;
use espoo_importer::storage::{InMemoryStorage, Storage};
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "espoo_importer")]
#[command(about = "City of Espoo event feed importer")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed and reconcile events into storage
    Import {
        /// Allow mass deletions when the feed has shrunk drastically
        #[arg(long)]
        force: bool,
        /// Cache feed responses in-process for this run
        #[arg(long)]
        cached: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import { force, cached } => {
            let config = Config::load()?;
            let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
            let client: Arc<dyn FeedClient> = Arc::new(HttpFeedClient::new(cached));
            let importer =
                EspooImporter::new(storage, client, config.espoo, ImportOptions { force });

            match importer.import_events().await {
                Ok(summary) => {
                    println!("\n📊 Import results:");
                    println!("   Assembled events: {}", summary.assembled);
                    println!("   Upserted: {}", summary.upserted);
                    println!("   Soft-deleted: {}", summary.deleted);
                    if summary.delete_aborted {
                        println!("   ⚠️  Delete phase aborted by the mass-deletion guard");
                    }
                }
                Err(e) => {
                    error!("Import failed: {}", e);
                    println!("❌ Import failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
