//! Jackpot history inspection binary
//!
//! Prints archived round records from the RocksDB history store.

use clap::Parser;
use jackpot::config::ConfigLoader;
use jackpot::history::RocksHistoryStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inspect-history")]
#[command(about = "Inspect archived jackpot rounds", long_about = None)]
struct Args {
    /// Configuration file (TOML); defaults and JACKPOT_* variables apply otherwise
    #[arg(long)]
    config: Option<String>,

    /// History directory, overrides the configured one
    #[arg(long)]
    db_path: Option<String>,

    /// Round address to print; lists archived rounds when omitted
    #[arg(long)]
    round: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jackpot=info")),
        )
        .init();

    let args = Args::parse();

    let loader = match args.config {
        Some(ref path) => ConfigLoader::new().with_path(path),
        None => ConfigLoader::new(),
    };
    let config = loader.load()?;
    let db_path = args.db_path.unwrap_or(config.history.data_directory);

    println!("📂 Opening history store: {}", db_path);
    let store = RocksHistoryStore::open_read_only(&db_path)?;

    match args.round {
        Some(round) => match store.load(&round)? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => {
                println!("No history recorded for round {}", round);
                std::process::exit(1);
            }
        },
        None => {
            let addresses = store.round_addresses()?;
            println!("{} archived round(s)", addresses.len());
            for address in addresses {
                println!("  {}", address);
            }
        }
    }

    Ok(())
}
