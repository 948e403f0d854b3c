//! `objectdb-inspect [directory]`
//!
//! Opens every collection found in a database directory and prints object
//! counts, index sizes and the integrity report of each. Exits non-zero if
//! any collection has problems. Without an argument the directory comes from
//! `OBJECTDB_DATABASE_DIRECTORY` (default `./data`).

use std::path::PathBuf;

use objectdb::{Database, DatabaseConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "objectdb=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(directory) = std::env::args().nth(1) {
        config.directory = PathBuf::from(directory);
    }

    // Opening would create a missing directory; inspecting must not.
    if !config.directory.is_dir() {
        tracing::error!("{} is not a directory", config.directory.display());
        std::process::exit(1);
    }

    let database = match Database::open(config).await {
        Ok(database) => database,
        Err(e) => {
            tracing::error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let names = match database.open_collections().await {
        Ok(names) => names,
        Err(e) => {
            tracing::error!("Failed to open collections: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("found {} collection(s)", names.len());

    let mut healthy = true;
    for name in &names {
        match database.verify(name).await {
            Ok(report) => {
                healthy &= report.is_ok();
                println!("{report}");
            }
            Err(e) => {
                healthy = false;
                tracing::error!("Failed to verify {name}: {e}");
            }
        }
    }

    database.shutdown().await;
    if !healthy {
        std::process::exit(2);
    }
}
