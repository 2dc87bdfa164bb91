// Administrative export for the economy store.
//
// Streams every account (balances + inventory) to stdout as one JSON object
// per line. Backend selection comes from the environment or a .env file:
//
//   ECONOMY_BACKEND            sqlite (default) | mongodb
//   ECONOMY_DATABASE_PATH      SQLite file, default data/economy.db
//   ECONOMY_MONGO_URL          default mongodb://localhost:27017
//   ECONOMY_MONGO_DATABASE     default discord_economy
//   ECONOMY_MONGO_COLLECTION   default economy

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use discord_economy::{
    Account, AccountStore, Economy, MongoAccountStore, MongoConfig, SqliteAccountStore,
    SqliteConfig,
};
use futures::TryStreamExt;
use serde::Serialize;
use std::io::Write;

enum Backend {
    Sqlite(SqliteConfig),
    Mongo(MongoConfig),
}

/// One exported line.
#[derive(Serialize)]
struct ExportRecord<'a> {
    exported_at: DateTime<Utc>,
    #[serde(flatten)]
    account: &'a Account,
}

fn backend_from_env() -> anyhow::Result<Backend> {
    let backend = std::env::var("ECONOMY_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

    match backend.as_str() {
        "sqlite" => {
            let path = std::env::var("ECONOMY_DATABASE_PATH")
                .unwrap_or_else(|_| "data/economy.db".to_string());
            Ok(Backend::Sqlite(SqliteConfig::new(path)))
        }
        "mongodb" | "mongo" => {
            let defaults = MongoConfig::default();
            let config = MongoConfig {
                uri: std::env::var("ECONOMY_MONGO_URL").unwrap_or(defaults.uri),
                database: std::env::var("ECONOMY_MONGO_DATABASE").unwrap_or(defaults.database),
                collection: std::env::var("ECONOMY_MONGO_COLLECTION")
                    .unwrap_or(defaults.collection),
                server_selection_timeout: defaults.server_selection_timeout,
            };
            Ok(Backend::Mongo(config))
        }
        other => bail!("Unknown ECONOMY_BACKEND '{}', expected sqlite or mongodb", other),
    }
}

/// Write every account as NDJSON. Returns how many were written.
async fn export<S: AccountStore>(economy: &Economy<S>) -> anyhow::Result<usize> {
    let exported_at = Utc::now();
    let mut out = std::io::BufWriter::new(std::io::stdout());
    let mut accounts = economy.all_accounts();
    let mut count = 0;

    while let Some(account) = accounts.try_next().await? {
        serde_json::to_writer(
            &mut out,
            &ExportRecord {
                exported_at,
                account: &account,
            },
        )?;
        writeln!(out)?;
        count += 1;
    }

    out.flush()?;
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let count = match backend_from_env()? {
        Backend::Sqlite(config) => {
            let store = SqliteAccountStore::connect(&config)
                .await
                .context("Failed to open SQLite economy store")?;
            export(&Economy::new(store)).await?
        }
        Backend::Mongo(config) => {
            let store = MongoAccountStore::connect(&config)
                .await
                .context("Failed to connect to MongoDB economy store")?;
            export(&Economy::new(store)).await?
        }
    };

    tracing::info!(accounts = count, "Export finished");
    Ok(())
}
