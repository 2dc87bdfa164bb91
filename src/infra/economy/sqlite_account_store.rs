// SQLite implementation of the AccountStore trait
//
// Tables:
// - accounts: one row per account, balances as NUMERIC
// - items: one row per inventory entry, cascading on account delete

use crate::core::economy::{Account, AccountId, AccountStore, BalanceField, EconomyError, Item};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

// Ids come back with their storage class so 42 and '42' stay distinct.
// Balances are cast because NUMERIC affinity stores whole numbers as INTEGER.
const SELECT_ACCOUNT: &str = r#"
    SELECT typeof(a.id) AS id_kind, CAST(a.id AS TEXT) AS id_text,
           CAST(a.bank AS REAL) AS bank, CAST(a.wallet AS REAL) AS wallet
    FROM accounts a
    WHERE a.id = ?
"#;

const SELECT_ALL_ACCOUNTS: &str = r#"
    SELECT typeof(a.id) AS id_kind, CAST(a.id AS TEXT) AS id_text,
           CAST(a.bank AS REAL) AS bank, CAST(a.wallet AS REAL) AS wallet,
           i.id AS item_id, i.name AS item_name
    FROM accounts a
    LEFT JOIN items i ON i.owner_id = a.id
    ORDER BY a.rowid, i.id
"#;

/// Connection settings for the SQLite backend.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file, created if missing.
    pub database_path: PathBuf,

    /// Upper bound on pooled connections. Callers beyond this queue.
    pub max_connections: u32,
}

impl SqliteConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("economy.db"),
            max_connections: 5,
        }
    }
}

pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    /// Create a new SQLite account store with the given database path.
    pub async fn new(database_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::connect(&SqliteConfig::new(database_path.as_ref())).await
    }

    /// Open the pool and make sure the schema exists before returning.
    pub async fn connect(config: &SqliteConfig) -> anyhow::Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .pragma("cache_size", "10000")
            .pragma("temp_store", "MEMORY")
            .pragma("mmap_size", "268435456");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            "SQLite account store ready"
        );
        Ok(store)
    }

    /// Create tables and indexes. Safe to run on every start.
    async fn migrate(&self) -> anyhow::Result<()> {
        // `id` has no declared type so integer and text ids are stored as given
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id PRIMARY KEY,
                bank NUMERIC NOT NULL DEFAULT 0,
                wallet NUMERIC NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                owner_id REFERENCES accounts (id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Keeps inventory lookups proportional to one user's items
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_owner_id ON items(owner_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn items_for(&self, id: &AccountId) -> Result<Vec<Item>, EconomyError> {
        let rows = bind_id(
            sqlx::query("SELECT id, name FROM items WHERE owner_id = ? ORDER BY id"),
            id,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(EconomyError::store)?;

        rows.iter()
            .map(|row| -> Result<Item, EconomyError> {
                Ok(Item {
                    id: Some(row.try_get("id").map_err(EconomyError::store)?),
                    owner_id: id.clone(),
                    name: row.try_get("name").map_err(EconomyError::store)?,
                })
            })
            .collect()
    }

    async fn update_balance(
        &self,
        sql: &str,
        id: &AccountId,
        amount: f64,
    ) -> Result<(), EconomyError> {
        bind_id(sqlx::query(sql).bind(amount), id)
            .execute(&self.pool)
            .await
            .map_err(EconomyError::store)?;
        Ok(())
    }
}

fn bind_id<'q>(query: SqliteQuery<'q>, id: &AccountId) -> SqliteQuery<'q> {
    match id {
        AccountId::Int(id) => query.bind(*id),
        AccountId::Text(id) => query.bind(id.clone()),
    }
}

fn decode_id(row: &SqliteRow) -> Result<AccountId, EconomyError> {
    let kind: String = row.try_get("id_kind").map_err(EconomyError::store)?;
    let text: String = row.try_get("id_text").map_err(EconomyError::store)?;

    if kind == "integer" {
        text.parse().map(AccountId::Int).map_err(EconomyError::store)
    } else {
        Ok(AccountId::Text(text))
    }
}

/// Balances of an account row, inventory left empty.
fn decode_account(row: &SqliteRow) -> Result<Account, EconomyError> {
    Ok(Account {
        id: decode_id(row)?,
        bank: row.try_get("bank").map_err(EconomyError::store)?,
        wallet: row.try_get("wallet").map_err(EconomyError::store)?,
        items: Vec::new(),
    })
}

/// The LEFT JOINed item of an `all_accounts` row, if any.
fn decode_joined_item(row: &SqliteRow, owner: &AccountId) -> Result<Option<Item>, EconomyError> {
    let item_id: Option<i64> = row.try_get("item_id").map_err(EconomyError::store)?;
    let name: Option<String> = row.try_get("item_name").map_err(EconomyError::store)?;
    Ok(name.map(|name| Item {
        id: item_id,
        owner_id: owner.clone(),
        name,
    }))
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn ensure_registered(&self, id: &AccountId) -> Result<(), EconomyError> {
        bind_id(
            sqlx::query("INSERT OR IGNORE INTO accounts (id, bank, wallet) VALUES (?, 0, 0)"),
            id,
        )
        .execute(&self.pool)
        .await
        .map_err(EconomyError::store)?;

        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, EconomyError> {
        let row = bind_id(sqlx::query(SELECT_ACCOUNT), id)
            .fetch_optional(&self.pool)
            .await
            .map_err(EconomyError::store)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut account = decode_account(&row)?;
        account.items = self.items_for(id).await?;
        Ok(Some(account))
    }

    async fn delete_account(&self, id: &AccountId) -> Result<(), EconomyError> {
        // Items go with it through ON DELETE CASCADE
        bind_id(sqlx::query("DELETE FROM accounts WHERE id = ?"), id)
            .execute(&self.pool)
            .await
            .map_err(EconomyError::store)?;

        Ok(())
    }

    fn all_accounts(&self) -> BoxStream<'_, Result<Account, EconomyError>> {
        // One pass over a join ordered by account: a single connection is
        // held and the rows of one account arrive together.
        let rows = sqlx::query(SELECT_ALL_ACCOUNTS).fetch(&self.pool);

        stream::try_unfold((rows, None::<Account>), |(mut rows, mut pending)| async move {
            while let Some(row) = rows.try_next().await.map_err(EconomyError::store)? {
                let id = decode_id(&row)?;
                let item = decode_joined_item(&row, &id)?;

                let same_account = pending.as_ref().is_some_and(|account| account.id == id);
                if same_account {
                    if let Some(account) = pending.as_mut() {
                        account.items.extend(item);
                    }
                    continue;
                }

                let mut next = decode_account(&row)?;
                next.items.extend(item);
                if let Some(finished) = pending.replace(next) {
                    return Ok::<_, EconomyError>(Some((finished, (rows, pending))));
                }
            }

            Ok::<_, EconomyError>(pending.take().map(|account| (account, (rows, None))))
        })
        .boxed()
    }

    async fn increment_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        let column = field.as_str();
        let sql = format!("UPDATE accounts SET {0} = {0} + ? WHERE id = ?", column);
        self.update_balance(&sql, id, amount).await
    }

    async fn decrement_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
        clamp_at_zero: bool,
    ) -> Result<(), EconomyError> {
        let column = field.as_str();
        let sql = if clamp_at_zero {
            format!("UPDATE accounts SET {0} = MAX({0} - ?, 0) WHERE id = ?", column)
        } else {
            format!("UPDATE accounts SET {0} = {0} - ? WHERE id = ?", column)
        };
        self.update_balance(&sql, id, amount).await
    }

    async fn withdraw_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<bool, EconomyError> {
        let sql = format!(
            "UPDATE accounts SET {0} = {0} - ? WHERE id = ? AND {0} >= ?",
            field.as_str()
        );
        let result = bind_id(sqlx::query(&sql).bind(amount), id)
            .bind(amount)
            .execute(&self.pool)
            .await
            .map_err(EconomyError::store)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        let sql = format!("UPDATE accounts SET {} = ? WHERE id = ?", field.as_str());
        self.update_balance(&sql, id, amount).await
    }

    async fn insert_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        let query = sqlx::query(
            r#"
            INSERT INTO items (name, owner_id)
            SELECT ?, ?
            WHERE NOT EXISTS (SELECT 1 FROM items WHERE owner_id = ? AND name = ?)
            "#,
        )
        .bind(name);
        let query = bind_id(bind_id(query, id), id).bind(name);

        let result = query
            .execute(&self.pool)
            .await
            .map_err(EconomyError::store)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        let query = sqlx::query(
            r#"
            DELETE FROM items WHERE id = (
                SELECT id FROM items WHERE owner_id = ? AND name = ? ORDER BY id LIMIT 1
            )
            "#,
        );
        let result = bind_id(query, id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(EconomyError::store)?;

        Ok(result.rows_affected() > 0)
    }
}
