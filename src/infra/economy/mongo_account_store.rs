// MongoDB implementation of the AccountStore trait
//
// One document per account: { _id, bank, wallet, items: [name, ...] }.
// There is no schema to create; documents appear on first registration.

use crate::core::economy::{Account, AccountId, AccountStore, BalanceField, EconomyError, Item};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DUPLICATE_KEY: i32 = 11000;

/// Connection settings for the MongoDB backend.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,

    /// How long to wait for a usable server before giving up. Keeps a dead
    /// server from hanging startup.
    pub server_selection_timeout: Duration,
}

impl MongoConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "discord_economy".to_string(),
            collection: "economy".to_string(),
            server_selection_timeout: Duration::from_secs(5),
        }
    }
}

/// Stored shape of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountDocument {
    #[serde(rename = "_id")]
    id: AccountId,
    #[serde(default)]
    bank: f64,
    #[serde(default)]
    wallet: f64,
    #[serde(default)]
    items: Vec<String>,
}

impl From<AccountDocument> for Account {
    fn from(document: AccountDocument) -> Self {
        let items = document
            .items
            .into_iter()
            .map(|name| Item::new(document.id.clone(), name))
            .collect();

        Account {
            id: document.id,
            bank: document.bank,
            wallet: document.wallet,
            items,
        }
    }
}

pub struct MongoAccountStore {
    client: Client,
    collection: Collection<AccountDocument>,
}

impl MongoAccountStore {
    /// Connect and ping the server, so an unreachable store fails here
    /// rather than on the first command.
    pub async fn connect(config: &MongoConfig) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        options.server_selection_timeout = Some(config.server_selection_timeout);

        let client = Client::with_options(options)?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;

        let collection = database.collection::<AccountDocument>(&config.collection);

        tracing::info!(
            database = %config.database,
            collection = %config.collection,
            "MongoDB account store ready"
        );
        Ok(Self { client, collection })
    }

    /// The underlying client, shared by every operation.
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn update_account(&self, id: &AccountId, update: Document) -> Result<(), EconomyError> {
        self.collection
            .update_one(id_filter(id), update)
            .await
            .map_err(EconomyError::store)?;
        Ok(())
    }
}

fn id_bson(id: &AccountId) -> Bson {
    match id {
        AccountId::Int(id) => Bson::Int64(*id),
        AccountId::Text(id) => Bson::String(id.clone()),
    }
}

fn id_filter(id: &AccountId) -> Document {
    doc! { "_id": id_bson(id) }
}

fn field_update(operator: &str, field: BalanceField, value: f64) -> Document {
    let mut fields = Document::new();
    fields.insert(field.as_str(), value);
    let mut update = Document::new();
    update.insert(operator, fields);
    update
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl AccountStore for MongoAccountStore {
    async fn ensure_registered(&self, id: &AccountId) -> Result<(), EconomyError> {
        let result = self
            .collection
            .update_one(
                id_filter(id),
                doc! {
                    "$setOnInsert": { "bank": 0.0, "wallet": 0.0, "items": [] }
                },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            // Lost a first-registration race; the other insert won
            Err(err) if is_duplicate_key(&err) => Ok(()),
            Err(err) => Err(EconomyError::store(err)),
        }
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, EconomyError> {
        let document = self
            .collection
            .find_one(id_filter(id))
            .await
            .map_err(EconomyError::store)?;

        Ok(document.map(Account::from))
    }

    async fn delete_account(&self, id: &AccountId) -> Result<(), EconomyError> {
        // Items live inside the document, so they go with it
        self.collection
            .delete_one(id_filter(id))
            .await
            .map_err(EconomyError::store)?;

        Ok(())
    }

    fn all_accounts(&self) -> BoxStream<'_, Result<Account, EconomyError>> {
        let collection = self.collection.clone();

        stream::once(async move { collection.find(doc! {}).await.map_err(EconomyError::store) })
            .map_ok(|cursor| {
                cursor
                    .map_ok(Account::from)
                    .map_err(EconomyError::store)
            })
            .try_flatten()
            .boxed()
    }

    async fn increment_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        self.update_account(id, field_update("$inc", field, amount))
            .await
    }

    async fn decrement_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
        clamp_at_zero: bool,
    ) -> Result<(), EconomyError> {
        if !clamp_at_zero {
            return self
                .update_account(id, field_update("$inc", field, -amount))
                .await;
        }

        // Pipeline update so the read and the clamp happen server-side
        let current = format!("${}", field.as_str());
        let mut clamped = Document::new();
        clamped.insert(
            field.as_str(),
            doc! { "$max": [ { "$subtract": [current, amount] }, 0.0 ] },
        );
        let pipeline = vec![doc! { "$set": clamped }];

        self.collection
            .update_one(id_filter(id), pipeline)
            .await
            .map_err(EconomyError::store)?;

        Ok(())
    }

    async fn withdraw_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<bool, EconomyError> {
        // Only matches while the balance still covers the amount
        let mut filter = id_filter(id);
        filter.insert(field.as_str(), doc! { "$gte": amount });

        let result = self
            .collection
            .update_one(filter, field_update("$inc", field, -amount))
            .await
            .map_err(EconomyError::store)?;

        Ok(result.matched_count > 0)
    }

    async fn set_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        self.update_account(id, field_update("$set", field, amount))
            .await
    }

    async fn insert_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        // Only matches when the name isn't in the array yet
        let result = self
            .collection
            .update_one(
                doc! { "_id": id_bson(id), "items": { "$ne": name } },
                doc! { "$push": { "items": name } },
            )
            .await
            .map_err(EconomyError::store)?;

        Ok(result.matched_count > 0)
    }

    async fn delete_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        // Cut out the first occurrence only; `$pull` would drop every copy
        let index = doc! { "$indexOfArray": ["$items", name] };
        let pipeline = vec![doc! {
            "$set": {
                "items": {
                    "$concatArrays": [
                        { "$slice": ["$items", index.clone()] },
                        { "$slice": ["$items", { "$add": [index, 1] }, { "$size": "$items" }] },
                    ]
                }
            }
        }];

        let result = self
            .collection
            .update_one(doc! { "_id": id_bson(id), "items": name }, pipeline)
            .await
            .map_err(EconomyError::store)?;

        Ok(result.matched_count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economy::Economy;
    use std::time::Instant;

    #[test]
    fn test_document_shape() {
        let document = mongodb::bson::to_document(&AccountDocument {
            id: AccountId::Int(42),
            bank: 10.0,
            wallet: 0.5,
            items: vec!["sword".to_string()],
        })
        .unwrap();

        assert_eq!(document.get_i64("_id").unwrap(), 42);
        assert_eq!(document.get_f64("bank").unwrap(), 10.0);
        assert_eq!(document.get_array("items").unwrap().len(), 1);

        // Documents written by older clients may hold integer balances
        let legacy = doc! { "_id": "alice", "bank": 5, "wallet": 0, "items": ["potion"] };
        let account: Account = mongodb::bson::from_document::<AccountDocument>(legacy)
            .unwrap()
            .into();
        assert_eq!(account.id, AccountId::from("alice"));
        assert_eq!(account.bank, 5.0);
        assert_eq!(account.item_names(), vec!["potion"]);
        assert_eq!(account.items[0].owner_id, account.id);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_fast() {
        let config = MongoConfig {
            uri: "mongodb://127.0.0.1:1/?directConnection=true".to_string(),
            server_selection_timeout: Duration::from_millis(300),
            ..MongoConfig::default()
        };

        let started = Instant::now();
        assert!(MongoAccountStore::connect(&config).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Connects to `MONGODB_TEST_URL` with a collection private to one test.
    async fn economy(test: &str) -> Economy<MongoAccountStore> {
        let uri = std::env::var("MONGODB_TEST_URL")
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let collection = format!("{}_{}", test, chrono::Utc::now().timestamp_millis());
        let config = MongoConfig::new(uri, "test_discord_economy").with_collection(collection);

        let store = MongoAccountStore::connect(&config).await.unwrap();
        Economy::new(store)
    }

    async fn cleanup(economy: Economy<MongoAccountStore>) {
        economy.store().collection.drop().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (MONGODB_TEST_URL)"]
    async fn test_balances() {
        let economy = economy("balances").await;

        economy.ensure_registered(42).await.unwrap();
        economy.add_money(42, "bank", 100.0).await.unwrap();
        economy.remove_money(42, "bank", 150.0).await.unwrap();
        assert_eq!(economy.get_account(42).await.unwrap().bank, 0.0);

        economy.add_money(42, "wallet", 20.0).await.unwrap();
        economy.remove_money(42, "wallet", 5.5).await.unwrap();
        assert_eq!(economy.get_account(42).await.unwrap().wallet, 14.5);

        let err = economy.set_money(42, "bank", -5.0).await.unwrap_err();
        assert!(matches!(err, EconomyError::BalancePolicyViolation(_)));
        economy.set_money(42, "bank", 999.5).await.unwrap();
        assert_eq!(economy.get_account(42).await.unwrap().bank, 999.5);

        cleanup(economy).await;
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (MONGODB_TEST_URL)"]
    async fn test_items_and_delete() {
        let economy = economy("items").await;

        economy.add_item("a", "sword").await.unwrap();
        economy.add_item("b", "sword").await.unwrap();
        assert!(matches!(
            economy.add_item("a", "sword").await.unwrap_err(),
            EconomyError::ItemAlreadyExists { .. }
        ));

        economy.remove_item("a", "sword").await.unwrap();
        assert!(matches!(
            economy.remove_item("a", "sword").await.unwrap_err(),
            EconomyError::NotFound(_)
        ));
        assert_eq!(
            economy.get_account("b").await.unwrap().item_names(),
            vec!["sword"]
        );

        economy.delete_account("b").await.unwrap();
        assert!(matches!(
            economy.get_account("b").await.unwrap_err(),
            EconomyError::NotFound(_)
        ));

        cleanup(economy).await;
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (MONGODB_TEST_URL)"]
    async fn test_remove_item_takes_one_duplicate() {
        let economy = economy("legacy_items").await;

        // Older clients could leave the same name twice in one inventory
        economy
            .store()
            .collection
            .clone_with_type::<Document>()
            .insert_one(doc! {
                "_id": "legacy",
                "bank": 0.0,
                "wallet": 0.0,
                "items": ["potion", "sword", "potion"],
            })
            .await
            .unwrap();

        economy.remove_item("legacy", "potion").await.unwrap();
        assert_eq!(
            economy.get_account("legacy").await.unwrap().item_names(),
            vec!["sword", "potion"]
        );

        economy.remove_item("legacy", "potion").await.unwrap();
        economy.remove_item("legacy", "sword").await.unwrap();
        assert!(economy
            .get_account("legacy")
            .await
            .unwrap()
            .items
            .is_empty());

        cleanup(economy).await;
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (MONGODB_TEST_URL)"]
    async fn test_transfer() {
        let economy = economy("transfer").await;
        economy.add_money(1, "wallet", 10.0).await.unwrap();

        let results =
            futures::future::join_all((0..8).map(|_| economy.transfer(1, "wallet", "bank", 10.0)))
                .await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);

        let account = economy.get_account(1).await.unwrap();
        assert_eq!(account.wallet, 0.0);
        assert_eq!(account.bank, 10.0);

        let err = economy
            .transfer(1, "wallet", "bank", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EconomyError::InsufficientFunds { available, .. } if available == 0.0
        ));

        cleanup(economy).await;
    }

    #[tokio::test]
    #[ignore = "requires a running MongoDB (MONGODB_TEST_URL)"]
    async fn test_all_accounts() {
        let economy = economy("all_accounts").await;

        for id in [1i64, 2, 3] {
            economy.add_money(id, "bank", id as f64 * 10.0).await.unwrap();
        }

        let accounts: Vec<Account> = economy.all_accounts().try_collect().await.unwrap();
        let mut banks: Vec<f64> = accounts.iter().map(|a| a.bank).collect();
        banks.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(banks, vec![10.0, 20.0, 30.0]);

        cleanup(economy).await;
    }
}
