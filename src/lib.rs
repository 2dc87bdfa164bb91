// Economy storage for chat bots.
//
// **Architecture Overview:**
// - `core/` = Business logic (backend-agnostic): accounts, balance policy, inventories
// - `infra/` = Implementations of core traits (SQLite, MongoDB, in-memory)
//
// Command handlers own an `Economy<S>` and call it directly; nothing here
// knows about Discord.

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub use crate::core::economy::{
    Account, AccountId, AccountStore, BalanceField, Economy, EconomyConfig, EconomyError, Item,
};
pub use crate::infra::economy::{
    InMemoryAccountStore, MongoAccountStore, MongoConfig, SqliteAccountStore, SqliteConfig,
};
