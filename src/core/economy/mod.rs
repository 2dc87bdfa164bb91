// Economy module - domain logic for balances and inventories

pub mod account;
mod economy_service;
mod inventory_service;

pub use account::{Account, AccountId, BalanceField, Item};
pub use economy_service::{AccountStore, Economy, EconomyConfig, EconomyError, StoreError};
