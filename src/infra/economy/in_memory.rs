// In-memory implementation of AccountStore.
//
// Nothing is persisted. Used by the service tests and handy for bots that
// don't need their economy to survive a restart.

use crate::core::economy::{Account, AccountId, AccountStore, BalanceField, EconomyError, Item};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};

/// DashMap-backed store. Each entry operation holds the shard lock, so
/// every mutation is atomic with respect to other tasks.
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountId, Account>,
}

impl InMemoryAccountStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    fn with_account<T>(
        &self,
        id: &AccountId,
        f: impl FnOnce(&mut Account) -> T,
    ) -> Result<T, EconomyError> {
        self.accounts
            .get_mut(id)
            .map(|mut entry| f(entry.value_mut()))
            .ok_or_else(|| EconomyError::account_not_found(id))
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn ensure_registered(&self, id: &AccountId) -> Result<(), EconomyError> {
        self.accounts
            .entry(id.clone())
            .or_insert_with(|| Account::new(id.clone()));
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, EconomyError> {
        Ok(self.accounts.get(id).map(|entry| entry.value().clone()))
    }

    async fn delete_account(&self, id: &AccountId) -> Result<(), EconomyError> {
        self.accounts.remove(id);
        Ok(())
    }

    fn all_accounts(&self) -> BoxStream<'_, Result<Account, EconomyError>> {
        // Snapshot so no shard lock is held while the caller awaits
        let snapshot: Vec<Account> = self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }

    async fn increment_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        self.with_account(id, |account| *account.balance_mut(field) += amount)
    }

    async fn decrement_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
        clamp_at_zero: bool,
    ) -> Result<(), EconomyError> {
        self.with_account(id, |account| {
            let balance = account.balance_mut(field);
            *balance -= amount;
            if clamp_at_zero && *balance < 0.0 {
                *balance = 0.0;
            }
        })
    }

    async fn withdraw_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<bool, EconomyError> {
        let Some(mut entry) = self.accounts.get_mut(id) else {
            return Ok(false);
        };
        let balance = entry.value_mut().balance_mut(field);
        if *balance < amount {
            return Ok(false);
        }
        *balance -= amount;
        Ok(true)
    }

    async fn set_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError> {
        self.with_account(id, |account| *account.balance_mut(field) = amount)
    }

    async fn insert_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        self.with_account(id, |account| {
            if account.has_item(name) {
                false
            } else {
                account.items.push(Item::new(account.id.clone(), name));
                true
            }
        })
    }

    async fn delete_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError> {
        let Some(mut entry) = self.accounts.get_mut(id) else {
            return Ok(false);
        };
        let items = &mut entry.value_mut().items;
        match items.iter().position(|item| item.name == name) {
            Some(index) => {
                items.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// Default trait implementation for convenient initialization
impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}
