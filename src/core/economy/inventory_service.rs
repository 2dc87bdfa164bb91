// Inventory operations for economy accounts
//
// Items are plain names. An account never holds two items with the same
// name; names are compared exactly, with no case folding.

use super::account::AccountId;
use super::economy_service::{AccountStore, Economy, EconomyError};

impl<S: AccountStore> Economy<S> {
    /// Add an item to the account's inventory, registering the account
    /// first if needed.
    pub async fn add_item(
        &self,
        id: impl Into<AccountId>,
        name: &str,
    ) -> Result<(), EconomyError> {
        let id = id.into();
        self.store.ensure_registered(&id).await?;

        if !self.store.insert_item(&id, name).await? {
            return Err(EconomyError::ItemAlreadyExists {
                account: id,
                item: name.to_string(),
            });
        }

        tracing::debug!(account = %id, item = name, "Added item");
        Ok(())
    }

    /// Remove an item from the account's inventory.
    pub async fn remove_item(
        &self,
        id: impl Into<AccountId>,
        name: &str,
    ) -> Result<(), EconomyError> {
        let id = id.into();

        if !self.store.delete_item(&id, name).await? {
            return Err(EconomyError::item_not_found(&id, name));
        }

        tracing::debug!(account = %id, item = name, "Removed item");
        Ok(())
    }

    /// Check if the account holds an item. Unknown accounts hold nothing.
    pub async fn has_item(
        &self,
        id: impl Into<AccountId>,
        name: &str,
    ) -> Result<bool, EconomyError> {
        let id = id.into();
        Ok(self
            .store
            .get_account(&id)
            .await?
            .is_some_and(|account| account.has_item(name)))
    }
}

#[cfg(test)]
mod tests {
    use crate::core::economy::{Economy, EconomyError};
    use crate::infra::economy::InMemoryAccountStore;

    fn economy() -> Economy<InMemoryAccountStore> {
        Economy::new(InMemoryAccountStore::new())
    }

    #[tokio::test]
    async fn test_add_and_has_item() {
        let economy = economy();

        // Initially should not have item
        assert!(!economy.has_item(1, "sword").await.unwrap());

        economy.add_item(1, "sword").await.unwrap();

        assert!(economy.has_item(1, "sword").await.unwrap());
        assert!(!economy.has_item(1, "Sword").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_item_rejected() {
        let economy = economy();

        economy.add_item(1, "sword").await.unwrap();
        let err = economy.add_item(1, "sword").await.unwrap_err();
        assert!(matches!(err, EconomyError::ItemAlreadyExists { ref item, .. } if item == "sword"));

        let account = economy.get_account(1).await.unwrap();
        assert_eq!(account.item_names(), vec!["sword"]);
    }

    #[tokio::test]
    async fn test_remove_item() {
        let economy = economy();

        economy.add_item(1, "sword").await.unwrap();
        economy.add_item(1, "potion").await.unwrap();
        economy.remove_item(1, "sword").await.unwrap();

        let account = economy.get_account(1).await.unwrap();
        assert_eq!(account.item_names(), vec!["potion"]);

        // Removing again should fail and leave the inventory alone
        let err = economy.remove_item(1, "sword").await.unwrap_err();
        assert!(matches!(err, EconomyError::NotFound(_)));
        let account = economy.get_account(1).await.unwrap();
        assert_eq!(account.item_names(), vec!["potion"]);
    }

    #[tokio::test]
    async fn test_remove_item_from_unknown_account() {
        let economy = economy();

        let err = economy.remove_item(404, "sword").await.unwrap_err();
        assert!(matches!(err, EconomyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inventories_are_independent() {
        let economy = economy();

        economy.add_item("a", "sword").await.unwrap();
        economy.add_item("b", "sword").await.unwrap();
        economy.remove_item("a", "sword").await.unwrap();

        assert!(!economy.has_item("a", "sword").await.unwrap());
        assert!(economy.has_item("b", "sword").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_account_drops_items() {
        let economy = economy();

        economy.add_item(2, "x").await.unwrap();
        economy.add_item(2, "y").await.unwrap();
        economy.delete_account(2).await.unwrap();

        assert!(economy.get_account(2).await.is_err());

        // Re-registering starts from an empty inventory
        economy.ensure_registered(2).await.unwrap();
        assert!(economy.get_account(2).await.unwrap().items.is_empty());
    }
}
