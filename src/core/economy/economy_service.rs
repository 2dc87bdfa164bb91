// Economy system core - balance bookkeeping
//
// This module contains the domain logic for bank/wallet balances. Stores only
// know how to persist; every argument check and the positive-balance policy
// live here so all backends behave identically.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use super::account::{Account, AccountId, BalanceField};

// ============================================================================
// ERRORS
// ============================================================================

/// Boxed backend-native error (`sqlx::Error`, `mongodb::error::Error`, ...).
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum EconomyError {
    /// Account or item absent where one was required.
    #[error("{0} not found")]
    NotFound(String),

    #[error("Account {account} already has item '{item}'")]
    ItemAlreadyExists { account: AccountId, item: String },

    #[error("Invalid field: {0}. Must be one of: bank, wallet")]
    InvalidField(String),

    #[error("Invalid amount {0}. Amount cannot be less than 0")]
    NegativeAmount(f64),

    #[error("Positive balance is enforced; balance cannot be set to {0}")]
    BalancePolicyViolation(f64),

    #[error("Invalid amount {0}. Amount must be a finite number")]
    InvalidAmount(f64),

    #[error("Insufficient funds: need {required}, but only have {available}")]
    InsufficientFunds { required: f64, available: f64 },

    /// The backend failed. The native error is kept as the source.
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl EconomyError {
    pub fn store(err: impl Into<StoreError>) -> Self {
        EconomyError::Store(err.into())
    }

    pub(crate) fn account_not_found(id: &AccountId) -> Self {
        EconomyError::NotFound(format!("Account {}", id))
    }

    pub(crate) fn item_not_found(id: &AccountId, item: &str) -> Self {
        EconomyError::NotFound(format!("Item '{}' for account {}", item, id))
    }
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Persistence contract shared by the SQLite, MongoDB and in-memory stores.
///
/// Implementations perform each mutation as a single backend operation and do
/// no argument validation of their own; `Economy` is the only caller that
/// enforces the field set, amount sign and balance policy.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a zeroed account if none exists. Never fails on an existing id.
    async fn ensure_registered(&self, id: &AccountId) -> Result<(), EconomyError>;

    /// Fetch an account with its inventory, `None` if never registered.
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, EconomyError>;

    /// Remove the account and every item it owns. Absent ids are ignored.
    async fn delete_account(&self, id: &AccountId) -> Result<(), EconomyError>;

    /// Lazily yield every stored account, inventory included.
    fn all_accounts(&self) -> BoxStream<'_, Result<Account, EconomyError>>;

    /// `field = field + amount`
    async fn increment_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError>;

    /// `field = field - amount`, or `max(field - amount, 0)` when
    /// `clamp_at_zero` is set.
    async fn decrement_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
        clamp_at_zero: bool,
    ) -> Result<(), EconomyError>;

    /// `field = field - amount` only if `field >= amount`, as one operation.
    /// Returns false, leaving the balance untouched, when funds don't cover
    /// it or the account doesn't exist.
    async fn withdraw_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<bool, EconomyError>;

    /// `field = amount`
    async fn set_balance(
        &self,
        id: &AccountId,
        field: BalanceField,
        amount: f64,
    ) -> Result<(), EconomyError>;

    /// Append an item unless the account already holds one with that name.
    /// Returns false if it was a duplicate.
    async fn insert_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError>;

    /// Remove the item with that name.
    /// Returns false if the account didn't have it.
    async fn delete_item(&self, id: &AccountId, name: &str) -> Result<bool, EconomyError>;
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the economy system.
#[derive(Debug, Clone)]
pub struct EconomyConfig {
    /// Refuse negative `set_money` and clamp underflowing `remove_money` to 0.
    pub ensure_positive_balance: bool,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            ensure_positive_balance: true,
        }
    }
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// The main service for economy operations.
///
/// Generic over S: AccountStore so we can swap backends.
pub struct Economy<S: AccountStore> {
    pub(super) store: S,
    config: EconomyConfig,
}

impl<S: AccountStore> Economy<S> {
    /// Create a new economy service with the default configuration.
    pub fn new(store: S) -> Self {
        Self {
            store,
            config: EconomyConfig::default(),
        }
    }

    /// Create a new economy service with custom configuration.
    pub fn new_with_config(store: S, config: EconomyConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Account registry
    // ------------------------------------------------------------------------

    /// Create a zero-balance account unless one already exists.
    pub async fn ensure_registered(&self, id: impl Into<AccountId>) -> Result<(), EconomyError> {
        let id = id.into();
        self.store.ensure_registered(&id).await
    }

    /// Fetch balances and inventory. Unlike every mutator this does not
    /// register unknown ids.
    pub async fn get_account(&self, id: impl Into<AccountId>) -> Result<Account, EconomyError> {
        let id = id.into();
        self.store
            .get_account(&id)
            .await?
            .ok_or_else(|| EconomyError::account_not_found(&id))
    }

    /// Delete an account and its items. Unknown ids are not an error.
    pub async fn delete_account(&self, id: impl Into<AccountId>) -> Result<(), EconomyError> {
        let id = id.into();
        self.store.delete_account(&id).await?;
        tracing::info!(account = %id, "Deleted economy account");
        Ok(())
    }

    /// Stream every account in the store.
    ///
    /// Cost grows with the whole store; meant for exports and admin tooling,
    /// not command handlers.
    pub fn all_accounts(&self) -> BoxStream<'_, Result<Account, EconomyError>> {
        self.store.all_accounts()
    }

    // ------------------------------------------------------------------------
    // Balance mutations
    // ------------------------------------------------------------------------

    /// Add `amount` to `field` ("bank" or "wallet").
    pub async fn add_money(
        &self,
        id: impl Into<AccountId>,
        field: &str,
        amount: f64,
    ) -> Result<(), EconomyError> {
        let field: BalanceField = field.parse()?;
        check_amount(amount)?;

        let id = id.into();
        self.store.ensure_registered(&id).await?;
        self.store.increment_balance(&id, field, amount).await?;

        tracing::debug!(account = %id, field = field.as_str(), amount, "Added money");
        Ok(())
    }

    /// Subtract `amount` from `field`.
    ///
    /// With positive-balance enforcement on, a removal larger than the
    /// current balance leaves the field at exactly zero.
    pub async fn remove_money(
        &self,
        id: impl Into<AccountId>,
        field: &str,
        amount: f64,
    ) -> Result<(), EconomyError> {
        let field: BalanceField = field.parse()?;
        check_amount(amount)?;

        let id = id.into();
        self.store.ensure_registered(&id).await?;
        self.store
            .decrement_balance(&id, field, amount, self.config.ensure_positive_balance)
            .await?;

        tracing::debug!(account = %id, field = field.as_str(), amount, "Removed money");
        Ok(())
    }

    /// Overwrite `field` with `amount`.
    ///
    /// A negative amount under enforcement is rejected rather than clamped.
    pub async fn set_money(
        &self,
        id: impl Into<AccountId>,
        field: &str,
        amount: f64,
    ) -> Result<(), EconomyError> {
        let field: BalanceField = field.parse()?;
        if !amount.is_finite() {
            return Err(EconomyError::InvalidAmount(amount));
        }
        if self.config.ensure_positive_balance && amount < 0.0 {
            return Err(EconomyError::BalancePolicyViolation(amount));
        }

        let id = id.into();
        self.store.ensure_registered(&id).await?;
        self.store.set_balance(&id, field, amount).await?;

        tracing::debug!(account = %id, field = field.as_str(), amount, "Set money");
        Ok(())
    }

    /// Move `amount` between the two balance fields of one account, e.g.
    /// a wallet -> bank deposit. Returns the updated account.
    ///
    /// Under enforcement the source must hold at least `amount`; the check and
    /// the withdrawal are one conditional write, so concurrent transfers can't
    /// both spend the same funds. The deposit is a second statement.
    pub async fn transfer(
        &self,
        id: impl Into<AccountId>,
        from: &str,
        to: &str,
        amount: f64,
    ) -> Result<Account, EconomyError> {
        let from: BalanceField = from.parse()?;
        let to: BalanceField = to.parse()?;
        check_amount(amount)?;

        let id = id.into();
        self.store.ensure_registered(&id).await?;

        if from != to {
            if self.config.ensure_positive_balance {
                if !self.store.withdraw_balance(&id, from, amount).await? {
                    let available = self.get_account(&id).await?.balance(from);
                    return Err(EconomyError::InsufficientFunds {
                        required: amount,
                        available,
                    });
                }
            } else {
                self.store.decrement_balance(&id, from, amount, false).await?;
            }
            self.store.increment_balance(&id, to, amount).await?;

            tracing::debug!(
                account = %id,
                from = from.as_str(),
                to = to.as_str(),
                amount,
                "Transferred money"
            );
        }

        self.get_account(&id).await
    }
}

fn check_amount(amount: f64) -> Result<(), EconomyError> {
    if !amount.is_finite() {
        return Err(EconomyError::InvalidAmount(amount));
    }
    if amount < 0.0 {
        return Err(EconomyError::NegativeAmount(amount));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
