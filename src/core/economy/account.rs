// Domain models for economy accounts
//
// These types are shared by every store implementation. They carry no
// storage details apart from the optional SQLite item id.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::EconomyError;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// External identifier of an account.
///
/// Chat platforms hand out either numeric snowflakes or opaque strings, so
/// both are accepted. `Int(42)` and `Text("42")` are different accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountId {
    Int(i64),
    Text(String),
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Int(id) => write!(f, "{}", id),
            AccountId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId::Int(id)
    }
}

impl From<i32> for AccountId {
    fn from(id: i32) -> Self {
        AccountId::Int(id as i64)
    }
}

// Ids above i64::MAX are kept as their decimal text rather than wrapped.
impl From<u64> for AccountId {
    fn from(id: u64) -> Self {
        i64::try_from(id)
            .map(AccountId::Int)
            .unwrap_or_else(|_| AccountId::Text(id.to_string()))
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId::Text(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId::Text(id)
    }
}

impl From<&AccountId> for AccountId {
    fn from(id: &AccountId) -> Self {
        id.clone()
    }
}

// ============================================================================
// BALANCE FIELDS
// ============================================================================

/// The closed set of balance columns an account carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceField {
    Bank,
    Wallet,
}

impl BalanceField {
    /// Column / document key name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceField::Bank => "bank",
            BalanceField::Wallet => "wallet",
        }
    }
}

impl fmt::Display for BalanceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BalanceField {
    type Err = EconomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bank" => Ok(BalanceField::Bank),
            "wallet" => Ok(BalanceField::Wallet),
            other => Err(EconomyError::InvalidField(other.to_string())),
        }
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// An inventory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Storage row id. Only the SQLite store fills this in, and it is not
    /// stable across delete/re-add.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    /// The account holding this item.
    pub owner_id: AccountId,
    pub name: String,
}

impl Item {
    pub fn new(owner_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id,
            name: name.into(),
        }
    }
}

/// A user's balances and inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub bank: f64,
    pub wallet: f64,
    pub items: Vec<Item>,
}

impl Account {
    /// A freshly registered account: zero balances, empty inventory.
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            bank: 0.0,
            wallet: 0.0,
            items: Vec::new(),
        }
    }

    pub fn balance(&self, field: BalanceField) -> f64 {
        match field {
            BalanceField::Bank => self.bank,
            BalanceField::Wallet => self.wallet,
        }
    }

    pub fn balance_mut(&mut self, field: BalanceField) -> &mut f64 {
        match field {
            BalanceField::Bank => &mut self.bank,
            BalanceField::Wallet => &mut self.wallet,
        }
    }

    /// Exact, case-sensitive name match.
    pub fn has_item(&self, name: &str) -> bool {
        self.items.iter().any(|item| item.name == name)
    }

    pub fn item_names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parsing() {
        assert_eq!("bank".parse::<BalanceField>().unwrap(), BalanceField::Bank);
        assert_eq!(
            "wallet".parse::<BalanceField>().unwrap(),
            BalanceField::Wallet
        );

        // No normalization
        let err = "Bank".parse::<BalanceField>().unwrap_err();
        assert!(matches!(err, EconomyError::InvalidField(f) if f == "Bank"));
        assert!("items".parse::<BalanceField>().is_err());
    }

    #[test]
    fn test_account_id_kinds_are_distinct() {
        assert_ne!(AccountId::from(42i64), AccountId::from("42"));
        assert_eq!(AccountId::from(42u64), AccountId::Int(42));
        assert_eq!(AccountId::from("alice").to_string(), "alice");
    }

    #[test]
    fn test_large_user_ids() {
        let snowflake = 1234567890123456789u64;
        assert_eq!(
            AccountId::from(snowflake),
            AccountId::Int(1234567890123456789)
        );
        assert_eq!(
            AccountId::from(i64::MAX as u64),
            AccountId::Int(i64::MAX)
        );

        // Past i64 range: no wrap to a negative id
        let id = AccountId::from(u64::MAX);
        assert_eq!(id, AccountId::Text("18446744073709551615".to_string()));
        assert_ne!(id, AccountId::Int(-1));
        assert_eq!(id.to_string(), u64::MAX.to_string());
    }

    #[test]
    fn test_account_id_serializes_untagged() {
        let json = serde_json::to_string(&AccountId::Int(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&AccountId::from("bob")).unwrap();
        assert_eq!(json, "\"bob\"");

        let parsed: AccountId = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, AccountId::Int(12));
    }

    #[test]
    fn test_item_lookup_is_case_sensitive() {
        let mut account = Account::new(AccountId::Int(1));
        account.items.push(Item::new(AccountId::Int(1), "Sword"));

        assert!(account.has_item("Sword"));
        assert!(!account.has_item("sword"));
        assert_eq!(account.item_names(), vec!["Sword"]);
    }
}
