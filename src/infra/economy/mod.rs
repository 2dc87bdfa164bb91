// Economy infrastructure - store implementations

mod in_memory;
mod mongo_account_store;
mod sqlite_account_store;

pub use in_memory::InMemoryAccountStore;
pub use mongo_account_store::{MongoAccountStore, MongoConfig};
pub use sqlite_account_store::{SqliteAccountStore, SqliteConfig};
