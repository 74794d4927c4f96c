//! Linked accounts and their on-disk store

mod model;
mod store;

pub use model::{
    Account, AccountIndex, AccountSummary, DEFAULT_EXPIRES_IN, ExportBundle, ExportEntry,
    INDEX_VERSION, Provider, TokenData,
};
pub use store::{AccountStore, ListedAccount, ReconcileReport};
