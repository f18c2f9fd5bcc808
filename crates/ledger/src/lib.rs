#![deny(missing_docs)]
#![deny(unreachable_pub)]

//! Storage and orchestration of the reward ledger.
//!
//! A [`Store`] persists accounts and runs units of work against the
//! [`LedgerMut`](w2e_model::LedgerMut) trait. The [`Engine`] resolves the
//! scope of every operation, applies the reward policy through the model
//! actions and logs the outcome.

/// Error type.
pub mod error;

/// Stores.
pub mod store;

/// Postback ingestion.
pub mod ingest;

/// Ledger engine.
pub mod engine;

pub use engine::Engine;
pub use error::Error;
pub use ingest::{PostbackEvent, PostbackQuery, SharedSecret};
pub use store::{memory::MemoryStore, Scope, Store};

#[cfg(feature = "sqlite")]
pub use store::sqlite::SqliteStore;

/// Alias for result.
pub type Result<T> = std::result::Result<T, Error>;
