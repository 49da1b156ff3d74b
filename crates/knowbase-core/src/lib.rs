//! # Knowbase Core
//!
//! Shared types, the storage provider contract, configuration, durable state,
//! and the retry combinator used by the HTTP backends.

pub mod config;
pub mod error;
pub mod payload;
pub mod retry;
pub mod state;
pub mod traits;
pub mod types;

pub use config::KnowbaseConfig;
pub use error::{KnowbaseError, Result};
pub use traits::StorageProvider;
pub use types::{EntryType, KnowledgeEntry, ProviderConfig, ProviderType, SearchResult};
