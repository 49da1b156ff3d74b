//! # Knowbase Providers
//!
//! Storage backends for the knowledge base and the manager that picks one.
//!
//! - `local` keeps everything in the SQLite state store and ranks with a
//!   keyword/fuzzy scorer.
//! - `search` indexes entries in an Elasticsearch-compatible service.
//! - `vector` stores embeddings in a Milvus-compatible vector database.
//!
//! `api_call` executes API-call entries and follows their `next_step` links.

pub mod api_call;
pub mod embedding;
pub mod http;
pub mod local;
pub mod manager;
pub mod search_service;
pub mod vector;

#[cfg(test)]
mod test_support;

use knowbase_core::config::KnowbaseConfig;
use knowbase_core::error::Result;
use knowbase_core::state::StateStore;
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::ProviderType;
use std::sync::Arc;

pub use api_call::{follow_api_chain, ApiCaller, ApiResponse};
pub use local::LocalProvider;
pub use manager::{ListenerHandle, ProviderManager};
pub use search_service::SearchServiceProvider;
pub use vector::VectorServiceProvider;

/// Create one provider from configuration.
///
/// Remote providers are built even when their credentials are missing; they
/// then report themselves unavailable instead of failing here.
pub fn create_provider(
    kind: ProviderType,
    config: &KnowbaseConfig,
    state: Arc<StateStore>,
) -> Result<Arc<dyn StorageProvider>> {
    Ok(match kind {
        ProviderType::Local => Arc::new(LocalProvider::new(state)),
        ProviderType::Search => Arc::new(SearchServiceProvider::from_config(config)?),
        ProviderType::Vector => Arc::new(VectorServiceProvider::from_config(config)?),
    })
}

/// Create every known provider, sharing one state store.
pub fn create_all(
    config: &KnowbaseConfig,
    state: Arc<StateStore>,
) -> Result<Vec<Arc<dyn StorageProvider>>> {
    available_providers()
        .iter()
        .map(|kind| create_provider(*kind, config, state.clone()))
        .collect()
}

/// Build a manager over every known provider.
pub fn create_manager(config: &KnowbaseConfig, state: Arc<StateStore>) -> Result<ProviderManager> {
    let providers = create_all(config, state.clone())?;
    ProviderManager::new(state, providers, config.default_provider)
}

/// List all provider types this build supports.
pub fn available_providers() -> &'static [ProviderType] {
    &ProviderType::ALL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_manager_starts_on_local_without_credentials() {
        let config = KnowbaseConfig::default();
        let state = Arc::new(StateStore::in_memory().unwrap());
        let manager = create_manager(&config, state).unwrap();
        assert_eq!(manager.active_type(), ProviderType::Local);
        manager.initialize().await.unwrap();
        assert_eq!(manager.active().name(), "local");
    }

    #[test]
    fn test_create_all_covers_every_kind() {
        let config = KnowbaseConfig::default();
        let state = Arc::new(StateStore::in_memory().unwrap());
        let kinds: Vec<_> = create_all(&config, state).unwrap().iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, ProviderType::ALL);
    }
}
