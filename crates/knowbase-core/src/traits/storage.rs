//! Storage provider trait — the uniform contract every backend implements.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{KnowledgeEntry, ProviderType, SearchResult};

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Registry key of this backend.
    fn kind(&self) -> ProviderType;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Liveness probe. Never fails and never mutates remote state.
    async fn is_available(&self) -> bool;

    /// Every stored entry, optionally restricted to one owner.
    async fn load_entries(&self, owner: Option<&str>) -> Result<Vec<KnowledgeEntry>>;

    /// Ranked matches, best first. Failures are logged and yield an empty list.
    async fn search_entries(&self, query: &str) -> Vec<SearchResult>;

    /// Store a new entry. Returns false when nothing was written: the id is
    /// already stored, or another entry has the same question (compared
    /// trimmed and case-insensitively).
    async fn add_entry(&self, entry: KnowledgeEntry) -> Result<bool>;

    /// Replace an entry by id, keeping `created_at`. Unknown ids fall back to
    /// `add_entry`. Returns false when the new question belongs to another entry.
    async fn update_entry(&self, entry: KnowledgeEntry) -> Result<bool>;

    async fn delete_entry(&self, id: &str) -> Result<()>;
}
