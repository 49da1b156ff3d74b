//! Local provider — entries kept as one JSON array in the state store.
//!
//! Records that fail to decode are skipped (with a warning) when reading,
//! but preserved verbatim when the blob is rewritten.

pub mod scoring;

use async_trait::async_trait;
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::state::{StateStore, ENTRIES_KEY};
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::{KnowledgeEntry, ProviderType, SearchResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct LocalProvider {
    state: Arc<StateStore>,
    /// Serializes read-modify-write cycles on the blob.
    write_lock: Mutex<()>,
}

/// Raw stored records plus the ones that decoded cleanly.
struct Snapshot {
    records: Vec<Value>,
    /// (index into `records`, decoded entry)
    entries: Vec<(usize, KnowledgeEntry)>,
}

impl Snapshot {
    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|(_, e)| e.id == id)
    }

    /// Whether an entry other than `id` already uses this question.
    fn question_taken(&self, key: &str, id: &str) -> bool {
        self.entries
            .iter()
            .any(|(_, e)| e.id != id && e.question_key() == key)
    }
}

impl LocalProvider {
    pub fn new(state: Arc<StateStore>) -> Self {
        Self {
            state,
            write_lock: Mutex::new(()),
        }
    }

    fn read_snapshot(&self) -> Result<Snapshot> {
        let Some(blob) = self.state.get(ENTRIES_KEY)? else {
            return Ok(Snapshot { records: Vec::new(), entries: Vec::new() });
        };
        if blob.trim().is_empty() {
            return Ok(Snapshot { records: Vec::new(), entries: Vec::new() });
        }
        let records: Vec<Value> = serde_json::from_str(&blob)
            .map_err(|e| KnowbaseError::Data(format!("stored entries are not a JSON array: {e}")))?;

        let mut entries = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            match serde_json::from_value::<KnowledgeEntry>(record.clone())
                .map_err(KnowbaseError::from)
                .and_then(|entry| entry.validate().map(|_| entry))
            {
                Ok(entry) => entries.push((idx, entry)),
                Err(e) => tracing::warn!("⚠️ Skipping malformed stored entry #{idx}: {e}"),
            }
        }
        Ok(Snapshot { records, entries })
    }

    fn write_records(&self, records: &[Value]) -> Result<()> {
        let blob = serde_json::to_string(records)?;
        self.state.set(ENTRIES_KEY, &blob)
    }

    /// Append under the write lock. Returns false for duplicates.
    fn insert_locked(&self, mut entry: KnowledgeEntry) -> Result<bool> {
        entry.prepare_new()?;
        let mut snapshot = self.read_snapshot()?;
        if snapshot.position(&entry.id).is_some() {
            tracing::debug!("Entry id {} already stored, add ignored", entry.id);
            return Ok(false);
        }
        if snapshot.question_taken(&entry.question_key(), &entry.id) {
            tracing::debug!("Duplicate question ignored: {}", entry.question);
            return Ok(false);
        }
        snapshot.records.push(serde_json::to_value(&entry)?);
        self.write_records(&snapshot.records)?;
        tracing::debug!("📝 Stored entry {} locally", entry.id);
        Ok(true)
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn kind(&self) -> ProviderType {
        ProviderType::Local
    }

    fn name(&self) -> &str {
        "local"
    }

    async fn is_available(&self) -> bool {
        self.state.is_healthy()
    }

    async fn load_entries(&self, owner: Option<&str>) -> Result<Vec<KnowledgeEntry>> {
        let snapshot = self.read_snapshot()?;
        Ok(snapshot
            .entries
            .into_iter()
            .map(|(_, e)| e)
            .filter(|e| owner.map(|o| e.belongs_to(o)).unwrap_or(true))
            .collect())
    }

    async fn search_entries(&self, query: &str) -> Vec<SearchResult> {
        match self.read_snapshot() {
            Ok(snapshot) => {
                let entries = snapshot.entries.into_iter().map(|(_, e)| e).collect();
                scoring::rank_entries(query, entries)
            }
            Err(e) => {
                tracing::error!("❌ Local search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn add_entry(&self, entry: KnowledgeEntry) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        self.insert_locked(entry)
    }

    async fn update_entry(&self, mut entry: KnowledgeEntry) -> Result<bool> {
        entry.validate()?;
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read_snapshot()?;

        let Some(pos) = snapshot.position(&entry.id).filter(|_| !entry.id.is_empty()) else {
            tracing::debug!("Update target '{}' not found, adding instead", entry.id);
            return self.insert_locked(entry);
        };
        if snapshot.question_taken(&entry.question_key(), &entry.id) {
            tracing::debug!("Update of {} ignored, question already used: {}", entry.id, entry.question);
            return Ok(false);
        }

        let (record_idx, existing) = &snapshot.entries[pos];
        entry.prepare_replacement(existing)?;
        snapshot.records[*record_idx] = serde_json::to_value(&entry)?;
        self.write_records(&snapshot.records)?;
        Ok(true)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut snapshot = self.read_snapshot()?;
        let doomed: Vec<usize> = snapshot
            .entries
            .iter()
            .filter(|(_, e)| e.id == id)
            .map(|(idx, _)| *idx)
            .collect();
        if doomed.is_empty() {
            tracing::debug!("Delete: entry {id} not present locally");
            return Ok(());
        }
        let mut idx = 0;
        snapshot.records.retain(|_| {
            let keep = !doomed.contains(&idx);
            idx += 1;
            keep
        });
        self.write_records(&snapshot.records)
    }
}
