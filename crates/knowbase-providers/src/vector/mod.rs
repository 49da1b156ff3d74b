//! Vector-service provider: entries stored with embeddings in a Milvus-style
//! collection, retrieved by similarity search over the REST v2 API.
//!
//! Every response carries `{code, message, data}`; a non-zero `code` is an
//! error even when the HTTP status is 200. The collection is created and
//! loaded lazily, then a cached flag skips the lifecycle checks.

pub mod readiness;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use knowbase_core::config::{KnowbaseConfig, VectorServiceConfig};
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::retry::RetryPolicy;
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::{rank_results, KnowledgeEntry, ProviderType, SearchResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::embedding::EmbeddingClient;
use crate::http;
use crate::local::scoring::significant_words;
use readiness::{poll_until_loaded, LoadState, PollPolicy};

const API_PREFIX: &str = "/v2/vectordb";

/// VarChar widths (bytes) for the scalar fields.
const ID_MAX: usize = 64;
const QUESTION_MAX: usize = 2048;
const ANSWER_MAX: usize = 65_535;
const ENTRY_TYPE_MAX: usize = 16;
const OWNER_MAX: usize = 256;
const FILE_NAME_MAX: usize = 512;
const FILE_TYPE_MAX: usize = 64;
const TIMESTAMP_MAX: usize = 40;
const KEYWORD_MAX: usize = 256;
const KEYWORDS_CAPACITY: usize = 64;

const SCALAR_FIELDS: &[&str] = &[
    "id",
    "question",
    "answer",
    "keywords",
    "entry_type",
    "owner",
    "file_name",
    "file_type",
    "created_at",
    "updated_at",
];

/// An entry as stored, with its embedding.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub entry: KnowledgeEntry,
    pub embedding: Vec<f32>,
}

pub struct VectorServiceProvider {
    config: VectorServiceConfig,
    retry: RetryPolicy,
    client: reqwest::Client,
    embedder: EmbeddingClient,
    /// Set once the collection exists and reports Loaded.
    loaded: AtomicBool,
    setup_lock: Mutex<()>,
}

impl VectorServiceProvider {
    pub fn new(
        config: &VectorServiceConfig,
        embedder: EmbeddingClient,
        retry: RetryPolicy,
        client: reqwest::Client,
    ) -> Self {
        Self {
            config: config.resolved(),
            retry,
            client,
            embedder,
            loaded: AtomicBool::new(false),
            setup_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &KnowbaseConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout())?;
        let retry = config.retry.policy();
        let embedder =
            EmbeddingClient::new(&config.embedding, config.vector.dimension, retry, client.clone());
        Ok(Self::new(&config.vector, embedder, retry, client))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}/{}", self.config.endpoint, API_PREFIX, path)
    }

    fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.config.poll_interval(),
            max_attempts: self.config.max_poll_attempts,
        }
    }

    /// POST `body` to `path` with retry and unwrap the `data` member.
    async fn call(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.url(path);
        let resp = http::send_json(&self.retry, path, || {
            self.client
                .post(&url)
                .bearer_auth(&self.config.token)
                .json(&body)
        })
        .await?;
        unwrap_data(path, resp)
    }

    async fn describe(&self) -> Result<LoadState> {
        let data = self
            .call("collections/describe", json!({ "collectionName": self.config.collection }))
            .await?;
        let raw = data
            .get("load")
            .or_else(|| data.get("loadState"))
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(LoadState::from_remote(raw))
    }

    fn collection_schema(&self) -> Value {
        let varchar = |name: &str, max: usize| {
            json!({
                "fieldName": name,
                "dataType": "VarChar",
                "elementTypeParams": { "max_length": max.to_string() }
            })
        };
        let mut id = varchar("id", ID_MAX);
        id["isPrimary"] = json!(true);

        json!({
            "autoId": false,
            "enableDynamicField": false,
            "fields": [
                id,
                varchar("question", QUESTION_MAX),
                varchar("question_key", QUESTION_MAX),
                varchar("answer", ANSWER_MAX),
                {
                    "fieldName": "keywords",
                    "dataType": "Array",
                    "elementDataType": "VarChar",
                    "elementTypeParams": {
                        "max_capacity": KEYWORDS_CAPACITY.to_string(),
                        "max_length": KEYWORD_MAX.to_string()
                    }
                },
                varchar("entry_type", ENTRY_TYPE_MAX),
                varchar("owner", OWNER_MAX),
                varchar("file_name", FILE_NAME_MAX),
                varchar("file_type", FILE_TYPE_MAX),
                varchar("created_at", TIMESTAMP_MAX),
                varchar("updated_at", TIMESTAMP_MAX),
                {
                    "fieldName": "embedding",
                    "dataType": "FloatVector",
                    "elementTypeParams": { "dim": self.config.dimension.to_string() }
                }
            ]
        })
    }

    async fn create_collection(&self) -> Result<()> {
        let name = &self.config.collection;
        tracing::info!("🧱 Creating vector collection '{name}' (dim={})", self.config.dimension);
        self.call(
            "collections/create",
            json!({ "collectionName": name, "schema": self.collection_schema() }),
        )
        .await?;
        self.call(
            "indexes/create",
            json!({
                "collectionName": name,
                "indexParams": [{
                    "fieldName": "embedding",
                    "indexName": "embedding_idx",
                    "metricType": self.config.metric,
                    "indexType": self.config.index_type,
                    "params": { "nlist": self.config.nlist }
                }]
            }),
        )
        .await?;
        Ok(())
    }

    /// Create the collection if missing, load it, and wait for readiness.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }
        self.config.check()?;
        let _guard = self.setup_lock.lock().await;
        if self.loaded.load(Ordering::Acquire) {
            return Ok(());
        }

        let state = match self.describe().await {
            Ok(state) => state,
            Err(e) if e.is_not_found() => {
                self.create_collection().await?;
                LoadState::Unloaded
            }
            Err(e) => return Err(e),
        };

        if !state.is_loaded() {
            let name = &self.config.collection;
            self.call("collections/load", json!({ "collectionName": name }))
                .await?;
            let what = format!("collection '{name}'");
            poll_until_loaded(self.poll_policy(), &what, || self.describe()).await?;
        }

        self.loaded.store(true, Ordering::Release);
        tracing::info!("✅ Vector collection '{}' ready", self.config.collection);
        Ok(())
    }

    async fn query(&self, filter: String, limit: usize) -> Result<Vec<Value>> {
        let data = self
            .call(
                "entities/query",
                json!({
                    "collectionName": self.config.collection,
                    "filter": filter,
                    "outputFields": SCALAR_FIELDS,
                    "limit": limit
                }),
            )
            .await?;
        Ok(into_rows(data))
    }

    /// Whether a row other than `entry` already uses its question.
    async fn question_taken(&self, entry: &KnowledgeEntry) -> Result<bool> {
        let filter = format!("question_key == {}", quote(&entry.question_key()));
        // Two rows are enough: at most one of them is the entry itself.
        let rows = self.query(filter, 2).await?;
        Ok(rows.iter().any(|row| row["id"] != entry.id.as_str()))
    }

    async fn has_id(&self, id: &str) -> Result<bool> {
        let filter = format!("id in [{}]", quote(id));
        Ok(!self.query(filter, 1).await?.is_empty())
    }

    /// Fetch one entry and its stored embedding.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<StoredVector>> {
        self.ensure_ready().await?;
        let mut fields = SCALAR_FIELDS.to_vec();
        fields.push("embedding");
        let data = self
            .call(
                "entities/get",
                json!({
                    "collectionName": self.config.collection,
                    "id": [id],
                    "outputFields": fields
                }),
            )
            .await?;
        let Some(row) = into_rows(data).into_iter().next() else {
            return Ok(None);
        };
        let entry = row_to_entry(&row)?;
        let embedding = row["embedding"]
            .as_array()
            .map(|values| values.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
            .unwrap_or_default();
        Ok(Some(StoredVector { entry, embedding }))
    }

    async fn insert(&self, entry: &KnowledgeEntry) -> Result<()> {
        let embedding = self.embedder.embed(&entry.searchable_text()).await;
        let row = entry_to_row(entry, embedding);
        self.call(
            "entities/insert",
            json!({ "collectionName": self.config.collection, "data": [row] }),
        )
        .await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        self.call(
            "entities/delete",
            json!({
                "collectionName": self.config.collection,
                "filter": format!("id in [{}]", quote(id))
            }),
        )
        .await?;
        Ok(())
    }

    async fn add_new(&self, mut entry: KnowledgeEntry) -> Result<bool> {
        let caller_id = !entry.id.trim().is_empty();
        entry.prepare_new()?;
        check_widths(&entry)?;
        self.ensure_ready().await?;
        if caller_id && self.has_id(&entry.id).await? {
            tracing::debug!("Vector entry {} already stored, add ignored", entry.id);
            return Ok(false);
        }
        if self.question_taken(&entry).await? {
            tracing::debug!("Duplicate question ignored: {}", entry.question);
            return Ok(false);
        }
        self.insert(&entry).await?;
        tracing::debug!("📝 Inserted vector entry {}", entry.id);
        Ok(true)
    }

    async fn similarity_search(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.ensure_ready().await?;
        let vector = self.embedder.embed(query).await;
        let data = self
            .call(
                "entities/search",
                json!({
                    "collectionName": self.config.collection,
                    "data": [vector],
                    "annsField": "embedding",
                    "limit": self.config.top_k,
                    "outputFields": SCALAR_FIELDS,
                    "searchParams": {
                        "metricType": self.config.metric,
                        "params": { "nprobe": self.config.nprobe }
                    }
                }),
            )
            .await?;

        let words = significant_words(query);
        let mut results: Vec<SearchResult> = into_rows(data)
            .into_iter()
            .filter_map(|row| match row_to_entry(&row) {
                Ok(entry) => {
                    let distance = row["distance"].as_f64().unwrap_or(0.0);
                    let score = similarity_score(&self.config.metric, distance);
                    let highlights = highlight_terms(&words, &entry);
                    Some(SearchResult::new(entry, score, highlights))
                }
                Err(e) => {
                    tracing::warn!("⚠️ Skipping malformed vector hit: {e}");
                    None
                }
            })
            .collect();
        rank_results(&mut results);
        Ok(results)
    }
}

#[async_trait]
impl StorageProvider for VectorServiceProvider {
    fn kind(&self) -> ProviderType {
        ProviderType::Vector
    }

    fn name(&self) -> &str {
        "vector"
    }

    async fn is_available(&self) -> bool {
        if let Err(e) = self.config.check() {
            tracing::debug!("Vector service unavailable: {e}");
            return false;
        }
        let req = self
            .client
            .post(self.url("collections/list"))
            .bearer_auth(&self.config.token)
            .json(&json!({}));
        let result = match http::send_once("collections/list", req).await {
            Ok(resp) => http::read_json("collections/list", resp)
                .await
                .and_then(|body| unwrap_data("collections/list", body)),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("⚠️ Vector service unreachable: {e}");
                false
            }
        }
    }

    async fn load_entries(&self, owner: Option<&str>) -> Result<Vec<KnowledgeEntry>> {
        self.ensure_ready().await?;
        let filter = match owner {
            Some(owner) => format!("owner == {}", quote(owner)),
            None => "id != \"\"".to_string(),
        };
        let mut entries = Vec::new();
        for row in self.query(filter, self.config.list_limit).await? {
            match row_to_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("⚠️ Skipping malformed vector row: {e}"),
            }
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn search_entries(&self, query: &str) -> Vec<SearchResult> {
        match self.similarity_search(query).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("❌ Vector search failed: {e}");
                Vec::new()
            }
        }
    }

    async fn add_entry(&self, entry: KnowledgeEntry) -> Result<bool> {
        self.add_new(entry).await
    }

    async fn update_entry(&self, mut entry: KnowledgeEntry) -> Result<bool> {
        entry.validate()?;
        if entry.id.is_empty() {
            return self.add_new(entry).await;
        }
        check_widths(&entry)?;
        let Some(existing) = self.get_by_id(&entry.id).await? else {
            tracing::debug!("Update target '{}' not found, adding instead", entry.id);
            return self.add_new(entry).await;
        };
        if self.question_taken(&entry).await? {
            tracing::debug!("Update of {} ignored, question already used: {}", entry.id, entry.question);
            return Ok(false);
        }
        entry.prepare_replacement(&existing.entry)?;
        self.delete_by_id(&entry.id).await?;
        self.insert(&entry).await?;
        Ok(true)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        self.ensure_ready().await?;
        self.delete_by_id(id).await
    }
}

/// Check the response envelope and take its `data` member.
fn unwrap_data(what: &str, mut resp: Value) -> Result<Value> {
    let code = resp["code"].as_i64().unwrap_or(0);
    if code == 0 || code == 200 {
        return Ok(resp.get_mut("data").map(Value::take).unwrap_or(Value::Null));
    }
    let message = resp["message"].as_str().unwrap_or_default().to_string();
    let lower = message.to_lowercase();
    if code == 100
        || lower.contains("not found")
        || lower.contains("not exist")
        || lower.contains("can't find")
    {
        Err(KnowbaseError::NotFound(format!("{what}: {message}")))
    } else {
        Err(KnowbaseError::Backend(format!("{what}: code {code}: {message}")))
    }
}

fn into_rows(data: Value) -> Vec<Value> {
    match data {
        Value::Array(rows) => rows,
        _ => Vec::new(),
    }
}

/// Double-quoted filter literal.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Reject fields that would not round-trip through their VarChar columns.
fn check_widths(entry: &KnowledgeEntry) -> Result<()> {
    let too_long = |field: &str, len: usize, max: usize| {
        KnowbaseError::Data(format!("{field} is {len} bytes, the vector store allows {max}"))
    };
    if entry.id.len() > ID_MAX {
        return Err(too_long("id", entry.id.len(), ID_MAX));
    }
    let key_len = entry.question_key().len();
    if entry.question.len() > QUESTION_MAX || key_len > QUESTION_MAX {
        return Err(too_long("question", entry.question.len().max(key_len), QUESTION_MAX));
    }
    if entry.answer.len() > ANSWER_MAX {
        return Err(too_long("answer", entry.answer.len(), ANSWER_MAX));
    }
    Ok(())
}

/// Truncate to at most `max` bytes on a char boundary.
fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

fn entry_to_row(entry: &KnowledgeEntry, embedding: Vec<f32>) -> Value {
    let opt = |v: &Option<String>, max| clip(v.as_deref().unwrap_or_default(), max);
    let stamp = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_default();
    let keywords: Vec<String> = entry
        .keywords
        .iter()
        .take(KEYWORDS_CAPACITY)
        .map(|k| clip(k, KEYWORD_MAX))
        .collect();

    json!({
        "id": entry.id,
        "question": entry.question,
        "question_key": entry.question_key(),
        "answer": entry.answer,
        "keywords": keywords,
        "entry_type": entry.entry_type.as_str(),
        "owner": opt(&entry.owner, OWNER_MAX),
        "file_name": opt(&entry.file_name, FILE_NAME_MAX),
        "file_type": opt(&entry.file_type, FILE_TYPE_MAX),
        "created_at": stamp(&entry.created_at),
        "updated_at": stamp(&entry.updated_at),
        "embedding": embedding
    })
}

fn row_to_entry(row: &Value) -> Result<KnowledgeEntry> {
    let text = |key: &str| row[key].as_str().unwrap_or_default().to_string();
    let optional = |key: &str| {
        row[key]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let stamp = |key: &str| {
        row[key]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };

    let id = match &row["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(KnowbaseError::Data("vector row has no id".into())),
    };
    let keywords = row["keywords"]
        .as_array()
        .map(|ks| ks.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();

    let entry = KnowledgeEntry {
        id,
        question: text("question"),
        answer: text("answer"),
        keywords,
        entry_type: text("entry_type").parse().unwrap_or_default(),
        owner: optional("owner"),
        created_at: stamp("created_at"),
        updated_at: stamp("updated_at"),
        file_name: optional("file_name"),
        file_type: optional("file_type"),
    };
    entry.validate()?;
    Ok(entry)
}

/// Map a raw distance to 0–100. COSINE and IP report similarity; L2 reports distance.
fn similarity_score(metric: &str, distance: f64) -> u8 {
    let score = match metric {
        "L2" => 100.0 / (1.0 + distance.max(0.0)),
        _ => distance.clamp(0.0, 1.0) * 100.0,
    };
    score.round() as u8
}

fn highlight_terms(words: &[String], entry: &KnowledgeEntry) -> Vec<String> {
    let haystack = format!("{}\n{}", entry.question, entry.answer).to_lowercase();
    words
        .iter()
        .filter(|w| haystack.contains(w.as_str()))
        .cloned()
        .collect()
}
