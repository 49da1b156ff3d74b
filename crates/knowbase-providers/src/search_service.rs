//! Search-service provider: entries indexed as documents in an
//! Elasticsearch-compatible index, retrieved by weighted fuzzy full-text
//! matching.
//!
//! Scores are normalized against the best hit of each query, so the top
//! result is always 100 and `min_score` acts as a relative cutoff.

use async_trait::async_trait;
use knowbase_core::config::{KnowbaseConfig, SearchServiceConfig};
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::retry::RetryPolicy;
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::{rank_results, KnowledgeEntry, ProviderType, SearchResult};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::http;

pub struct SearchServiceProvider {
    config: SearchServiceConfig,
    retry: RetryPolicy,
    client: reqwest::Client,
    index_ready: AtomicBool,
    index_lock: Mutex<()>,
}

impl SearchServiceProvider {
    pub fn new(config: &SearchServiceConfig, retry: RetryPolicy, client: reqwest::Client) -> Self {
        Self {
            config: config.resolved(),
            retry,
            client,
            index_ready: AtomicBool::new(false),
            index_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &KnowbaseConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout())?;
        Ok(Self::new(&config.search, config.retry.policy(), client))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.config.username, Some(&self.config.password))
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.endpoint, path);
        self.authed(self.client.request(method, url))
    }

    fn index_path(&self) -> String {
        format!("/{}", self.config.index)
    }

    /// `/{index}/_doc/{id}` with the id percent-encoded as one path segment.
    fn doc_url(&self, id: &str, refresh: bool) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.config.endpoint)
            .map_err(|e| KnowbaseError::Config(format!("Invalid search endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| {
                KnowbaseError::Config(format!("Invalid search endpoint: {}", self.config.endpoint))
            })?
            .pop_if_empty()
            .extend([self.config.index.as_str(), "_doc", id]);
        if refresh {
            url.set_query(Some("refresh=wait_for"));
        }
        Ok(url)
    }

    /// Index mapping with the text analyzer used by every full-text field.
    pub fn index_definition() -> Value {
        let text = json!({ "type": "text", "analyzer": "kb_text" });
        let keyword = json!({ "type": "keyword" });
        let date = json!({ "type": "date" });
        json!({
            "settings": {
                "analysis": {
                    "analyzer": {
                        "kb_text": {
                            "type": "custom",
                            "char_filter": ["html_strip"],
                            "tokenizer": "standard",
                            "filter": ["lowercase", "stop", "porter_stem"]
                        }
                    },
                    "normalizer": {
                        "kb_lowercase": { "type": "custom", "filter": ["lowercase"] }
                    }
                }
            },
            "mappings": {
                "properties": {
                    "id": keyword,
                    "question": {
                        "type": "text",
                        "analyzer": "kb_text",
                        "fields": {
                            "exact": { "type": "keyword", "normalizer": "kb_lowercase" }
                        }
                    },
                    "questionKey": keyword,
                    "answer": text,
                    "keywords": keyword,
                    "entryType": keyword,
                    "owner": keyword,
                    "fileName": keyword,
                    "fileType": keyword,
                    "createdAt": date,
                    "updatedAt": date
                }
            }
        })
    }

    /// Create the index if it is missing. Returns true when this call created it.
    pub async fn ensure_index_exists(&self) -> Result<bool> {
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.config.check()?;
        let _guard = self.index_lock.lock().await;
        if self.index_ready.load(Ordering::Acquire) {
            return Ok(false);
        }

        let index = self.index_path();
        let head = http::send_with_retry(&self.retry, "index check", || {
            self.request(Method::HEAD, &index)
        })
        .await;

        let created = match head {
            Ok(_) => false,
            Err(e) if e.is_not_found() => {
                tracing::info!("🧱 Creating search index '{}'", self.config.index);
                let definition = Self::index_definition();
                let put = http::send_with_retry(&self.retry, "index create", || {
                    self.request(Method::PUT, &index).json(&definition)
                })
                .await;
                match put {
                    Ok(_) => true,
                    // Lost a creation race with another writer.
                    Err(KnowbaseError::Http { status: 400, message })
                        if message.contains("resource_already_exists") =>
                    {
                        false
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        self.index_ready.store(true, Ordering::Release);
        Ok(created)
    }

    async fn search_raw(&self, what: &str, body: Value) -> Result<Value> {
        let path = format!("/{}/_search", self.config.index);
        http::send_json(&self.retry, what, || {
            self.request(Method::POST, &path).json(&body)
        })
        .await
    }

    /// Whether a document other than `entry` already uses its question.
    async fn question_taken(&self, entry: &KnowledgeEntry) -> Result<bool> {
        // Two hits are enough: at most one of them is the entry itself.
        let body = json!({
            "size": 2,
            "query": { "term": { "questionKey": entry.question_key() } }
        });
        let resp = self.search_raw("duplicate check", body).await?;
        Ok(resp["hits"]["hits"]
            .as_array()
            .is_some_and(|hits| hits.iter().any(|hit| hit["_id"] != entry.id.as_str())))
    }

    async fn write_document(&self, method: Method, entry: &KnowledgeEntry) -> Result<()> {
        let url = self.doc_url(&entry.id, true)?;
        let doc = document(entry)?;
        http::send_with_retry(&self.retry, "document write", || {
            self.authed(self.client.request(method.clone(), url.clone())).json(&doc)
        })
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<KnowledgeEntry>> {
        let url = self.doc_url(id, false)?;
        let resp = http::send_with_retry(&self.retry, "document get", || {
            self.authed(self.client.get(url.clone()))
        })
        .await;
        let body = match resp {
            Ok(resp) => http::read_json("document get", resp).await?,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if body["found"] == false {
            return Ok(None);
        }
        hit_to_entry(&body).map(Some)
    }

    async fn add_new(&self, mut entry: KnowledgeEntry) -> Result<bool> {
        let caller_id = !entry.id.trim().is_empty();
        entry.prepare_new()?;
        self.ensure_index_exists().await?;
        if caller_id && self.fetch(&entry.id).await?.is_some() {
            tracing::debug!("Document {} already indexed, add ignored", entry.id);
            return Ok(false);
        }
        if self.question_taken(&entry).await? {
            tracing::debug!("Duplicate question ignored: {}", entry.question);
            return Ok(false);
        }
        self.write_document(Method::POST, &entry).await?;
        tracing::debug!("📝 Indexed entry {}", entry.id);
        Ok(true)
    }

    async fn full_text_search(&self, query: &str) -> Result<Vec<SearchResult>> {
        self.ensure_index_exists().await?;
        let body = json!({
            "size": self.config.max_results,
            "query": {
                "multi_match": {
                    "query": query,
                    "fields": ["question^3", "keywords^2", "answer"],
                    "fuzziness": "AUTO"
                }
            },
            "highlight": {
                "fields": { "question": {}, "answer": {} }
            }
        });
        let resp = self.search_raw("search", body).await?;
        Ok(parse_hits(&resp, self.config.min_score))
    }
}

#[async_trait]
impl StorageProvider for SearchServiceProvider {
    fn kind(&self) -> ProviderType {
        ProviderType::Search
    }

    fn name(&self) -> &str {
        "search"
    }

    async fn is_available(&self) -> bool {
        if let Err(e) = self.config.check() {
            tracing::debug!("Search service unavailable: {e}");
            return false;
        }
        match http::send_once("cluster ping", self.request(Method::GET, "/")).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("⚠️ Search service unreachable: {e}");
                false
            }
        }
    }

    async fn load_entries(&self, owner: Option<&str>) -> Result<Vec<KnowledgeEntry>> {
        self.ensure_index_exists().await?;
        let query = match owner {
            Some(owner) => json!({ "term": { "owner": owner } }),
            None => json!({ "match_all": {} }),
        };
        let body = json!({
            "size": self.config.list_limit,
            "query": query,
            "sort": [{ "createdAt": { "order": "asc", "unmapped_type": "date" } }]
        });
        let resp = self.search_raw("list", body).await?;
        let mut entries = Vec::new();
        for hit in resp["hits"]["hits"].as_array().into_iter().flatten() {
            match hit_to_entry(hit) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("⚠️ Skipping malformed search document: {e}"),
            }
        }
        Ok(entries)
    }

    async fn search_entries(&self, query: &str) -> Vec<SearchResult> {
        match self.full_text_search(query).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!("❌ Full-text search failed: {e}");
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
        self.ensure_index_exists().await?;
        let Some(existing) = self.fetch(&entry.id).await? else {
            tracing::debug!("Update target '{}' not found, adding instead", entry.id);
            return self.add_new(entry).await;
        };
        if self.question_taken(&entry).await? {
            tracing::debug!("Update of {} ignored, question already used: {}", entry.id, entry.question);
            return Ok(false);
        }
        entry.prepare_replacement(&existing)?;
        self.write_document(Method::PUT, &entry).await?;
        Ok(true)
    }

    async fn delete_entry(&self, id: &str) -> Result<()> {
        self.ensure_index_exists().await?;
        let url = self.doc_url(id, true)?;
        match http::send_with_retry(&self.retry, "document delete", || {
            self.authed(self.client.delete(url.clone()))
        })
        .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!("Delete: document {id} already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Serialized entry plus the normalized question used for duplicate checks.
fn document(entry: &KnowledgeEntry) -> Result<Value> {
    let mut doc = serde_json::to_value(entry)?;
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("questionKey".into(), Value::String(entry.question_key()));
    }
    Ok(doc)
}

fn hit_to_entry(hit: &Value) -> Result<KnowledgeEntry> {
    let source = hit
        .get("_source")
        .cloned()
        .ok_or_else(|| KnowbaseError::Data("document has no _source".into()))?;
    let mut entry: KnowledgeEntry = serde_json::from_value(source)?;
    if entry.id.is_empty() {
        if let Some(id) = hit["_id"].as_str() {
            entry.id = id.to_string();
        }
    }
    entry.validate()?;
    Ok(entry)
}

/// Convert a `_search` response into results normalized to the top hit.
pub fn parse_hits(resp: &Value, min_score: u8) -> Vec<SearchResult> {
    let hits = resp["hits"]["hits"].as_array().cloned().unwrap_or_default();
    let top = hits
        .iter()
        .filter_map(|h| h["_score"].as_f64())
        .fold(0.0_f64, f64::max);
    if top <= 0.0 {
        return Vec::new();
    }

    let mut results: Vec<SearchResult> = hits
        .iter()
        .filter_map(|hit| {
            let raw = hit["_score"].as_f64()?;
            let score = (raw / top * 100.0).round().clamp(0.0, 100.0) as u8;
            if score < min_score {
                return None;
            }
            let entry = match hit_to_entry(hit) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping malformed search hit: {e}");
                    return None;
                }
            };
            let highlights = ["question", "answer"]
                .iter()
                .flat_map(|field| hit["highlight"][*field].as_array().cloned().unwrap_or_default())
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
            Some(SearchResult::new(entry, score, highlights))
        })
        .collect();
    rank_results(&mut results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_retry, serve};
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, head, post};
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::time::Duration;

    const BASIC_AUTH: &str = "Basic ZWxhc3RpYzpjaGFuZ2VtZQ==";

    #[derive(Default)]
    struct MockState {
        index_exists: bool,
        head_calls: u32,
        create_calls: u32,
        /// `_search` requests that fail with 503 before one succeeds.
        failing_searches: u32,
        /// Document GETs answer 500.
        failing_gets: bool,
        /// Index creation loses a race with another writer.
        create_conflict: bool,
        docs: Vec<(String, Value)>,
    }

    type Mock = Arc<std::sync::Mutex<MockState>>;

    fn mock_score(doc: &Value, query: &str) -> f64 {
        let text = format!("{} {}", doc["question"], doc["answer"]).to_lowercase();
        let hits = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| text.contains(*w))
            .count() as f64;
        hits * hits
    }

    async fn run_search(m: &Mock, body: &Value) -> Response {
        let mut s = m.lock().unwrap();
        if s.failing_searches > 0 {
            s.failing_searches -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response();
        }
        let query = &body["query"];
        let mut hits: Vec<Value> = Vec::new();
        for (id, doc) in &s.docs {
            let score = if let Some(term) = query["term"].as_object() {
                let (field, value) = term.iter().next().unwrap();
                if doc[field] == *value { 1.0 } else { 0.0 }
            } else if query.get("match_all").is_some() {
                1.0
            } else {
                mock_score(doc, query["multi_match"]["query"].as_str().unwrap_or_default())
            };
            if score > 0.0 {
                hits.push(json!({
                    "_id": id,
                    "_score": score,
                    "_source": doc,
                    "highlight": { "question": [doc["question"]] }
                }));
            }
        }
        hits.sort_by(|a, b| {
            b["_score"].as_f64().unwrap().total_cmp(&a["_score"].as_f64().unwrap())
        });
        Json(json!({ "hits": { "total": { "value": hits.len() }, "hits": hits } })).into_response()
    }

    async fn mock_es(state: MockState) -> (String, Mock) {
        let mock: Mock = Arc::new(std::sync::Mutex::new(state));
        let app = Router::new()
            .route(
                "/",
                get(|headers: HeaderMap| async move {
                    if headers.get("authorization").map(|v| v == BASIC_AUTH) == Some(true) {
                        (StatusCode::OK, Json(json!({ "version": { "number": "8.11.0" } })))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" })))
                    }
                }),
            )
            .route(
                "/{index}",
                head(|State(m): State<Mock>| async move {
                    let mut s = m.lock().unwrap();
                    s.head_calls += 1;
                    if s.index_exists { StatusCode::OK } else { StatusCode::NOT_FOUND }
                })
                .put(|State(m): State<Mock>, Json(body): Json<Value>| async move {
                    assert_eq!(
                        body["settings"]["analysis"]["analyzer"]["kb_text"]["filter"],
                        json!(["lowercase", "stop", "porter_stem"])
                    );
                    let mut s = m.lock().unwrap();
                    s.create_calls += 1;
                    s.index_exists = true;
                    if s.create_conflict {
                        return (
                            StatusCode::BAD_REQUEST,
                            Json(json!({
                                "error": {
                                    "type": "resource_already_exists_exception",
                                    "reason": "index [kb] already exists"
                                },
                                "status": 400
                            })),
                        );
                    }
                    (StatusCode::OK, Json(json!({ "acknowledged": true })))
                }),
            )
            .route(
                "/{index}/_search",
                post(|State(m): State<Mock>, Json(body): Json<Value>| async move {
                    run_search(&m, &body).await
                }),
            )
            .route(
                "/{index}/_doc/{id}",
                get(|State(m): State<Mock>, Path((_, id)): Path<(String, String)>| async move {
                    let (failing, found) = {
                        let s = m.lock().unwrap();
                        let found =
                            s.docs.iter().find(|(doc_id, _)| *doc_id == id).map(|(_, d)| d.clone());
                        (s.failing_gets, found)
                    };
                    if failing {
                        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "shard failure" })));
                    }
                    match found {
                        Some(doc) => (
                            StatusCode::OK,
                            Json(json!({ "_id": id, "found": true, "_source": doc })),
                        ),
                        None => (StatusCode::NOT_FOUND, Json(json!({ "_id": id, "found": false }))),
                    }
                })
                .post(
                    |State(m): State<Mock>,
                     Path((_, id)): Path<(String, String)>,
                     Json(doc): Json<Value>| async move {
                        m.lock().unwrap().docs.push((id, doc));
                        (StatusCode::CREATED, Json(json!({ "result": "created" })))
                    },
                )
                .put(
                    |State(m): State<Mock>,
                     Path((_, id)): Path<(String, String)>,
                     Json(doc): Json<Value>| async move {
                        let mut s = m.lock().unwrap();
                        match s.docs.iter().position(|(doc_id, _)| *doc_id == id) {
                            Some(i) => s.docs[i].1 = doc,
                            None => s.docs.push((id, doc)),
                        }
                        Json(json!({ "result": "updated" }))
                    },
                )
                .delete(
                    |State(m): State<Mock>, Path((_, id)): Path<(String, String)>| async move {
                        let mut s = m.lock().unwrap();
                        let before = s.docs.len();
                        s.docs.retain(|(doc_id, _)| *doc_id != id);
                        if s.docs.len() < before {
                            (StatusCode::OK, Json(json!({ "result": "deleted" })))
                        } else {
                            (StatusCode::NOT_FOUND, Json(json!({ "result": "not_found" })))
                        }
                    },
                ),
            )
            .with_state(mock.clone());
        (serve(app).await, mock)
    }

    fn provider(base: &str) -> SearchServiceProvider {
        let config = SearchServiceConfig {
            endpoint: base.into(),
            index: "kb".into(),
            username: "elastic".into(),
            password: "changeme".into(),
            ..Default::default()
        };
        let client = http::build_client(Duration::from_secs(5)).unwrap();
        SearchServiceProvider::new(&config, fast_retry(), client)
    }

    #[tokio::test]
    async fn test_fresh_index_created_once() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        assert!(search.ensure_index_exists().await.unwrap());
        assert!(!search.ensure_index_exists().await.unwrap());
        search.add_entry(KnowledgeEntry::new("Shipping cost", "Free over 50")).await.unwrap();

        let s = mock.lock().unwrap();
        assert_eq!(s.create_calls, 1);
        assert_eq!(s.head_calls, 1);
    }

    #[tokio::test]
    async fn test_existing_index_not_recreated() {
        let (base, mock) = mock_es(MockState { index_exists: true, ..Default::default() }).await;
        assert!(!provider(&base).ensure_index_exists().await.unwrap());
        assert_eq!(mock.lock().unwrap().create_calls, 0);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_on_question() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        search.add_entry(KnowledgeEntry::new("Refund policy", "30 days")).await.unwrap();
        search.add_entry(KnowledgeEntry::new(" REFUND policy", "60 days")).await.unwrap();

        let s = mock.lock().unwrap();
        assert_eq!(s.docs.len(), 1);
        assert_eq!(s.docs[0].1["questionKey"], "refund policy");
    }

    #[tokio::test]
    async fn test_search_normalizes_and_applies_threshold() {
        let (base, _) = mock_es(MockState::default()).await;
        let search = provider(&base);
        for (q, a) in [
            ("How do I reset my account password?", "Settings page."),
            ("Password policy", "Twelve characters."),
            ("Account recovery", "Reset via email."),
        ] {
            search.add_entry(KnowledgeEntry::new(q, a)).await.unwrap();
        }

        // raw scores 9, 1, 4 → 100, 11 (dropped), 44
        let results = search.search_entries("reset account password").await;
        let questions: Vec<_> = results.iter().map(|r| r.entry.question.as_str()).collect();
        assert_eq!(questions, ["How do I reset my account password?", "Account recovery"]);
        assert_eq!(results[0].score, 100);
        assert_eq!(results[1].score, 44);
        assert_eq!(results[0].highlights, vec!["How do I reset my account password?"]);
    }

    #[tokio::test]
    async fn test_update_unknown_id_inserts() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        search
            .update_entry(KnowledgeEntry::new("Warranty length", "Two years").with_id("w1"))
            .await
            .unwrap();
        assert_eq!(mock.lock().unwrap().docs[0].0, "w1");

        let before = search.load_entries(None).await.unwrap().remove(0);
        search
            .update_entry(KnowledgeEntry::new("Warranty length", "Three years").with_id("w1"))
            .await
            .unwrap();
        let after = search.load_entries(None).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].answer, "Three years");
        assert_eq!(after[0].created_at, before.created_at);
    }

    #[tokio::test]
    async fn test_update_cannot_take_another_documents_question() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        search.add_entry(KnowledgeEntry::new("Refund policy", "30 days").with_id("a")).await.unwrap();
        search.add_entry(KnowledgeEntry::new("Shipping cost", "Free").with_id("b")).await.unwrap();

        let stored = search
            .update_entry(KnowledgeEntry::new("REFUND POLICY", "Free").with_id("b"))
            .await
            .unwrap();
        assert!(!stored);
        assert!(search
            .update_entry(KnowledgeEntry::new("Refund Policy", "45 days").with_id("a"))
            .await
            .unwrap());

        let s = mock.lock().unwrap();
        let keys: Vec<_> = s.docs.iter().map(|(id, d)| (id.as_str(), d["questionKey"].clone())).collect();
        assert_eq!(keys, [("a", json!("refund policy")), ("b", json!("shipping cost"))]);
    }

    #[tokio::test]
    async fn test_add_with_existing_id_is_ignored() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        assert!(search.add_entry(KnowledgeEntry::new("First q", "1").with_id("same")).await.unwrap());
        assert!(!search.add_entry(KnowledgeEntry::new("Second q", "2").with_id("same")).await.unwrap());

        let s = mock.lock().unwrap();
        assert_eq!(s.docs.len(), 1);
        assert_eq!(s.docs[0].1["question"], "First q");
    }

    #[tokio::test]
    async fn test_ids_are_encoded_as_one_path_segment() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        let id = "faq#1/a?b c";
        search.add_entry(KnowledgeEntry::new("Odd ids", "v1").with_id(id)).await.unwrap();
        assert_eq!(mock.lock().unwrap().docs[0].0, id);

        assert!(search
            .update_entry(KnowledgeEntry::new("Odd ids", "v2").with_id(id))
            .await
            .unwrap());
        {
            let s = mock.lock().unwrap();
            assert_eq!(s.docs.len(), 1);
            assert_eq!(s.docs[0].1["answer"], "v2");
        }

        search.delete_entry(id).await.unwrap();
        assert!(mock.lock().unwrap().docs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_on_update_is_not_an_insert() {
        let (base, mock) = mock_es(MockState { index_exists: true, ..Default::default() }).await;
        let search = provider(&base);
        search.add_entry(KnowledgeEntry::new("Warranty length", "Two years").with_id("w1")).await.unwrap();
        mock.lock().unwrap().failing_gets = true;

        let err = search
            .update_entry(KnowledgeEntry::new("Warranty length", "Three years").with_id("w1"))
            .await
            .unwrap_err();
        assert!(matches!(err, KnowbaseError::Http { status: 500, .. }));
        assert!(search
            .update_entry(KnowledgeEntry::new("Return window", "30 days").with_id("w2"))
            .await
            .is_err());

        let s = mock.lock().unwrap();
        assert_eq!(s.docs.len(), 1);
        assert_eq!(s.docs[0].1["answer"], "Two years");
    }

    #[tokio::test]
    async fn test_index_creation_race_counts_as_ready() {
        let (base, mock) = mock_es(MockState { create_conflict: true, ..Default::default() }).await;
        let search = provider(&base);
        assert!(!search.ensure_index_exists().await.unwrap());
        search.add_entry(KnowledgeEntry::new("Shipping cost", "Free over 50")).await.unwrap();

        let s = mock.lock().unwrap();
        assert_eq!(s.head_calls, 1);
        assert_eq!(s.create_calls, 1);
        assert_eq!(s.docs.len(), 1);
    }

    #[tokio::test]
    async fn test_transient_503_retried() {
        let (base, mock) = mock_es(MockState { index_exists: true, ..Default::default() }).await;
        let search = provider(&base);
        search.add_entry(KnowledgeEntry::new("Office hours", "9 to 5")).await.unwrap();

        // Two failures then success within three attempts.
        mock.lock().unwrap().failing_searches = 2;
        assert_eq!(search.search_entries("office hours").await.len(), 1);

        // Attempts exhausted: search degrades to no results.
        mock.lock().unwrap().failing_searches = 3;
        assert!(search.search_entries("office hours").await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_owner_listing() {
        let (base, mock) = mock_es(MockState::default()).await;
        let search = provider(&base);
        search
            .add_entry(KnowledgeEntry::new("Team A q", "x").with_id("a").with_owner("team-a"))
            .await
            .unwrap();
        search
            .add_entry(KnowledgeEntry::new("Team B q", "y").with_id("b").with_owner("team-b"))
            .await
            .unwrap();

        let scoped = search.load_entries(Some("team-a")).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");

        search.delete_entry("a").await.unwrap();
        search.delete_entry("a").await.unwrap();
        assert_eq!(mock.lock().unwrap().docs.len(), 1);
    }

    #[tokio::test]
    async fn test_availability_uses_basic_auth() {
        let (base, _) = mock_es(MockState::default()).await;
        assert!(provider(&base).is_available().await);

        let mut wrong = provider(&base);
        wrong.config.password = "nope".into();
        assert!(!wrong.is_available().await);

        let mut unconfigured = provider(&base);
        unconfigured.config.endpoint.clear();
        assert!(!unconfigured.is_available().await);
    }

    #[test]
    fn test_parse_hits_normalizes_to_top() {
        let resp = json!({
            "hits": { "hits": [
                { "_id": "1", "_score": 8.0, "_source": { "question": "a" } },
                { "_id": "2", "_score": 4.0, "_source": { "question": "b" } },
                { "_id": "3", "_score": 1.0, "_source": { "question": "c" } },
                { "_id": "4", "_score": 6.0, "_source": { "answer": "no question" } }
            ] }
        });
        let results = parse_hits(&resp, 25);
        let scored: Vec<_> = results.iter().map(|r| (r.entry.id.as_str(), r.score)).collect();
        assert_eq!(scored, [("1", 100u8), ("2", 50u8)]);
        assert!(parse_hits(&json!({}), 25).is_empty());
    }

    #[test]
    fn test_index_definition_shape() {
        let def = SearchServiceProvider::index_definition();
        let props = &def["mappings"]["properties"];
        assert_eq!(props["question"]["fields"]["exact"]["normalizer"], "kb_lowercase");
        assert_eq!(props["createdAt"]["type"], "date");
        assert_eq!(props["owner"]["type"], "keyword");
        assert_eq!(def["settings"]["analysis"]["analyzer"]["kb_text"]["char_filter"][0], "html_strip");
    }
}
