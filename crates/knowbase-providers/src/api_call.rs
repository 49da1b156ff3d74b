//! API-call entries: executing a stored `ApiConfig` and following the
//! `next_step` links between API entries.

use knowbase_core::config::KnowbaseConfig;
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::payload::{ApiConfig, EntryPayload};
use knowbase_core::retry::RetryPolicy;
use knowbase_core::traits::StorageProvider;
use knowbase_core::types::{EntryType, KnowledgeEntry};
use reqwest::Method;
use serde_json::Value;
use std::collections::HashSet;

use crate::http;

/// Default number of hops followed by `follow_api_chain`.
pub const DEFAULT_CHAIN_DEPTH: usize = 3;

/// Outcome of one executed API call. Client-error statuses are reported
/// here with `success: false` rather than as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub success: bool,
    pub status: u16,
    pub method: String,
    pub url: String,
    pub content_type: Option<String>,
    /// Parsed JSON for JSON responses, otherwise the body as a string.
    pub data: Value,
    /// Body size in bytes.
    pub size: usize,
}

pub struct ApiCaller {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ApiCaller {
    pub fn new(client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn from_config(config: &KnowbaseConfig) -> Result<Self> {
        let client = http::build_client(config.request_timeout())?;
        Ok(Self::new(client, config.retry.policy()))
    }

    /// Execute an API entry's answer.
    pub async fn execute_entry(
        &self,
        entry: &KnowledgeEntry,
        auth_token: Option<&str>,
    ) -> Result<ApiResponse> {
        match entry.payload()? {
            EntryPayload::Api(config) => self.execute(&config, auth_token).await,
            _ => Err(KnowbaseError::Data(format!(
                "entry {} is a {} entry, not an API call",
                entry.id,
                entry.entry_type.as_str()
            ))),
        }
    }

    /// Validate and send the request described by `config`.
    ///
    /// A GET sends an object payload as query parameters; other methods send
    /// it as a JSON body. `auth_token` becomes a bearer `Authorization`
    /// header, overriding one from `config.headers`.
    pub async fn execute(&self, config: &ApiConfig, auth_token: Option<&str>) -> Result<ApiResponse> {
        let config = config.clone().validated()?;
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|e| KnowbaseError::Data(format!("Unsupported HTTP method: {e}")))?;
        let mut url = reqwest::Url::parse(config.endpoint.trim())
            .map_err(|e| KnowbaseError::Data(format!("Invalid endpoint URL: {e}")))?;

        let mut body = None;
        if let Some(payload) = config.payload.as_ref().filter(|p| !p.is_null()) {
            if method == Method::GET {
                append_query(&mut url, payload);
            } else {
                body = Some(payload);
            }
        }
        let token = auth_token.map(|t| t.trim().trim_start_matches("Bearer ").trim());

        let what = format!("API call {}", config.chain_key());
        tracing::info!("🌐 {} {}", config.method, url);
        let resp = http::send_lenient(&self.retry, &what, || {
            let mut req = self.client.request(method.clone(), url.clone());
            for (name, value) in &config.headers {
                req = req.header(name.as_str(), value.as_str());
            }
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            if let Some(body) = body {
                req = req.json(body);
            }
            req
        })
        .await?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| KnowbaseError::Transient(format!("{what}: failed to read body: {e}")))?;

        let is_json = content_type.as_deref().is_some_and(|ct| ct.contains("json"));
        let data = if is_json {
            serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("⚠️ {what}: JSON response did not parse: {e}");
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        } else {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        };

        if !status.is_success() {
            tracing::warn!("⚠️ {what} answered {status}");
        }
        Ok(ApiResponse {
            success: status.is_success(),
            status: status.as_u16(),
            method: config.method,
            url: final_url,
            content_type,
            data,
            size: bytes.len(),
        })
    }
}

fn append_query(url: &mut reqwest::Url, payload: &Value) {
    let Some(params) = payload.as_object() else {
        tracing::warn!("⚠️ GET payload is not an object, ignoring it");
        return;
    };
    let mut pairs = url.query_pairs_mut();
    for (key, value) in params {
        match value {
            Value::String(s) => pairs.append_pair(key, s),
            other => pairs.append_pair(key, &other.to_string()),
        };
    }
}

/// One API entry reached while following a chain.
#[derive(Debug, Clone)]
pub struct ChainStep {
    pub entry: KnowledgeEntry,
    pub api: ApiConfig,
    pub score: u8,
}

/// Retrieve the best API entry for `query`, then keep retrieving with each
/// entry's `next_step` until a step has none, an API repeats, nothing
/// matches, or `max_depth` steps were collected.
pub async fn follow_api_chain(
    provider: &dyn StorageProvider,
    query: &str,
    max_depth: usize,
) -> Vec<ChainStep> {
    let mut steps = Vec::new();
    let mut visited = HashSet::new();
    let mut current = query.to_string();

    while steps.len() < max_depth {
        let best = provider
            .search_entries(&current)
            .await
            .into_iter()
            .filter(|r| r.entry.entry_type == EntryType::Api)
            .find_map(|r| match r.entry.payload() {
                Ok(EntryPayload::Api(api)) => Some(ChainStep { entry: r.entry, api, score: r.score }),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping API entry {}: {e}", r.entry.id);
                    None
                }
            });
        let Some(step) = best else {
            tracing::debug!("No API entry matches '{current}'");
            break;
        };
        if !visited.insert(step.api.chain_key().to_string()) {
            tracing::debug!("API chain revisits '{}', stopping", step.api.chain_key());
            break;
        }

        let next = step
            .api
            .next_step
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        steps.push(step);
        match next {
            Some(next) => current = next,
            None => break,
        }
    }
    steps
}
