//! Knowbase configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{KnowbaseError, Result};
use crate::retry::RetryPolicy;
use crate::types::ProviderType;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowbaseConfig {
    /// Directory holding the state database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Used only when no provider choice has been persisted yet.
    #[serde(default = "default_provider")]
    pub default_provider: ProviderType,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchServiceConfig,
    #[serde(default)]
    pub vector: VectorServiceConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_data_dir() -> String { "~/.knowbase".into() }
fn default_provider() -> ProviderType { ProviderType::Local }
fn default_request_timeout_secs() -> u64 { 30 }

impl Default for KnowbaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_provider: default_provider(),
            request_timeout_secs: default_request_timeout_secs(),
            search: SearchServiceConfig::default(),
            vector: VectorServiceConfig::default(),
            embedding: EmbeddingConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl KnowbaseConfig {
    /// Load config from the default path (~/.knowbase/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KnowbaseError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save config to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| KnowbaseError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Knowbase home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".knowbase")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Full-text search service connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchServiceConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Normalized scores below this are dropped.
    #[serde(default = "default_min_score")]
    pub min_score: u8,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

fn default_index() -> String { "knowledge-base".into() }
fn default_min_score() -> u8 { 25 }
fn default_max_results() -> usize { 10 }
fn default_list_limit() -> usize { 1000 }

impl Default for SearchServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            index: default_index(),
            username: String::new(),
            password: String::new(),
            min_score: default_min_score(),
            max_results: default_max_results(),
            list_limit: default_list_limit(),
        }
    }
}

impl SearchServiceConfig {
    /// Config values win; environment fills the gaps.
    pub fn resolved(&self) -> Self {
        let mut cfg = self.clone();
        fill_from_env(&mut cfg.endpoint, &["KNOWBASE_SEARCH_URL"]);
        fill_from_env(&mut cfg.username, &["KNOWBASE_SEARCH_USER"]);
        fill_from_env(&mut cfg.password, &["KNOWBASE_SEARCH_PASSWORD"]);
        cfg.endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        cfg
    }

    pub fn check(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(KnowbaseError::Config("search service endpoint is not set".into()));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(KnowbaseError::Config("search service credentials are not set".into()));
        }
        if self.index.trim().is_empty() {
            return Err(KnowbaseError::Config("search service index name is empty".into()));
        }
        Ok(())
    }
}

/// Vector database connection and collection layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorServiceConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_index_type")]
    pub index_type: String,
    #[serde(default = "default_nlist")]
    pub nlist: u32,
    #[serde(default = "default_nprobe")]
    pub nprobe: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
}

fn default_collection() -> String { "knowledge_base".into() }
fn default_dimension() -> usize { 1536 }
fn default_metric() -> String { "COSINE".into() }
fn default_index_type() -> String { "IVF_FLAT".into() }
fn default_nlist() -> u32 { 1024 }
fn default_nprobe() -> u32 { 16 }
fn default_top_k() -> usize { 10 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_max_poll_attempts() -> u32 { 30 }

impl Default for VectorServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            collection: default_collection(),
            dimension: default_dimension(),
            metric: default_metric(),
            index_type: default_index_type(),
            nlist: default_nlist(),
            nprobe: default_nprobe(),
            top_k: default_top_k(),
            list_limit: default_list_limit(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
        }
    }
}

impl VectorServiceConfig {
    pub fn resolved(&self) -> Self {
        let mut cfg = self.clone();
        fill_from_env(&mut cfg.endpoint, &["KNOWBASE_VECTOR_URL"]);
        fill_from_env(&mut cfg.token, &["KNOWBASE_VECTOR_TOKEN"]);
        cfg.endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        cfg.metric = cfg.metric.to_uppercase();
        cfg
    }

    pub fn check(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(KnowbaseError::Config("vector service endpoint is not set".into()));
        }
        if self.token.is_empty() {
            return Err(KnowbaseError::Config("vector service token is not set".into()));
        }
        if self.dimension == 0 {
            return Err(KnowbaseError::Config("vector dimension must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Empty means `KNOWBASE_EMBEDDING_URL`, then the OpenAI endpoint.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_endpoint() -> String { "https://api.openai.com/v1".into() }
fn default_embedding_model() -> String { "text-embedding-3-small".into() }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: default_embedding_model(),
        }
    }
}

impl EmbeddingConfig {
    pub fn resolved(&self) -> Self {
        let mut cfg = self.clone();
        fill_from_env(&mut cfg.endpoint, &["KNOWBASE_EMBEDDING_URL"]);
        if cfg.endpoint.is_empty() {
            cfg.endpoint = default_embedding_endpoint();
        }
        fill_from_env(&mut cfg.api_key, &["KNOWBASE_EMBEDDING_KEY", "OPENAI_API_KEY"]);
        cfg.endpoint = cfg.endpoint.trim_end_matches('/').to_string();
        cfg
    }
}

/// Backoff settings shared by the HTTP providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_jitter_ms() -> u64 { 1000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

fn fill_from_env(slot: &mut String, keys: &[&str]) {
    if !slot.is_empty() {
        return;
    }
    if let Some(val) = keys
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    {
        *slot = val;
    }
}
