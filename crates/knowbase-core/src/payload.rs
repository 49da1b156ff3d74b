//! Structured answers — table and API-call payloads encoded in `answer`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{KnowbaseError, Result};
use crate::types::{EntryType, KnowledgeEntry};

const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Decoded form of an entry's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryPayload {
    Text(String),
    Table(TablePayload),
    Api(ApiConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePayload {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// An API call stored as a knowledge entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Query that retrieves the API to call after this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

fn default_method() -> String {
    "GET".into()
}

impl ApiConfig {
    /// Identity used to detect cycles when following `next_step`.
    pub fn chain_key(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.endpoint)
    }

    /// Normalize the method and reject unusable endpoints.
    pub fn validated(mut self) -> Result<Self> {
        if self.endpoint.trim().is_empty() {
            return Err(KnowbaseError::Data("API endpoint is required".into()));
        }
        let url = url::Url::parse(self.endpoint.trim())
            .map_err(|e| KnowbaseError::Data(format!("Invalid endpoint URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(KnowbaseError::Data(
                "Invalid endpoint URL: URL must use http or https protocol".into(),
            ));
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(KnowbaseError::Data("Invalid endpoint URL: missing host".into()));
        }

        self.method = self.method.trim().to_uppercase();
        if self.method.is_empty() {
            self.method = default_method();
        }
        if !ALLOWED_METHODS.contains(&self.method.as_str()) {
            return Err(KnowbaseError::Data(format!(
                "Unsupported HTTP method: {}",
                self.method
            )));
        }
        Ok(self)
    }
}

impl TablePayload {
    fn validated(self) -> Result<Self> {
        if self.columns.is_empty() {
            return Err(KnowbaseError::Data("table payload has no columns".into()));
        }
        if let Some((idx, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(KnowbaseError::Data(format!(
                "table row {idx} has {} cells, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        Ok(self)
    }
}

impl KnowledgeEntry {
    /// Decode `answer` according to `entry_type`.
    pub fn payload(&self) -> Result<EntryPayload> {
        match self.entry_type {
            EntryType::Text => Ok(EntryPayload::Text(self.answer.clone())),
            EntryType::Table => {
                let table: TablePayload = serde_json::from_str(&self.answer)
                    .map_err(|e| KnowbaseError::Data(format!("table payload: {e}")))?;
                Ok(EntryPayload::Table(table.validated()?))
            }
            EntryType::Api => {
                // Headers must be a string map; anything else fails here.
                let config: ApiConfig = serde_json::from_str(&self.answer)
                    .map_err(|e| KnowbaseError::Data(format!("API payload: {e}")))?;
                Ok(EntryPayload::Api(config.validated()?))
            }
        }
    }
}
