//! Shared data shapes: knowledge entries, search results, provider selection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{KnowbaseError, Result};

/// How the `answer` of an entry should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    #[default]
    Text,
    Table,
    Api,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table => "table",
            Self::Api => "api",
        }
    }
}

impl FromStr for EntryType {
    type Err = KnowbaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(Self::Text),
            "table" => Ok(Self::Table),
            "api" => Ok(Self::Api),
            other => Err(KnowbaseError::Data(format!("Unknown entry type: {other}"))),
        }
    }
}

/// A stored question/answer unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    #[serde(default)]
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub answer: String,
    /// Display order only; matching ignores it.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl KnowledgeEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            question: question.into(),
            answer: answer.into(),
            keywords: Vec::new(),
            entry_type: EntryType::Text,
            owner: None,
            created_at: None,
            updated_at: None,
            file_name: None,
            file_type: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_source_file(mut self, name: impl Into<String>, file_type: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self.file_type = Some(file_type.into());
        self
    }

    /// Key used for case-insensitive question uniqueness.
    pub fn question_key(&self) -> String {
        normalize_question(&self.question)
    }

    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(KnowbaseError::Data("question must not be empty".into()));
        }
        Ok(())
    }

    /// Validate and fill in id and timestamps for a new entry.
    pub fn prepare_new(&mut self) -> Result<()> {
        self.validate()?;
        if self.id.trim().is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        if self.updated_at.is_none() {
            self.updated_at = Some(now);
        }
        Ok(())
    }

    /// Carry `created_at` over from the stored version and bump `updated_at`.
    pub fn prepare_replacement(&mut self, existing: &KnowledgeEntry) -> Result<()> {
        self.validate()?;
        self.created_at = existing.created_at.or(self.created_at).or_else(|| Some(Utc::now()));
        self.updated_at = Some(Utc::now());
        Ok(())
    }

    /// Question, answer and keywords joined, for embedding and matching.
    pub fn searchable_text(&self) -> String {
        let mut text = format!("{}\n{}", self.question, self.answer);
        if !self.keywords.is_empty() {
            text.push('\n');
            text.push_str(&self.keywords.join(" "));
        }
        text
    }

    pub fn belongs_to(&self, owner: &str) -> bool {
        self.owner.as_deref() == Some(owner)
    }
}

pub fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

/// A ranked hit returned by any provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub entry: KnowledgeEntry,
    /// 0–100, higher is better.
    pub score: u8,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl SearchResult {
    pub fn new(entry: KnowledgeEntry, score: u8, highlights: Vec<String>) -> Self {
        Self {
            entry,
            score: score.min(100),
            highlights,
        }
    }
}

/// Sort descending by score. Stable, so ties keep their incoming order.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.cmp(&a.score));
}

/// Closed set of storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Local,
    #[serde(alias = "elasticsearch", alias = "opensearch")]
    Search,
    #[serde(alias = "milvus")]
    Vector,
}

impl ProviderType {
    pub const ALL: [ProviderType; 3] = [Self::Local, Self::Search, Self::Vector];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Search => "search",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = KnowbaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "search" | "elasticsearch" | "opensearch" => Ok(Self::Search),
            "vector" | "milvus" => Ok(Self::Vector),
            other => Err(KnowbaseError::ProviderNotFound(other.to_string())),
        }
    }
}

/// Persisted record of the active provider choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self { provider_type }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(ProviderType::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_new_assigns_id_and_timestamps() {
        let mut entry = KnowledgeEntry::new("How do I log in?", "Use SSO.");
        entry.prepare_new().unwrap();
        assert!(!entry.id.is_empty());
        assert!(entry.created_at.is_some());
        assert_eq!(entry.created_at, entry.updated_at);

        let mut kept = KnowledgeEntry::new("q", "a").with_id("fixed-id");
        kept.prepare_new().unwrap();
        assert_eq!(kept.id, "fixed-id");
    }

    #[test]
    fn test_empty_question_rejected() {
        let mut entry = KnowledgeEntry::new("   ", "answer");
        assert!(matches!(entry.prepare_new(), Err(KnowbaseError::Data(_))));
    }

    #[test]
    fn test_replacement_keeps_created_at() {
        let mut original = KnowledgeEntry::new("q", "a");
        original.prepare_new().unwrap();
        let created = original.created_at;

        let mut edited = original.clone();
        edited.answer = "b".into();
        edited.created_at = None;
        edited.prepare_replacement(&original).unwrap();
        assert_eq!(edited.created_at, created);
        assert!(edited.updated_at >= created);
    }

    #[test]
    fn test_entry_json_shape() {
        let entry = KnowledgeEntry::new("Q", "A")
            .with_id("e1")
            .with_type(EntryType::Table)
            .with_keywords(["billing"]);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["entryType"], "table");
        assert_eq!(json["keywords"][0], "billing");
        assert!(json.get("owner").is_none());

        let parsed: KnowledgeEntry =
            serde_json::from_str(r#"{"question": "only a question"}"#).unwrap();
        assert_eq!(parsed.entry_type, EntryType::Text);
        assert!(parsed.keywords.is_empty());
    }

    #[test]
    fn test_provider_config_wire_format() {
        let json = serde_json::to_string(&ProviderConfig::new(ProviderType::Vector)).unwrap();
        assert_eq!(json, r#"{"type":"vector"}"#);

        let legacy: ProviderConfig = serde_json::from_str(r#"{"type":"elasticsearch"}"#).unwrap();
        assert_eq!(legacy.provider_type, ProviderType::Search);
        assert!(serde_json::from_str::<ProviderConfig>(r#"{"type":"redis"}"#).is_err());
    }

    #[test]
    fn test_rank_is_stable() {
        let mk = |id: &str, score| SearchResult::new(KnowledgeEntry::new(id, "").with_id(id), score, vec![]);
        let mut results = vec![mk("a", 20), mk("b", 90), mk("c", 20), mk("d", 90)];
        rank_results(&mut results);
        let order: Vec<_> = results.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(order, ["b", "d", "a", "c"]);
    }
}
