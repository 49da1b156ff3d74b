//! Text embeddings via an OpenAI-compatible `/embeddings` endpoint.

use knowbase_core::config::EmbeddingConfig;
use knowbase_core::error::{KnowbaseError, Result};
use knowbase_core::retry::RetryPolicy;
use rand::Rng;
use serde_json::json;

use crate::http;

pub struct EmbeddingClient {
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(
        config: &EmbeddingConfig,
        dimension: usize,
        retry: RetryPolicy,
        client: reqwest::Client,
    ) -> Self {
        let config = config.resolved();
        Self {
            endpoint: config.endpoint,
            api_key: config.api_key,
            model: config.model,
            dimension,
            retry,
            client,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `text`, failing on transport errors or a wrong-sized vector.
    pub async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            return Err(KnowbaseError::Config("embedding API key is not set".into()));
        }
        let url = format!("{}/embeddings", self.endpoint);
        let body = json!({ "model": self.model, "input": text });

        let resp = http::send_json(&self.retry, "embeddings", || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let vector: Vec<f32> = resp["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| KnowbaseError::Data("embedding response has no data[0].embedding".into()))?
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<_>>()
            .ok_or_else(|| KnowbaseError::Data("embedding contains non-numeric values".into()))?;

        if vector.len() != self.dimension {
            return Err(KnowbaseError::Data(format!(
                "embedding has {} dimensions, collection expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(vector)
    }

    /// Embed `text`; on any failure fall back to a random vector of the right size.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        match self.try_embed(text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("⚠️ Embedding failed, using random vector: {e}");
                random_vector(self.dimension)
            }
        }
    }
}

/// Uniform random components in [-1, 1).
pub fn random_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fast_retry, serve};
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use serde_json::Value;
    use std::time::Duration;

    fn client_for(endpoint: &str, api_key: &str, dimension: usize) -> EmbeddingClient {
        let config = EmbeddingConfig {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: "test-embed".into(),
        };
        let http = http::build_client(Duration::from_secs(5)).unwrap();
        EmbeddingClient::new(&config, dimension, fast_retry(), http)
    }

    async fn mock_embeddings(dimension: usize) -> String {
        let app = Router::new().route(
            "/embeddings",
            post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "test-embed");
                let embedding: Vec<f32> = (0..dimension).map(|i| i as f32 / 10.0).collect();
                Json(json!({ "data": [{ "embedding": embedding, "index": 0 }] }))
            }),
        );
        serve(app).await
    }

    #[tokio::test]
    async fn test_embed_returns_remote_vector() {
        let base = mock_embeddings(4).await;
        let client = client_for(&base, "sk-test", 4);
        let vector = client.try_embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.0, 0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_falls_back() {
        let base = mock_embeddings(3).await;
        let client = client_for(&base, "sk-test", 8);
        assert!(matches!(client.try_embed("hello").await, Err(KnowbaseError::Data(_))));
        let vector = client.embed("hello").await;
        assert_eq!(vector.len(), 8);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_falls_back() {
        let client = client_for("http://127.0.0.1:9", "sk-test", 16);
        let vector = client.embed("anything").await;
        assert_eq!(vector.len(), 16);
        assert!(vector.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_random_vector_shape() {
        assert!(random_vector(0).is_empty());
        assert_eq!(random_vector(1536).len(), 1536);
    }
}
