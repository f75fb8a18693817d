//! Text Embedders
//!
//! Two interchangeable embedders behind one trait: a deterministic local
//! feature-hashing embedder (default, no network, used by tests) and the
//! OpenAI embeddings API.

use crate::config::RetrievalConfig;
use crate::error::{Nl2SqlError, Result};
use crate::schema_rag::vector_store::Embedding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Words that carry no table/entity signal in analyst questions
const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could", "did", "do",
    "does", "each", "fetch", "find", "for", "from", "get", "give", "had", "has", "have", "how",
    "i", "in", "is", "it", "its", "list", "many", "me", "much", "my", "of", "on", "or", "please",
    "provide", "return", "show", "that", "the", "their", "them", "there", "these", "this",
    "those", "to", "us", "was", "were", "what", "which", "who", "whose", "with", "would", "you",
];

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    fn dimension(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Hashing,
    OpenAi,
}

impl FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" | "local" => Ok(EmbedderKind::Hashing),
            "openai" => Ok(EmbedderKind::OpenAi),
            other => Err(format!("unknown embedder '{}'", other)),
        }
    }
}

/// Build the embedder selected in config.
pub fn build_embedder(config: &RetrievalConfig, api_key: Option<String>) -> Result<Arc<dyn Embedder>> {
    match config.embedder {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.embedding_dim))),
        EmbedderKind::OpenAi => {
            let api_key = api_key.filter(|k| !k.is_empty()).ok_or_else(|| {
                Nl2SqlError::Config("openai embedder requires an API key".to_string())
            })?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                "https://api.openai.com/v1".to_string(),
                config.embedding_model.clone(),
                config.embedding_dim,
            )))
        }
    }
}

/// Split text into lowercase content tokens: stop words dropped, plurals
/// folded to a singular form.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .map(|t| singularize(&t))
        .collect()
}

fn singularize(token: &str) -> String {
    if token.len() > 4 && token.ends_with("ies") {
        format!("{}y", &token[..token.len() - 3])
    } else if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Deterministic bag-of-words embedder using FNV-1a feature hashing.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedding client using OpenAI API
pub struct OpenAiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            api_key,
            base_url,
            model,
            dimension,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dimension,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        let data = response_json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .ok_or_else(|| Nl2SqlError::Embedding("No embedding data in response".to_string()))?;

        let embedding: Vec<f32> = data
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Nl2SqlError::Embedding("No embedding vector in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
