//! Settings
//!
//! Explicitly constructed configuration sections, read from prefixed
//! environment variables. Nothing here is global: callers build a
//! `Settings` once at startup and hand the sections to the components.

use crate::error::{Nl2SqlError, Result};
use crate::llm::LlmProvider;
use crate::schema_rag::embedder::EmbedderKind;
use crate::validator::{RiskLevel, ValidationMode};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const MIN_RETRIES: usize = 1;
pub const MAX_RETRIES: usize = 5;
pub const DEFAULT_RETRIES: usize = 3;

/// Text completion backend settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub stop_sequences: Vec<String>,
}

impl LlmConfig {
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            api_key: None,
            model: provider.default_model().to_string(),
            base_url: provider.default_base_url().to_string(),
            temperature: 0.1,
            max_tokens: 300,
            timeout: Duration::from_secs(30),
            stop_sequences: vec![
                "Human:".to_string(),
                "Assistant:".to_string(),
                "\n\n---".to_string(),
            ],
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self::for_provider(LlmProvider::Groq)
    }
}

/// Embedding index and two-step retrieval settings
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub embedder: EmbedderKind,
    pub embedding_dim: usize,
    pub embedding_model: String,
    pub top_k: usize,
    /// Floor applied to the phrase -> table-set match. 0.0 accepts any
    /// neighbour the index returns.
    pub min_table_similarity: f32,
    pub min_example_similarity: f32,
    pub corpus_path: Option<PathBuf>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedder: EmbedderKind::Hashing,
            embedding_dim: 512,
            embedding_model: "text-embedding-3-small".to_string(),
            top_k: 5,
            min_table_similarity: 0.0,
            min_example_similarity: 0.0,
            corpus_path: None,
        }
    }
}

/// Retry budget and acceptance policy for a generation session
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_retries: usize,
    pub max_acceptable_risk: RiskLevel,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_RETRIES,
            max_acceptable_risk: RiskLevel::Medium,
        }
    }
}

/// Bound a requested retry count to the supported range.
pub fn clamp_retries(requested: usize) -> usize {
    requested.clamp(MIN_RETRIES, MAX_RETRIES)
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub mode: ValidationMode,
    pub max_joins: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::Standard,
            max_joins: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub generation: GenerationConfig,
    pub validation: ValidationConfig,
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup (environment, map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider: LlmProvider = parse_or(&get, "LLM_PROVIDER", LlmProvider::Groq)?;
        let mut llm = LlmConfig::for_provider(provider);
        llm.api_key = get("LLM_API_KEY").or_else(|| match provider {
            LlmProvider::Groq => get("GROQ_API_KEY"),
            LlmProvider::OpenAi => get("OPENAI_API_KEY"),
            LlmProvider::Local => None,
        });
        if let Some(model) = get("LLM_MODEL") {
            llm.model = model;
        }
        if let Some(base_url) = get("LLM_BASE_URL") {
            llm.base_url = base_url;
        }
        llm.temperature = parse_or(&get, "LLM_TEMPERATURE", llm.temperature)?;
        llm.max_tokens = parse_or(&get, "LLM_MAX_TOKENS", llm.max_tokens)?;
        llm.timeout = Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 30u64)?);

        let defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            embedder: parse_or(&get, "VECTOR_EMBEDDER", defaults.embedder)?,
            embedding_dim: parse_or(&get, "VECTOR_EMBEDDING_DIM", defaults.embedding_dim)?,
            embedding_model: get("VECTOR_EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            top_k: parse_or(&get, "VECTOR_TOP_K", defaults.top_k)?,
            min_table_similarity: parse_or(
                &get,
                "VECTOR_MIN_TABLE_SIMILARITY",
                defaults.min_table_similarity,
            )?,
            min_example_similarity: parse_or(
                &get,
                "VECTOR_MIN_EXAMPLE_SIMILARITY",
                defaults.min_example_similarity,
            )?,
            corpus_path: get("VECTOR_CORPUS_PATH").map(PathBuf::from),
        };
        if retrieval.embedding_dim == 0 {
            return Err(Nl2SqlError::Config(
                "VECTOR_EMBEDDING_DIM must be greater than zero".to_string(),
            ));
        }
        for (key, value) in [
            ("VECTOR_MIN_TABLE_SIMILARITY", retrieval.min_table_similarity),
            ("VECTOR_MIN_EXAMPLE_SIMILARITY", retrieval.min_example_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Nl2SqlError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    key, value
                )));
            }
        }

        let generation = GenerationConfig {
            max_retries: clamp_retries(parse_or(&get, "GEN_MAX_RETRIES", DEFAULT_RETRIES)?),
            max_acceptable_risk: parse_or(&get, "GEN_MAX_ACCEPTABLE_RISK", RiskLevel::Medium)?,
        };

        let validation = ValidationConfig {
            mode: parse_or(&get, "VALIDATION_MODE", ValidationMode::Standard)?,
            max_joins: parse_or(&get, "VALIDATION_MAX_JOINS", 5usize)?,
        };

        Ok(Self {
            llm,
            retrieval,
            generation,
            validation,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Nl2SqlError::Config(format!("Invalid value for {}: {} ({})", key, raw, e))),
        None => Ok(default),
    }
}
