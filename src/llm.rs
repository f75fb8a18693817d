use crate::config::LlmConfig;
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SYSTEM_MESSAGE: &str =
    "You are a MySQL database expert. Generate clean SQL queries based on the provided schema and examples.";

/// Completion backends. Chosen once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Groq,
    OpenAi,
    Local,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "https://api.groq.com/openai/v1",
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::Local => "http://localhost:11434",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::Groq => "llama-3.1-8b-instant",
            LlmProvider::OpenAi => "gpt-4o-mini",
            LlmProvider::Local => "sqlcoder",
        }
    }

    fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Local)
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LlmProvider::Groq => "groq",
            LlmProvider::OpenAi => "openai",
            LlmProvider::Local => "local",
        };
        f.write_str(name)
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "groq" => Ok(LlmProvider::Groq),
            "openai" => Ok(LlmProvider::OpenAi),
            "local" | "ollama" => Ok(LlmProvider::Local),
            other => Err(format!("unknown LLM provider '{}'", other)),
        }
    }
}

/// One text completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_sequences: Vec<String>,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn from_config(prompt: String, config: &LlmConfig) -> Self {
        Self {
            prompt,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stop_sequences: config.stop_sequences.clone(),
            timeout: config.timeout,
        }
    }
}

/// Turns a prompt into raw model text.
///
/// Implementations should be near-deterministic at low temperature; the
/// orchestrator applies the timeout and cancellation around `complete`.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Identifier reported in session metadata
    fn model_id(&self) -> String;

    async fn health_check(&self) -> Result<bool>;
}

#[derive(Clone)]
pub struct LlmClient {
    provider: LlmProvider,
    api_key: Option<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, api_key: Option<String>, model: String, base_url: String) -> Result<Self> {
        if provider.requires_api_key() && api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Nl2SqlError::Config(format!(
                "{} provider requires an API key (set LLM_API_KEY)",
                provider
            )));
        }
        Ok(Self {
            provider,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Self::new(
            config.provider,
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
        )?;
        info!(
            "Completion client ready: provider={} model={} url={}",
            client.provider, client.model, client.base_url
        );
        Ok(client)
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    async fn call_chat(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_MESSAGE},
                {"role": "user", "content": request.prompt}
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stop": request.stop_sequences,
            "stream": false
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.as_deref().unwrap_or_default()),
            )
            .header("Content-Type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            let hint = match status.as_u16() {
                401 => " (invalid API key)",
                429 => " (rate limit exceeded)",
                _ => "",
            };
            return Err(Nl2SqlError::Completion(format!(
                "{} API error ({}){}: {}",
                self.provider, status, hint, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Completion(format!("Failed to parse completion response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Nl2SqlError::Completion("No content in completion response".to_string()))?;

        Ok(content.to_string())
    }

    async fn call_local(&self, request: &CompletionRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "system": SYSTEM_MESSAGE,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
                "stop": request.stop_sequences
            }
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Nl2SqlError::Completion(format!(
                "local model error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Completion(format!("Failed to parse local model response: {}", e)))?;

        response_json["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Nl2SqlError::Completion("No response field in local model output".to_string()))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        debug!(
            "Sending prompt to {} ({} chars, max_tokens={}, temperature={})",
            self.provider,
            request.prompt.len(),
            request.max_tokens,
            request.temperature
        );
        let text = match self.provider {
            LlmProvider::Groq | LlmProvider::OpenAi => self.call_chat(request).await?,
            LlmProvider::Local => self.call_local(request).await?,
        };
        if text.trim().is_empty() {
            return Err(Nl2SqlError::Completion(format!("Empty response from {}", self.provider)));
        }
        debug!("Received {} chars from {}", text.len(), self.provider);
        Ok(text)
    }

    fn model_id(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }

    async fn health_check(&self) -> Result<bool> {
        let probe = CompletionRequest {
            prompt: "Hi".to_string(),
            max_tokens: 5,
            temperature: 0.1,
            stop_sequences: Vec::new(),
            timeout: Duration::from_secs(10),
        };
        match self.complete(&probe).await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("{} availability check failed: {}", self.provider, e);
                Ok(false)
            }
        }
    }
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> Nl2SqlError {
    if err.is_timeout() {
        Nl2SqlError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        Nl2SqlError::Completion(format!("Completion API call failed: {}", err))
    }
}
