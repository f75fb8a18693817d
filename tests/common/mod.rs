#![allow(dead_code)]

use async_trait::async_trait;
use iiq_nl2sql::config::Settings;
use iiq_nl2sql::error::{Nl2SqlError, Result};
use iiq_nl2sql::llm::{CompletionRequest, CompletionService};
use iiq_nl2sql::orchestrator::SqlGenerator;
use iiq_nl2sql::schema_rag::{
    Corpus, EmbeddingIndex, HashingEmbedder, IndexBuilder, IndexTableStore, TwoStepRetriever,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the scripted service does on one call
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Sleeps far past any test timeout
    Hang,
}

pub fn text(s: &str) -> Reply {
    Reply::Text(s.to_string())
}

/// Completion stub replaying a script; the last reply repeats once the
/// script runs out. Records every prompt it receives.
pub struct ScriptedCompletion {
    script: Vec<Reply>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let reply = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(request.prompt.clone());
            let i = (prompts.len() - 1).min(self.script.len().saturating_sub(1));
            self.script.get(i).cloned()
        };
        match reply {
            Some(Reply::Text(s)) => Ok(s),
            Some(Reply::Fail(msg)) => Err(Nl2SqlError::Completion(msg)),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
            None => Err(Nl2SqlError::Completion("empty script".to_string())),
        }
    }

    fn model_id(&self) -> String {
        "scripted".to_string()
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

pub async fn index() -> Arc<dyn EmbeddingIndex> {
    let builder = IndexBuilder::new(Arc::new(HashingEmbedder::new(512)));
    Arc::new(builder.build(&Corpus::builtin()).await.unwrap())
}

pub async fn retriever() -> TwoStepRetriever {
    let index = index().await;
    let tables = Arc::new(IndexTableStore::new(Arc::clone(&index)));
    TwoStepRetriever::new(index, tables)
}

pub async fn generator_with(llm: Arc<ScriptedCompletion>, settings: &Settings) -> SqlGenerator {
    SqlGenerator::new(llm, retriever().await, settings)
}

pub async fn generator(llm: Arc<ScriptedCompletion>) -> SqlGenerator {
    generator_with(llm, &Settings::default()).await
}
