//! Exact-key lookup of table DDL.

use crate::error::Result;
use crate::schema_rag::corpus::TABLE_DEFINITIONS;
use crate::schema_rag::vector_store::EmbeddingIndex;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait TableDefinitionStore: Send + Sync {
    /// DDL for `name`, or `None` when the table is unknown.
    async fn get(&self, name: &str) -> Result<Option<String>>;
}

/// Reads DDL from the `table_definitions` collection of an embedding index.
pub struct IndexTableStore {
    index: Arc<dyn EmbeddingIndex>,
}

impl IndexTableStore {
    pub fn new(index: Arc<dyn EmbeddingIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl TableDefinitionStore for IndexTableStore {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .index
            .get(TABLE_DEFINITIONS, name)
            .await?
            .map(|doc| doc.text))
    }
}

#[async_trait]
impl TableDefinitionStore for HashMap<String, String> {
    async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(HashMap::get(self, name).cloned())
    }
}
