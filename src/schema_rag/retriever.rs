//! Two-Step Schema Retriever
//!
//! Step one maps the question onto a canonical phrase and its table set,
//! step two fetches each table's DDL by exact name. A worked example is
//! looked up alongside. Misses degrade the context; they never stop the
//! pipeline.

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::schema_rag::corpus::{split_list, TableDefinition, WorkedExample, QUERY_TO_TABLES, TRAINING_EXAMPLES};
use crate::schema_rag::table_store::TableDefinitionStore;
use crate::schema_rag::vector_store::EmbeddingIndex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Best phrase match and the tables it maps to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableLookup {
    pub table_names: Vec<String>,
    pub score: f32,
    pub matched_phrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExampleMatch {
    pub example: WorkedExample,
    pub score: f32,
}

/// Everything retrieval produced for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalContext {
    pub query: String,
    pub table_names: Vec<String>,
    pub table_score: f32,
    pub definitions: Vec<TableDefinition>,
    pub example: Option<ExampleMatch>,
    pub warnings: Vec<String>,
}

impl RetrievalContext {
    /// True when tables, their DDL and an example were all found.
    pub fn is_complete(&self) -> bool {
        !self.table_names.is_empty() && !self.definitions.is_empty() && self.example.is_some()
    }
}

pub struct TwoStepRetriever {
    index: Arc<dyn EmbeddingIndex>,
    tables: Arc<dyn TableDefinitionStore>,
    top_k: usize,
    min_table_similarity: f32,
    min_example_similarity: f32,
}

impl TwoStepRetriever {
    pub fn new(index: Arc<dyn EmbeddingIndex>, tables: Arc<dyn TableDefinitionStore>) -> Self {
        Self::from_config(index, tables, &RetrievalConfig::default())
    }

    pub fn from_config(
        index: Arc<dyn EmbeddingIndex>,
        tables: Arc<dyn TableDefinitionStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            tables,
            top_k: config.top_k.max(1),
            min_table_similarity: config.min_table_similarity,
            min_example_similarity: config.min_example_similarity,
        }
    }

    pub fn with_min_table_similarity(mut self, floor: f32) -> Self {
        self.min_table_similarity = floor;
        self
    }

    pub fn index(&self) -> &Arc<dyn EmbeddingIndex> {
        &self.index
    }

    /// Table set of the single best phrase match. An empty lookup means no
    /// phrase reached the similarity floor.
    pub async fn lookup_tables(&self, query: &str) -> Result<TableLookup> {
        let results = self.index.query(QUERY_TO_TABLES, query, self.top_k).await?;
        let Some(best) = results.into_iter().next() else {
            debug!("No table mapping shares any term with '{}'", query);
            return Ok(TableLookup::default());
        };

        if best.score < self.min_table_similarity {
            debug!(
                "Best table mapping '{}' scored {:.3}, below floor {:.3}",
                best.document.text, best.score, self.min_table_similarity
            );
            return Ok(TableLookup::default());
        }

        let table_names = best
            .document
            .metadata
            .get("table_names")
            .map(|t| split_list(t))
            .unwrap_or_default();

        Ok(TableLookup {
            table_names,
            score: best.score,
            matched_phrase: Some(best.document.text),
        })
    }

    /// DDL for each name, in the given order. Unknown names are dropped.
    pub async fn lookup_definitions(&self, table_names: &[String]) -> Result<Vec<TableDefinition>> {
        let mut definitions = Vec::with_capacity(table_names.len());
        for name in table_names {
            match self.tables.get(name).await? {
                Some(ddl) => definitions.push(TableDefinition {
                    name: name.clone(),
                    ddl,
                }),
                None => debug!("No definition stored for table '{}'", name),
            }
        }
        Ok(definitions)
    }

    pub async fn lookup_example(&self, query: &str) -> Result<Option<ExampleMatch>> {
        let results = self.index.query(TRAINING_EXAMPLES, query, self.top_k).await?;
        let Some(best) = results.into_iter().next() else {
            return Ok(None);
        };
        if best.score < self.min_example_similarity {
            return Ok(None);
        }
        let doc = best.document;
        Ok(WorkedExample::from_document(&doc.id, &doc.text, &doc.metadata).map(|example| ExampleMatch {
            example,
            score: best.score,
        }))
    }

    /// Run both lookups and bundle the results. Lookup errors become
    /// warnings on the context.
    pub async fn compose_context(&self, query: &str) -> RetrievalContext {
        let mut context = RetrievalContext {
            query: query.to_string(),
            ..Default::default()
        };

        match self.lookup_tables(query).await {
            Ok(lookup) => {
                context.table_names = lookup.table_names;
                context.table_score = lookup.score;
            }
            Err(e) => {
                warn!("Table lookup failed: {}", e);
                context.warnings.push(format!("Table lookup failed: {}", e));
            }
        }

        if context.table_names.is_empty() {
            context
                .warnings
                .push("No relevant tables found for the question".to_string());
        } else {
            match self.lookup_definitions(&context.table_names).await {
                Ok(defs) => {
                    if defs.len() < context.table_names.len() {
                        context.warnings.push(format!(
                            "Definitions found for {} of {} tables",
                            defs.len(),
                            context.table_names.len()
                        ));
                    }
                    context.definitions = defs;
                }
                Err(e) => {
                    warn!("Definition lookup failed: {}", e);
                    context.warnings.push(format!("Definition lookup failed: {}", e));
                }
            }
        }

        match self.lookup_example(query).await {
            Ok(Some(example)) => context.example = Some(example),
            Ok(None) => context
                .warnings
                .push("No similar worked example found".to_string()),
            Err(e) => {
                warn!("Example lookup failed: {}", e);
                context.warnings.push(format!("Example lookup failed: {}", e));
            }
        }

        info!(
            "Retrieved {} tables ({} definitions, score {:.3}), example: {}",
            context.table_names.len(),
            context.definitions.len(),
            context.table_score,
            context
                .example
                .as_ref()
                .map_or("none".to_string(), |e| e.example.id.clone())
        );
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::corpus::{Corpus, IndexBuilder};
    use crate::schema_rag::embedder::HashingEmbedder;
    use crate::schema_rag::table_store::IndexTableStore;
    use std::collections::HashMap;

    async fn retriever() -> TwoStepRetriever {
        let store = IndexBuilder::new(Arc::new(HashingEmbedder::new(512)))
            .build(&Corpus::builtin())
            .await
            .unwrap();
        let index: Arc<dyn EmbeddingIndex> = Arc::new(store);
        let tables = Arc::new(IndexTableStore::new(Arc::clone(&index)));
        TwoStepRetriever::new(index, tables)
    }

    #[tokio::test]
    async fn test_workday_question_maps_to_three_tables() {
        let r = retriever().await;
        let lookup = r
            .lookup_tables("give me all the identities who does have account in Workday application")
            .await
            .unwrap();
        assert_eq!(lookup.table_names, vec!["spt_identity", "spt_link", "spt_application"]);
        assert!((lookup.score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_active_employees_maps_to_identity() {
        let r = retriever().await;
        let context = r.compose_context("Show me all active employees").await;
        assert_eq!(context.table_names, vec!["spt_identity"]);
        assert_eq!(context.definitions.len(), 1);
        assert!(context.definitions[0].ddl.contains("`inactive`"));
        assert!(context.table_score > 0.0 && context.table_score <= 1.0);
    }

    #[tokio::test]
    async fn test_unrelated_question_yields_empty_context() {
        let r = retriever().await;
        let context = r.compose_context("what is the weather").await;
        assert!(context.table_names.is_empty());
        assert!(context.definitions.is_empty());
        assert!(context.example.is_none());
        assert!(!context.is_complete());
        assert!(!context.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_floor_is_enforced() {
        // best match scores about 0.82
        let r = retriever().await.with_min_table_similarity(0.99);
        let lookup = r.lookup_tables("active employees in Workday").await.unwrap();
        assert!(lookup.table_names.is_empty());

        let r = retriever().await.with_min_table_similarity(0.8);
        let lookup = r.lookup_tables("active employees in Workday").await.unwrap();
        assert_eq!(lookup.table_names, vec!["spt_identity"]);
    }

    #[tokio::test]
    async fn test_missing_definitions_are_dropped() {
        let mut map = HashMap::new();
        map.insert("spt_identity".to_string(), "CREATE TABLE spt_identity (id varchar(32))".to_string());
        let store = IndexBuilder::new(Arc::new(HashingEmbedder::new(64)))
            .build(&Corpus::default())
            .await
            .unwrap();
        let r = TwoStepRetriever::new(Arc::new(store), Arc::new(map));
        let defs = r
            .lookup_definitions(&["spt_identity".to_string(), "spt_nope".to_string()])
            .await
            .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "spt_identity");
    }
}
