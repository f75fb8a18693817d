//! Vector Store Abstraction
//!
//! In-memory embedding index with named collections and cosine similarity
//! search. Population is an offline concern: build a fresh store and swap
//! it into a [`SwappableIndex`] instead of mutating the live one.

use crate::error::{Nl2SqlError, Result};
use crate::schema_rag::embedder::Embedder;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Document in the vector store
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub embedding: Option<Embedding>,
}

/// Search result from vector store
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine similarity, always within [0, 1]
    pub score: f32,
}

/// Similarity search over pre-embedded text, grouped into collections.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()>;

    /// Nearest neighbours of `text`, best first. Documents with no
    /// similarity at all are not neighbours and are left out.
    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<SearchResult>>;

    /// Exact lookup by document id.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    async fn count(&self, collection: &str) -> Result<usize>;
}

#[derive(Default)]
struct Collection {
    documents: HashMap<String, Document>,
    /// Insertion order, used as the tie-breaker between equal scores
    order: Vec<String>,
}

/// In-memory vector store. Linear scan per query; the corpora here are a
/// few hundred phrases at most.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Names of the populated collections, sorted
    pub fn collection_names(&self) -> Result<Vec<String>> {
        let collections = self.read()?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| Nl2SqlError::Retrieval("vector store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| Nl2SqlError::Retrieval("vector store lock poisoned".to_string()))
    }

    async fn embed_checked(&self, text: &str) -> Result<Embedding> {
        let embedding = self.embedder.embed(text).await?;
        if embedding.len() != self.dimension() {
            return Err(Nl2SqlError::Embedding(format!(
                "Embedding dimension {} doesn't match store dimension {}",
                embedding.len(),
                self.dimension()
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingIndex for InMemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let embedding = self.embed_checked(text).await?;
        let document = Document {
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            embedding: Some(embedding),
        };

        let mut collections = self.write()?;
        let entry = collections.entry(collection.to_string()).or_default();
        if entry.documents.insert(id.to_string(), document).is_none() {
            entry.order.push(id.to_string());
        }
        Ok(())
    }

    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed_checked(text).await?;

        let collections = self.read()?;
        let Some(entry) = collections.get(collection) else {
            debug!("Collection '{}' is empty or missing", collection);
            return Ok(Vec::new());
        };

        let mut results: Vec<SearchResult> = entry
            .order
            .iter()
            .filter_map(|id| entry.documents.get(id))
            .filter_map(|doc| {
                let score = doc
                    .embedding
                    .as_ref()
                    .map(|e| cosine_similarity(&query_embedding, e))
                    .unwrap_or(0.0);
                (score > 0.0).then(|| SearchResult {
                    document: doc.clone(),
                    score,
                })
            })
            .collect();

        // stable sort keeps insertion order between equal scores
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);
        Ok(results)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let collections = self.read()?;
        Ok(collections
            .get(collection)
            .and_then(|c| c.documents.get(id))
            .cloned())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.read()?;
        Ok(collections.get(collection).map_or(0, |c| c.documents.len()))
    }
}

/// Live index handle whose contents can be replaced atomically.
///
/// Readers take a snapshot `Arc` and keep using it for the whole call, so a
/// concurrent [`SwappableIndex::swap`] never exposes a half-built index.
pub struct SwappableIndex {
    current: RwLock<Arc<InMemoryVectorStore>>,
}

impl SwappableIndex {
    pub fn new(store: InMemoryVectorStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    pub fn snapshot(&self) -> Result<Arc<InMemoryVectorStore>> {
        self.current
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|_| Nl2SqlError::Retrieval("index handle lock poisoned".to_string()))
    }

    /// Replace the live store, returning the previous one.
    pub fn swap(&self, store: InMemoryVectorStore) -> Result<Arc<InMemoryVectorStore>> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| Nl2SqlError::Retrieval("index handle lock poisoned".to_string()))?;
        let previous = std::mem::replace(&mut *guard, Arc::new(store));
        info!("Embedding index swapped");
        Ok(previous)
    }
}

#[async_trait]
impl EmbeddingIndex for SwappableIndex {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        text: &str,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        self.snapshot()?.upsert(collection, id, text, metadata).await
    }

    async fn query(&self, collection: &str, text: &str, k: usize) -> Result<Vec<SearchResult>> {
        self.snapshot()?.query(collection, text, k).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.snapshot()?.get(collection, id).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.snapshot()?.count(collection).await
    }
}

/// Cosine similarity clamped to [0, 1]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::embedder::HashingEmbedder;

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(HashingEmbedder::new(256)))
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 1.0);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[tokio::test]
    async fn test_query_ranks_best_match_first() {
        let store = store();
        store
            .upsert("phrases", "a", "active employee email address", HashMap::new())
            .await
            .unwrap();
        store
            .upsert("phrases", "b", "application owner connector", HashMap::new())
            .await
            .unwrap();

        let results = store.query("phrases", "application owners", 5).await.unwrap();
        assert_eq!(results[0].document.id, "b");
        for r in &results {
            assert!(r.score > 0.0 && r.score <= 1.0);
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_get_is_exact() {
        let store = store();
        store.upsert("tables", "spt_link", "old", HashMap::new()).await.unwrap();
        store.upsert("tables", "spt_link", "new ddl", HashMap::new()).await.unwrap();
        assert_eq!(store.count("tables").await.unwrap(), 1);
        assert_eq!(store.get("tables", "spt_link").await.unwrap().unwrap().text, "new ddl");
        assert!(store.get("tables", "spt_lin").await.unwrap().is_none());
        assert!(store.get("missing", "spt_link").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_swap_replaces_contents() {
        let first = store();
        first.upsert("c", "1", "identity", HashMap::new()).await.unwrap();
        let index = SwappableIndex::new(first);
        assert_eq!(index.count("c").await.unwrap(), 1);

        let held = index.snapshot().unwrap();
        index.swap(store()).unwrap();
        assert_eq!(index.count("c").await.unwrap(), 0);
        // an in-flight reader keeps its snapshot
        assert_eq!(held.count("c").await.unwrap(), 1);
    }
}
