//! Schema retrieval: embedding index, seed corpus and the two-step retriever.

pub mod corpus;
pub mod embedder;
pub mod retriever;
pub mod table_store;
pub mod vector_store;

pub use corpus::{Corpus, IndexBuilder, IndexStats, TableDefinition, TableMapping, WorkedExample};
pub use embedder::{build_embedder, Embedder, EmbedderKind, HashingEmbedder, OpenAiEmbedder};
pub use retriever::{ExampleMatch, RetrievalContext, TableLookup, TwoStepRetriever};
pub use table_store::{IndexTableStore, TableDefinitionStore};
pub use vector_store::{EmbeddingIndex, InMemoryVectorStore, SwappableIndex};
