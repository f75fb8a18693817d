//! Retrieval corpus and offline index population.
//!
//! The request path only reads the index. Rebuilding goes through
//! [`IndexBuilder::rebuild`], which populates a brand-new store and swaps it
//! in, so live sessions never observe a partially populated index.

use crate::error::Result;
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::{EmbeddingIndex, InMemoryVectorStore, SwappableIndex};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const QUERY_TO_TABLES: &str = "query_to_tables";
pub const TABLE_DEFINITIONS: &str = "table_definitions";
pub const TRAINING_EXAMPLES: &str = "training_examples";

/// Leading words of DDL body lines that are not column definitions
const NON_COLUMN_WORDS: &[&str] = &[
    "PRIMARY", "UNIQUE", "KEY", "INDEX", "CONSTRAINT", "FOREIGN", "CHECK", "FULLTEXT", "CREATE",
];

lazy_static! {
    static ref COLUMN_LINE: Regex = Regex::new(r"(?m)^\s*`?([A-Za-z_]\w*)`?\s+[A-Za-z]").unwrap();
}

/// Table name and its DDL text. Fetched by exact key only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub ddl: String,
}

impl TableDefinition {
    /// Lowercased column names declared in the DDL.
    pub fn columns(&self) -> HashSet<String> {
        COLUMN_LINE
            .captures_iter(&self.ddl)
            .map(|c| c[1].to_string())
            .filter(|name| !NON_COLUMN_WORDS.contains(&name.to_ascii_uppercase().as_str()))
            .map(|name| name.to_ascii_lowercase())
            .collect()
    }
}

/// Canonical analyst phrase mapped to the tables that answer it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub phrase: String,
    pub tables: Vec<String>,
}

/// Natural-language / SQL pair used to steer generation by demonstration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkedExample {
    pub id: String,
    pub natural_language: String,
    pub sql: String,
    pub explanation: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkedExample {
    pub(crate) fn to_metadata(&self) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("sql".to_string(), self.sql.clone());
        m.insert("explanation".to_string(), self.explanation.clone());
        m.insert("tags".to_string(), self.tags.join(","));
        m
    }

    pub(crate) fn from_document(id: &str, text: &str, metadata: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            id: id.to_string(),
            natural_language: text.to_string(),
            sql: metadata.get("sql")?.clone(),
            explanation: metadata.get("explanation").cloned().unwrap_or_default(),
            tags: metadata
                .get("tags")
                .map(|t| split_list(t))
                .unwrap_or_default(),
        })
    }
}

/// Comma-joined metadata value back into its items, first occurrence kept.
pub(crate) fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unique()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Corpus {
    pub tables: Vec<TableDefinition>,
    pub table_mappings: Vec<TableMapping>,
    pub examples: Vec<WorkedExample>,
}

impl Corpus {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let corpus: Corpus = serde_json::from_str(&raw)?;
        info!(
            "Loaded corpus from {:?}: {} tables, {} mappings, {} examples",
            path,
            corpus.tables.len(),
            corpus.table_mappings.len(),
            corpus.examples.len()
        );
        Ok(corpus)
    }

    /// The IdentityIQ identity / account-link / application schema.
    pub fn builtin() -> Self {
        let tables = vec![
            TableDefinition {
                name: "spt_identity".to_string(),
                ddl: SPT_IDENTITY_DDL.to_string(),
            },
            TableDefinition {
                name: "spt_link".to_string(),
                ddl: SPT_LINK_DDL.to_string(),
            },
            TableDefinition {
                name: "spt_application".to_string(),
                ddl: SPT_APPLICATION_DDL.to_string(),
            },
        ];

        let identity_link_app = ["spt_identity", "spt_link", "spt_application"];
        let mapping = |phrase: &str, tables: &[&str]| TableMapping {
            phrase: phrase.to_string(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
        };
        let table_mappings = vec![
            mapping(
                "give me all the identities who does have account in Workday application",
                &identity_link_app,
            ),
            mapping("show me users with application access", &identity_link_app),
            mapping("find users who have accounts in apps", &identity_link_app),
            mapping("list employees with system access", &identity_link_app),
            mapping("get all users accounts for applications", &identity_link_app),
            mapping("list all active employees", &["spt_identity"]),
            mapping("show inactive users and their email addresses", &["spt_identity"]),
            mapping("who is the manager of each identity", &["spt_identity"]),
            mapping("list all applications and their owners", &["spt_application", "spt_identity"]),
            mapping("show application connector types", &["spt_application"]),
            mapping("count accounts per application", &["spt_link", "spt_application"]),
            mapping("find orphan accounts without an identity", &["spt_link", "spt_identity"]),
        ];

        let examples = vec![
            WorkedExample {
                id: "workday_accounts".to_string(),
                natural_language:
                    "give me all the identities who does have account in Workday application".to_string(),
                sql: "SELECT DISTINCT i.firstname, i.lastname, i.email FROM spt_identity i JOIN spt_link l ON i.id = l.identity_id JOIN spt_application a ON l.application = a.id WHERE a.name = 'Workday' AND i.inactive = 0;".to_string(),
                explanation: "Finds all active users who have accounts in the Workday application by joining identity, link, and application tables".to_string(),
                tags: vec!["user_application_access".to_string(), "join".to_string()],
            },
            WorkedExample {
                id: "active_identities".to_string(),
                natural_language: "list all active employees with their email addresses".to_string(),
                sql: "SELECT i.firstname, i.lastname, i.email FROM spt_identity i WHERE i.inactive = 0;".to_string(),
                explanation: "Reads active identities only; inactive = 0 marks an active identity".to_string(),
                tags: vec!["identity".to_string(), "filter".to_string()],
            },
            WorkedExample {
                id: "accounts_per_application".to_string(),
                natural_language: "count accounts per application".to_string(),
                sql: "SELECT a.name, COUNT(l.id) AS account_count FROM spt_application a JOIN spt_link l ON l.application = a.id GROUP BY a.name ORDER BY account_count DESC;".to_string(),
                explanation: "Groups account links by application and counts them".to_string(),
                tags: vec!["aggregation".to_string(), "application".to_string()],
            },
        ];

        Self {
            tables,
            table_mappings,
            examples,
        }
    }
}

/// Collection sizes after a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub table_mappings: usize,
    pub table_definitions: usize,
    pub examples: usize,
}

pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    /// Populate a fresh store with the three collections.
    pub async fn build(&self, corpus: &Corpus) -> Result<InMemoryVectorStore> {
        let store = InMemoryVectorStore::new(Arc::clone(&self.embedder));

        for (i, mapping) in corpus.table_mappings.iter().enumerate() {
            let mut m = HashMap::new();
            m.insert("table_names".to_string(), mapping.tables.join(","));
            store
                .upsert(QUERY_TO_TABLES, &format!("query_{}", i), &mapping.phrase, m)
                .await?;
        }

        for table in &corpus.tables {
            let mut m = HashMap::new();
            m.insert("table_name".to_string(), table.name.clone());
            store.upsert(TABLE_DEFINITIONS, &table.name, &table.ddl, m).await?;
        }

        for example in &corpus.examples {
            store
                .upsert(
                    TRAINING_EXAMPLES,
                    &example.id,
                    &example.natural_language,
                    example.to_metadata(),
                )
                .await?;
        }

        Ok(store)
    }

    /// Build a new store and atomically replace the live one.
    pub async fn rebuild(&self, index: &SwappableIndex, corpus: &Corpus) -> Result<IndexStats> {
        let store = self.build(corpus).await?;
        let stats = IndexStats {
            table_mappings: store.count(QUERY_TO_TABLES).await?,
            table_definitions: store.count(TABLE_DEFINITIONS).await?,
            examples: store.count(TRAINING_EXAMPLES).await?,
        };
        index.swap(store)?;
        info!(
            "Index rebuilt: {} mappings, {} definitions, {} examples",
            stats.table_mappings, stats.table_definitions, stats.examples
        );
        Ok(stats)
    }
}

const SPT_IDENTITY_DDL: &str = "CREATE TABLE `spt_identity` (
  `id` varchar(32) NOT NULL,
  `name` varchar(128) NOT NULL,
  `display_name` varchar(128) DEFAULT NULL,
  `firstname` varchar(128) DEFAULT NULL,
  `lastname` varchar(128) DEFAULT NULL,
  `email` varchar(128) DEFAULT NULL,
  `inactive` bit(1) DEFAULT NULL,
  `manager` varchar(32) DEFAULT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `UK_afdtg40pi16y2smshwjgj2g6h` (`name`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;";

const SPT_LINK_DDL: &str = "CREATE TABLE `spt_link` (
  `id` varchar(32) NOT NULL,
  `identity_id` varchar(32) DEFAULT NULL,
  `application` varchar(32) DEFAULT NULL,
  `native_identity` varchar(322) NOT NULL,
  `display_name` varchar(128) DEFAULT NULL,
  `attributes` longtext,
  PRIMARY KEY (`id`),
  CONSTRAINT `FK7do4oyl8j399aynq34dosvk6o` FOREIGN KEY (`identity_id`) REFERENCES `spt_identity` (`id`),
  CONSTRAINT `FKsc0du71d7t0p5jx4sqbwlrtc7` FOREIGN KEY (`application`) REFERENCES `spt_application` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;";

const SPT_APPLICATION_DDL: &str = "CREATE TABLE `spt_application` (
  `id` varchar(32) NOT NULL,
  `name` varchar(128) NOT NULL,
  `type` varchar(255) DEFAULT NULL,
  `connector` varchar(255) DEFAULT NULL,
  `owner` varchar(32) DEFAULT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `UK_ol1192j17pnj5syamkr9ecb28` (`name`),
  CONSTRAINT `FKo50q3ykyumpddcaaokonvivah` FOREIGN KEY (`owner`) REFERENCES `spt_identity` (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;";
