use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iiq_nl2sql::cancel::CancelHandle;
use iiq_nl2sql::config::Settings;
use iiq_nl2sql::llm::LlmClient;
use iiq_nl2sql::optimizer::SqlOptimizer;
use iiq_nl2sql::orchestrator::{check_sql, GenerateRequest, SqlGenerator};
use iiq_nl2sql::schema_rag::{
    build_embedder, Corpus, EmbeddingIndex, IndexBuilder, IndexTableStore, InMemoryVectorStore,
    SwappableIndex, TwoStepRetriever,
};
use iiq_nl2sql::validator::SqlValidator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "iiq-nl2sql")]
#[command(about = "Natural-language questions to read-only SQL over the IdentityIQ schema")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL for a natural-language question
    Generate {
        query: String,
        #[arg(long)]
        max_retries: Option<usize>,
        #[arg(long)]
        no_validate: bool,
        #[arg(long)]
        no_optimize: bool,
        #[arg(long)]
        no_explanation: bool,
    },
    /// Validate and optimize an existing statement
    Check { sql: String },
    /// Performance score and complexity of a statement
    Analyze { sql: String },
    /// Index suggestions for a statement
    Indexes { sql: String },
    /// Probe the completion service and the embedding index
    Health,
    /// Print the built-in seed corpus as JSON
    Corpus,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_generator(settings: &Settings) -> Result<SqlGenerator> {
    let embedder = build_embedder(&settings.retrieval, settings.llm.api_key.clone())?;
    let corpus = match &settings.retrieval.corpus_path {
        Some(path) => Corpus::load(path).with_context(|| format!("loading corpus {}", path.display()))?,
        None => Corpus::builtin(),
    };

    let index = Arc::new(SwappableIndex::new(InMemoryVectorStore::new(Arc::clone(&embedder))));
    let stats = IndexBuilder::new(embedder).rebuild(&index, &corpus).await?;
    info!(
        "Index ready: {} mappings, {} definitions, {} examples",
        stats.table_mappings, stats.table_definitions, stats.examples
    );

    let index: Arc<dyn EmbeddingIndex> = index;
    let tables = Arc::new(IndexTableStore::new(Arc::clone(&index)));
    let retriever = TwoStepRetriever::from_config(index, tables, &settings.retrieval);
    let llm = Arc::new(LlmClient::from_config(&settings.llm)?);
    Ok(SqlGenerator::new(llm, retriever, settings))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Command::Generate {
            query,
            max_retries,
            no_validate,
            no_optimize,
            no_explanation,
        } => {
            let generator = build_generator(&settings).await?;
            let request = GenerateRequest {
                query,
                include_explanation: !no_explanation,
                max_retries,
                validate_syntax: !no_validate,
                optimize_query: !no_optimize,
            };

            let (handle, signal) = CancelHandle::new();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling generation");
                    handle.cancel();
                }
            });

            let result = generator.generate_with_cancel(&request, &signal).await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Command::Check { sql } => {
            let validator = SqlValidator::new(settings.validation.clone());
            let check = check_sql(&validator, &SqlOptimizer::new(), &sql);
            print_json(&check)?;
            if !check.success {
                std::process::exit(1);
            }
        }
        Command::Analyze { sql } => {
            let validator = SqlValidator::new(settings.validation.clone());
            let optimizer = SqlOptimizer::new();
            print_json(&serde_json::json!({
                "performance": optimizer.analyze(&sql),
                "complexity": validator.complexity(&sql),
            }))?;
        }
        Command::Indexes { sql } => {
            print_json(&SqlOptimizer::new().suggest_indexes(&sql))?;
        }
        Command::Health => {
            let generator = build_generator(&settings).await?;
            print_json(&generator.health().await)?;
        }
        Command::Corpus => {
            print_json(&Corpus::builtin())?;
        }
    }

    Ok(())
}
