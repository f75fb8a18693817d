pub mod cancel;
pub mod config;
pub mod error;
pub mod explain;
pub mod extract;
pub mod llm;
pub mod optimizer;
pub mod orchestrator;
pub mod prompt;
pub mod repair;
pub mod schema_rag;
pub mod sql_text;
pub mod validator;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::Settings;
pub use error::{Nl2SqlError, Result};
pub use llm::{CompletionRequest, CompletionService, LlmClient, LlmProvider};
pub use optimizer::{OptimizationResult, SqlOptimizer};
pub use orchestrator::{GenerateRequest, GenerationResult, HealthReport, SqlGenerator};
pub use validator::{RiskLevel, SqlValidator, ValidationMode, ValidationReport};
