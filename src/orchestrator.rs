//! Generation Orchestrator
//!
//! Drives one request through retrieval, prompt assembly, bounded completion
//! attempts, extraction, validation (with at most one local repair) and
//! optimization. `generate` never returns an error: every failure ends up in
//! the result's `errors`/`warnings`.

use crate::cancel::CancelSignal;
use crate::config::{clamp_retries, GenerationConfig, LlmConfig, Settings};
use crate::error::{Nl2SqlError, Result};
use crate::explain::describe;
use crate::extract::{extract, extract_candidate, is_sentinel};
use crate::llm::{CompletionRequest, CompletionService};
use crate::optimizer::{OptimizationResult, SqlOptimizer};
use crate::prompt::{DomainRules, PromptAssembler};
use crate::repair::repair;
use crate::schema_rag::corpus::{QUERY_TO_TABLES, TABLE_DEFINITIONS, TRAINING_EXAMPLES};
use crate::schema_rag::retriever::TwoStepRetriever;
use crate::validator::{SqlValidator, ValidationReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Parameters of one `generate` call
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub query: String,
    pub include_explanation: bool,
    /// Overrides the configured retry budget; clamped to 1..=5
    pub max_retries: Option<usize>,
    pub validate_syntax: bool,
    /// Return the optimizer's rewrite instead of the generated text
    pub optimize_query: bool,
}

impl GenerateRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_explanation: true,
            max_retries: None,
            validate_syntax: true,
            optimize_query: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Retrieving,
    Prompting,
    Generating,
    Extracting,
    Validating,
    Repairing,
    Optimizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationAttempt {
    /// 1-based
    pub index: usize,
    pub prompt: String,
    pub raw_completion: Option<String>,
    pub extracted_sql: Option<String>,
    pub validation: Option<ValidationReport>,
    pub error: Option<String>,
}

impl GenerationAttempt {
    fn new(index: usize, prompt: String) -> Self {
        Self {
            index,
            prompt,
            raw_completion: None,
            extracted_sql: None,
            validation: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationMetadata {
    /// Completion calls made
    pub attempts: usize,
    pub model_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: i64,
    pub tables: Vec<String>,
    pub context_complete: bool,
    pub final_state: SessionState,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    /// Final statement; empty when no candidate was obtained
    pub sql: String,
    pub explanation: Option<String>,
    pub validation_result: Option<ValidationReport>,
    pub optimization_result: Option<OptimizationResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub attempts: Vec<GenerationAttempt>,
    pub metadata: GenerationMetadata,
}

/// Validation and optimization of caller-supplied SQL
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub original_query: String,
    pub validation_result: ValidationReport,
    pub optimization_result: OptimizationResult,
    pub final_query: String,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate and optimize `sql` without a completion service. The optimized
/// text becomes the final query only when validation passes.
pub fn check_sql(validator: &SqlValidator, optimizer: &SqlOptimizer, sql: &str) -> CheckResult {
    let validation = validator.validate(sql);
    let optimization = optimizer.optimize(sql);
    let final_query = if validation.valid {
        optimization.optimized_query.clone()
    } else {
        sql.to_string()
    };

    let mut warnings = validation.warnings.clone();
    warnings.extend(validation.security_issues.iter().cloned());
    warnings.extend(optimization.warnings.iter().cloned());

    CheckResult {
        original_query: sql.to_string(),
        success: validation.valid,
        errors: validation.errors.clone(),
        warnings,
        validation_result: validation,
        optimization_result: optimization,
        final_query,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub issues: Vec<String>,
}

/// Per-session bookkeeping; dropped when the result is returned.
struct Session {
    id: String,
    started_at: DateTime<Utc>,
    state: SessionState,
    attempts: Vec<GenerationAttempt>,
    warnings: Vec<String>,
    errors: Vec<String>,
    tables: Vec<String>,
    context_complete: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: SessionState::Retrieving,
            attempts: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            tables: Vec::new(),
            context_complete: false,
        }
    }

    fn enter(&mut self, state: SessionState) {
        debug!("{:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

pub struct SqlGenerator {
    llm: Arc<dyn CompletionService>,
    retriever: TwoStepRetriever,
    validator: SqlValidator,
    optimizer: SqlOptimizer,
    assembler: PromptAssembler,
    rules: DomainRules,
    llm_config: LlmConfig,
    generation: GenerationConfig,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn CompletionService>, retriever: TwoStepRetriever, settings: &Settings) -> Self {
        Self {
            llm,
            retriever,
            validator: SqlValidator::new(settings.validation.clone()),
            optimizer: SqlOptimizer::new(),
            assembler: PromptAssembler::new(),
            rules: DomainRules::default(),
            llm_config: settings.llm.clone(),
            generation: settings.generation.clone(),
        }
    }

    pub fn with_rules(mut self, rules: DomainRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_optimizer(mut self, optimizer: SqlOptimizer) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn validator(&self) -> &SqlValidator {
        &self.validator
    }

    pub fn optimizer(&self) -> &SqlOptimizer {
        &self.optimizer
    }

    pub async fn generate(&self, request: &GenerateRequest) -> GenerationResult {
        self.generate_with_cancel(request, &CancelSignal::never()).await
    }

    /// Same as [`generate`](Self::generate); a fired `cancel` aborts the
    /// in-flight completion call and ends the session.
    pub async fn generate_with_cancel(&self, request: &GenerateRequest, cancel: &CancelSignal) -> GenerationResult {
        let session = Session::new();
        let span = info_span!("generation", session = %session.id);
        self.run(request, cancel, session).instrument(span).await
    }

    async fn run(&self, request: &GenerateRequest, cancel: &CancelSignal, mut session: Session) -> GenerationResult {
        info!("Generating SQL for: {}", request.query);

        if request.query.trim().is_empty() {
            session.errors.push("Query is empty".to_string());
            return self.finish(session, String::new(), None, None, None);
        }

        let context = self.retriever.compose_context(&request.query).await;
        session.tables = context.table_names.clone();
        session.context_complete = context.is_complete();
        session.warnings.extend(context.warnings.iter().cloned());

        session.enter(SessionState::Prompting);

        let budget = clamp_retries(request.max_retries.unwrap_or(self.generation.max_retries));
        let mut candidate: Option<String> = None;
        let mut rejected: Option<String> = None;

        for index in 0..budget {
            let prompt = self.assembler.build_attempt(
                &request.query,
                &context.definitions,
                context.example.as_ref(),
                &self.rules,
                index + 1,
            );
            let mut attempt = GenerationAttempt::new(index + 1, prompt.clone());
            info!("Generation attempt {} of {}", index + 1, budget);

            session.enter(SessionState::Generating);
            let completion = CompletionRequest::from_config(prompt, &self.llm_config);
            match self.complete(&completion, cancel).await {
                Ok(raw) => {
                    session.enter(SessionState::Extracting);
                    let sql = extract(&raw);
                    if is_sentinel(&sql) {
                        warn!("Attempt {} produced no usable SQL", index + 1);
                        attempt.error = Some("No SQL could be extracted from the completion".to_string());
                        if let Some(found) = extract_candidate(&raw) {
                            rejected = Some(found);
                        }
                    } else {
                        attempt.extracted_sql = Some(sql.clone());
                        candidate = Some(sql);
                    }
                    attempt.raw_completion = Some(raw);
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", index + 1, e);
                    attempt.error = Some(e.to_string());
                    session.attempts.push(attempt);
                    if !e.is_retryable() {
                        session.errors.push(e.to_string());
                        break;
                    }
                    session.warnings.push(format!("Attempt {} failed: {}", index + 1, e));
                    continue;
                }
            }
            session.attempts.push(attempt);
            if candidate.is_some() {
                break;
            }
        }

        let Some(mut sql) = candidate else {
            session.errors.push(format!(
                "No SQL generated after {} attempt(s)",
                session.attempts.len()
            ));
            let validation = rejected.map(|found| {
                let report = self.validator.validate(&found);
                session.errors.extend(report.errors.iter().cloned());
                session.warnings.extend(report.security_issues.iter().cloned());
                report
            });
            return self.finish(session, String::new(), None, validation, None);
        };

        let mut validation = None;
        if request.validate_syntax {
            session.enter(SessionState::Validating);
            let mut report = self.validator.validate(&sql);

            if !report.valid && report.is_repairable() {
                session.enter(SessionState::Repairing);
                let repaired = repair(&sql, &report.defects);
                session.enter(SessionState::Validating);
                let second = self.validator.validate(&repaired);
                if second.valid {
                    info!("Repair produced valid SQL");
                    session.warnings.push("Applied automatic syntax repair".to_string());
                    sql = repaired;
                    report = second;
                } else {
                    session
                        .warnings
                        .push("Automatic repair did not produce valid SQL".to_string());
                }
            }

            session.errors.extend(report.errors.iter().cloned());
            session.warnings.extend(report.warnings.iter().cloned());
            session.warnings.extend(report.security_issues.iter().cloned());
            if !context.definitions.is_empty() {
                let available: HashSet<String> = context.definitions.iter().flat_map(|d| d.columns()).collect();
                let columns = self.validator.check_column_references(&sql, &available);
                for column in &columns.missing {
                    session
                        .warnings
                        .push(format!("Column '{}' not found in retrieved tables", column));
                }
            }
            if let Some(attempt) = session.attempts.last_mut() {
                attempt.validation = Some(report.clone());
            }
            validation = Some(report);
        }

        session.enter(SessionState::Optimizing);
        let optimization = self.optimizer.optimize(&sql);
        session.warnings.extend(optimization.warnings.iter().cloned());
        if request.optimize_query && optimization.optimized_query != sql {
            info!("Using optimized SQL ({} rule(s))", optimization.applied_rules.len());
            sql = optimization.optimized_query.clone();
        }

        let explanation = request.include_explanation.then(|| describe(&sql));
        self.finish(session, sql, explanation, validation, Some(optimization))
    }

    /// One completion call bounded by the request timeout and `cancel`.
    async fn complete(&self, request: &CompletionRequest, cancel: &CancelSignal) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(Nl2SqlError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Nl2SqlError::Cancelled),
            outcome = tokio::time::timeout(request.timeout, self.llm.complete(request)) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Nl2SqlError::Timeout { secs: request.timeout.as_secs() }),
            },
        }
    }

    fn finish(
        &self,
        mut session: Session,
        sql: String,
        explanation: Option<String>,
        validation: Option<ValidationReport>,
        optimization: Option<OptimizationResult>,
    ) -> GenerationResult {
        let obtained = !sql.is_empty();
        let acceptable = match &validation {
            _ if !obtained => false,
            None => true,
            Some(report) => {
                let within = report.risk_level <= self.generation.max_acceptable_risk;
                if report.valid && !within {
                    session.errors.push(format!(
                        "Risk level {} exceeds the acceptable level {}",
                        report.risk_level, self.generation.max_acceptable_risk
                    ));
                }
                report.valid && within
            }
        };

        session.enter(if acceptable { SessionState::Done } else { SessionState::Failed });
        let elapsed_ms = (Utc::now() - session.started_at).num_milliseconds();
        if acceptable {
            info!("Generation succeeded in {}ms", elapsed_ms);
        } else {
            warn!("Generation failed: {}", session.errors.join("; "));
        }

        GenerationResult {
            success: acceptable,
            sql,
            explanation,
            validation_result: validation,
            optimization_result: optimization,
            warnings: session.warnings,
            errors: session.errors,
            metadata: GenerationMetadata {
                attempts: session.attempts.len(),
                model_id: self.llm.model_id(),
                session_id: session.id,
                started_at: session.started_at,
                elapsed_ms,
                tables: session.tables,
                context_complete: session.context_complete,
                final_state: session.state,
            },
            attempts: session.attempts,
        }
    }

    /// Validate and optimize SQL that did not come from generation.
    pub fn check_existing(&self, sql: &str) -> CheckResult {
        check_sql(&self.validator, &self.optimizer, sql)
    }

    pub async fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        let mut issues = Vec::new();

        let probe = tokio::time::timeout(self.llm_config.timeout, self.llm.health_check()).await;
        let llm = match probe {
            Ok(Ok(true)) => ComponentHealth {
                status: HealthStatus::Healthy,
                detail: self.llm.model_id(),
            },
            Ok(Ok(false)) => {
                issues.push("Completion service did not answer the probe".to_string());
                ComponentHealth {
                    status: HealthStatus::Unhealthy,
                    detail: "probe failed".to_string(),
                }
            }
            Ok(Err(e)) => {
                issues.push(format!("Completion service: {}", e));
                ComponentHealth {
                    status: HealthStatus::Unhealthy,
                    detail: e.to_string(),
                }
            }
            Err(_) => {
                issues.push("Completion service probe timed out".to_string());
                ComponentHealth {
                    status: HealthStatus::Unhealthy,
                    detail: "timed out".to_string(),
                }
            }
        };
        components.insert("llm".to_string(), llm);

        let index = self.retriever.index();
        let mut counts = Vec::new();
        let mut index_status = HealthStatus::Healthy;
        for collection in [QUERY_TO_TABLES, TABLE_DEFINITIONS, TRAINING_EXAMPLES] {
            match index.count(collection).await {
                Ok(n) => {
                    if n == 0 {
                        index_status = index_status.max(HealthStatus::Degraded);
                        issues.push(format!("Collection '{}' is empty", collection));
                    }
                    counts.push(format!("{}={}", collection, n));
                }
                Err(e) => {
                    index_status = HealthStatus::Unhealthy;
                    issues.push(format!("Collection '{}': {}", collection, e));
                }
            }
        }
        components.insert(
            "schema_retriever".to_string(),
            ComponentHealth {
                status: index_status,
                detail: counts.join(", "),
            },
        );
        for name in ["validator", "optimizer"] {
            components.insert(
                name.to_string(),
                ComponentHealth {
                    status: HealthStatus::Healthy,
                    detail: String::new(),
                },
            );
        }

        let overall_status = match (components["llm"].status, index_status) {
            (HealthStatus::Unhealthy, _) => HealthStatus::Unhealthy,
            (_, HealthStatus::Healthy) => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        };
        HealthReport {
            overall_status,
            components,
            issues,
        }
    }
}
