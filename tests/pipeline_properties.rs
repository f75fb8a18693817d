mod common;

use common::{generator, generator_with, retriever, text, Reply, ScriptedCompletion};
use iiq_nl2sql::cancel::CancelHandle;
use iiq_nl2sql::config::{clamp_retries, Settings};
use iiq_nl2sql::extract::{extract, is_sentinel, looks_like_select};
use iiq_nl2sql::optimizer::SqlOptimizer;
use iiq_nl2sql::orchestrator::{GenerateRequest, SessionState};
use iiq_nl2sql::prompt::{DomainRules, PromptAssembler};
use iiq_nl2sql::validator::{RiskLevel, SqlValidator, ValidationMode};
use std::time::{Duration, Instant};

const VALID_SQL: &str = "SELECT i.name FROM spt_identity i WHERE i.inactive = 0";

#[tokio::test]
async fn test_completion_calls_never_exceed_retry_budget() {
    for requested in [None, Some(0), Some(1), Some(2), Some(5), Some(9)] {
        let llm = ScriptedCompletion::new(vec![Reply::Fail("backend unavailable".to_string())]);
        let generator = generator(llm.clone()).await;
        let mut request = GenerateRequest::new("list all active employees");
        request.max_retries = requested;

        let result = generator.generate(&request).await;

        let expected = clamp_retries(requested.unwrap_or(3));
        assert!(!result.success);
        assert_eq!(llm.calls(), expected, "requested {:?}", requested);
        assert_eq!(result.metadata.attempts, expected);
    }
}

#[tokio::test]
async fn test_loop_stops_at_first_extracted_sql() {
    let llm = ScriptedCompletion::new(vec![
        text("Sorry, I am not sure."),
        text(VALID_SQL),
        text("SELECT never_reached FROM spt_link"),
    ]);
    let generator = generator(llm.clone()).await;

    let result = generator
        .generate(&GenerateRequest::new("list all active employees"))
        .await;

    assert!(result.success);
    assert_eq!(llm.calls(), 2);
    assert_eq!(result.attempts.len(), 2);
    assert!(result.attempts[0].extracted_sql.is_none());
    assert!(result.attempts[1].validation.is_some());
}

#[tokio::test]
async fn test_timeout_counts_as_failed_attempt() {
    let mut settings = Settings::default();
    settings.llm.timeout = Duration::from_millis(50);
    let llm = ScriptedCompletion::new(vec![Reply::Hang, text(VALID_SQL)]);
    let generator = generator_with(llm.clone(), &settings).await;

    let result = generator
        .generate(&GenerateRequest::new("list all active employees"))
        .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(llm.calls(), 2);
    assert!(result.attempts[0]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert!(result.warnings.iter().any(|w| w.starts_with("Attempt 1 failed")));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_completion() {
    let llm = ScriptedCompletion::new(vec![Reply::Hang]);
    let generator = generator(llm.clone()).await;
    let (handle, signal) = CancelHandle::new();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });

    let started = Instant::now();
    let result = generator
        .generate_with_cancel(&GenerateRequest::new("list all active employees"), &signal)
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    assert_eq!(llm.calls(), 1);
    assert_eq!(result.metadata.final_state, SessionState::Failed);
    assert!(result.errors.iter().any(|e| e == "Generation cancelled"));
}

#[tokio::test]
async fn test_cancelled_before_start_makes_no_calls() {
    let llm = ScriptedCompletion::new(vec![text(VALID_SQL)]);
    let generator = generator(llm.clone()).await;
    let (handle, signal) = CancelHandle::new();
    handle.cancel();

    let result = generator
        .generate_with_cancel(&GenerateRequest::new("list all active employees"), &signal)
        .await;

    assert!(!result.success);
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_success_requires_acceptable_risk() {
    let medium = "SELECT CAST(i.created AS DATE) FROM spt_identity i WHERE i.inactive = 0";

    let llm = ScriptedCompletion::new(vec![text(medium)]);
    let result = generator(llm)
        .await
        .generate(&GenerateRequest::new("list all active employees"))
        .await;
    assert!(result.success);
    assert_eq!(result.validation_result.unwrap().risk_level, RiskLevel::Medium);

    let mut settings = Settings::default();
    settings.generation.max_acceptable_risk = RiskLevel::Low;
    let llm = ScriptedCompletion::new(vec![text(medium)]);
    let result = generator_with(llm, &settings)
        .await
        .generate(&GenerateRequest::new("list all active employees"))
        .await;
    assert!(!result.success);
    assert!(!result.sql.is_empty());
    assert!(result
        .errors
        .iter()
        .any(|e| e == "Risk level medium exceeds the acceptable level low"));
}

#[tokio::test]
async fn test_high_risk_select_is_returned_but_not_successful() {
    let tautology = "SELECT i.name FROM spt_identity i WHERE i.id = 7 OR 1=1";

    let llm = ScriptedCompletion::new(vec![text(tautology)]);
    let result = generator(llm)
        .await
        .generate(&GenerateRequest::new("list all active employees"))
        .await;
    let validation = result.validation_result.unwrap();
    assert!(validation.valid);
    assert_eq!(validation.risk_level, RiskLevel::High);
    assert!(!result.success);

    let mut settings = Settings::default();
    settings.validation.mode = ValidationMode::Strict;
    let llm = ScriptedCompletion::new(vec![text(tautology)]);
    let result = generator_with(llm.clone(), &settings)
        .await
        .generate(&GenerateRequest::new("list all active employees"))
        .await;
    assert!(!result.validation_result.unwrap().valid);
    assert!(!result.success);
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_skipped_validation_counts_as_success() {
    let llm = ScriptedCompletion::new(vec![text("SELECT name FROM spt_application")]);
    let mut request = GenerateRequest::new("list all applications and their owners");
    request.validate_syntax = false;
    request.include_explanation = false;

    let result = generator(llm).await.generate(&request).await;

    assert!(result.success);
    assert!(result.validation_result.is_none());
    assert!(result.explanation.is_none());
}

#[test]
fn test_only_select_and_with_are_valid() {
    let statements = [
        "INSERT INTO spt_identity (id) VALUES ('1')",
        "UPDATE spt_identity SET inactive = 1 WHERE id = '1'",
        "DELETE FROM spt_link WHERE id = '1'",
        "DROP TABLE spt_link",
        "CREATE TABLE x (id int)",
        "SHOW TABLES",
        "(SELECT 1)",
        "",
    ];
    for mode in [ValidationMode::Basic, ValidationMode::Standard, ValidationMode::Strict] {
        let validator = SqlValidator::new(iiq_nl2sql::config::ValidationConfig {
            mode,
            ..Default::default()
        });
        for sql in statements {
            assert!(!validator.validate(sql).valid, "{:?} accepted in {:?}", sql, mode);
        }
        assert!(validator.validate("WITH a AS (SELECT 1) SELECT * FROM a").valid);
    }
}

#[test]
fn test_deny_listed_keywords_are_never_low_risk() {
    let validator = SqlValidator::default();
    let keywords = [
        "DROP", "DELETE", "TRUNCATE", "ALTER", "SHUTDOWN", "CREATE", "INSERT", "UPDATE", "EXEC",
        "EXECUTE", "GRANT", "REVOKE", "OPENROWSET", "OPENDATASOURCE", "BACKUP", "RESTORE",
        "RECONFIGURE",
    ];
    for keyword in keywords {
        let sql = format!("SELECT name FROM spt_identity WHERE note = 'x' AND {} = 1", keyword.to_lowercase());
        assert_ne!(validator.validate(&sql).risk_level, RiskLevel::Low, "{}", keyword);

        let quoted = format!("SELECT name FROM spt_identity WHERE note = '{}'", keyword);
        assert_eq!(validator.validate(&quoted).risk_level, RiskLevel::Low, "{}", keyword);
    }
}

#[test]
fn test_optimizer_second_pass_rewrites_nothing() {
    let optimizer = SqlOptimizer::new();
    let inputs = [
        "SELECT * FROM spt_identity i INNER JOIN spt_link l ON i.id = l.identity_id",
        "SELECT a.name FROM spt_application a WHERE EXISTS (SELECT * FROM spt_link l WHERE l.application = a.id)",
        "SELECT name FROM spt_identity WHERE name LIKE '%son' ORDER BY UPPER(name)",
        "SELECT name FROM spt_identity WHERE note = 'inner join EXISTS (SELECT *)'",
        "SELECT COUNT(DISTINCT identity_id) FROM spt_link GROUP BY application",
    ];
    for sql in inputs {
        let once = optimizer.optimize(sql);
        let twice = optimizer.optimize(&once.optimized_query);
        assert_eq!(twice.optimized_query, once.optimized_query, "{}", sql);
        assert!(twice.applied_rules.is_empty(), "{}", sql);
    }
}

#[tokio::test]
async fn test_prompt_is_deterministic_for_retrieved_context() {
    let retriever = retriever().await;
    let assembler = PromptAssembler::new();
    let rules = DomainRules::default();

    let first = retriever.compose_context("show inactive users and their email addresses").await;
    let second = retriever.compose_context("show inactive users and their email addresses").await;
    assert_eq!(first, second);

    let a = assembler.build(&first.query, &first.definitions, first.example.as_ref(), &rules);
    let b = assembler.build(&second.query, &second.definitions, second.example.as_ref(), &rules);
    assert_eq!(a, b);

    let retry_a = assembler.build_attempt(&first.query, &first.definitions, first.example.as_ref(), &rules, 2);
    let retry_b = assembler.build_attempt(&second.query, &second.definitions, second.example.as_ref(), &rules, 2);
    assert_eq!(retry_a, retry_b);
}

#[test]
fn test_extract_output_is_select_or_sentinel() {
    let raws = [
        "SELECT 1 FROM dual",
        "DROP TABLE spt_identity;",
        "```sql\nDELETE FROM spt_link\n```",
        "Here is the query:\nWITH x AS (SELECT id FROM spt_identity) SELECT * FROM x",
        "first_name, last_name\nFROM spt_identity",
        "no sql here at all",
        "",
    ];
    for raw in raws {
        let sql = extract(raw);
        assert!(is_sentinel(&sql) || looks_like_select(&sql), "{:?} -> {:?}", raw, sql);
    }
}
