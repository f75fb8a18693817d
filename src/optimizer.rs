//! SQL Optimizer
//!
//! An ordered catalog of independent rules. Two rules rewrite text
//! (`INNER JOIN` to `JOIN`, `EXISTS (SELECT *)` to `EXISTS (SELECT 1)`);
//! the rest only annotate. Rewrites never touch string literals and a
//! second pass over the optimizer's own output changes nothing.

use crate::error::{Nl2SqlError, Result};
use crate::sql_text::{mask_literals, rewrite_outside_literals, unescaped_quote_count};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

/// Upper bound on the reported improvement estimate
pub const MAX_IMPROVEMENT_PERCENT: u32 = 50;

lazy_static! {
    static ref INNER_JOIN: Regex = Regex::new(r"(?i)\binner\s+join\b").unwrap();
    static ref EXISTS_SELECT_STAR: Regex = Regex::new(r"(?i)(\bexists\s*\(\s*)select\s+\*").unwrap();
    static ref SELECT_STAR: Regex = Regex::new(r"(?i)\bselect\s+(distinct\s+)?\*").unwrap();
    static ref JOIN: Regex = Regex::new(r"(?i)\bjoin\b").unwrap();
    static ref JOIN_CONDITION: Regex = Regex::new(r"(?i)\b(on|using)\b").unwrap();
    static ref CROSS_JOIN: Regex = Regex::new(r"(?i)\bcross\s+join\b").unwrap();
    static ref COMMA_FROM: Regex =
        Regex::new(r"(?i)\bfrom\s+[\w.`]+(\s+(as\s+)?\w+)?\s*,\s*[\w.`]+").unwrap();
    static ref WHERE: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();
    static ref LEADING_WILDCARD: Regex = Regex::new(r"(?i)\blike\s+'%").unwrap();
    static ref IN_LIST: Regex = Regex::new(r"(?i)\bin\s*\(([^()]*)\)").unwrap();
    static ref NOT_IN: Regex = Regex::new(r"(?i)\bnot\s+in\b").unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)\bgroup\s+by\b").unwrap();
    static ref ORDER_BY: Regex = Regex::new(r"(?i)\border\s+by\b").unwrap();
    static ref ORDER_BY_CLAUSE: Regex = Regex::new(r"(?i)\border\s+by\s+(.+?)(\blimit\b|;|$)").unwrap();
    static ref COUNT_DISTINCT: Regex = Regex::new(r"(?i)\bcount\s*\(\s*distinct\b").unwrap();
    static ref CALL: Regex = Regex::new(r"(?i)\b(upper|lower|substring|concat|date|year|trim|coalesce|ifnull)\s*\(").unwrap();
    static ref INDEX_BREAKING_CALL: Regex = Regex::new(r"(?i)\b(upper|lower|substring)\s*\(").unwrap();
    static ref OR: Regex = Regex::new(r"(?i)\bor\b").unwrap();
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref WRITE_WORD: Regex = Regex::new(r"(?i)\b(update|delete)\b").unwrap();
    static ref WHERE_COLUMN: Regex = Regex::new(
        r"(?i)\b(?:where|and|or)\s+([A-Za-z_][\w.]*)\s*(?:=|<>|!=|<=|>=|<|>|\blike\b|\bin\b|\bis\b|\bbetween\b)"
    )
    .unwrap();
    static ref JOIN_COLUMNS: Regex = Regex::new(
        r"(?i)\bjoin\s+[\w.`]+(?:\s+(?:as\s+)?\w+)?\s+on\s+([A-Za-z_][\w.]*)\s*=\s*([A-Za-z_][\w.]*)"
    )
    .unwrap();
}

/// What one rule did to a statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub modified: bool,
    pub sql: String,
    pub notes: Vec<String>,
}

impl RuleOutcome {
    fn unchanged(sql: &str, notes: Vec<String>) -> Self {
        Self {
            modified: false,
            sql: sql.to_string(),
            notes,
        }
    }
}

/// One entry of the optimizer catalog. Rules are pure; an `Err` makes the
/// optimizer skip the rule and pass the statement through unchanged.
pub trait OptimizationRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Contribution to the improvement estimate when the rule rewrites
    fn weight(&self) -> u32 {
        0
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome>;
}

pub struct JoinSimplification;

impl OptimizationRule for JoinSimplification {
    fn name(&self) -> &'static str {
        "JOIN simplification"
    }

    fn weight(&self) -> u32 {
        5
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        if !INNER_JOIN.is_match(&mask_literals(sql)) {
            return Ok(RuleOutcome::unchanged(sql, Vec::new()));
        }
        require_closed_literals(self.name(), sql)?;
        let rewritten = rewrite_outside_literals(sql, |code| INNER_JOIN.replace_all(code, "JOIN").into_owned());
        Ok(RuleOutcome {
            modified: rewritten != sql,
            sql: rewritten,
            notes: vec!["Simplified INNER JOIN to JOIN".to_string()],
        })
    }
}

pub struct CartesianJoinDetector;

impl OptimizationRule for CartesianJoinDetector {
    fn name(&self) -> &'static str {
        "Cartesian join detection"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let masked = mask_literals(sql);
        let joins = JOIN.find_iter(&masked).count();
        let conditions = JOIN_CONDITION.find_iter(&masked).count();
        let mut notes = Vec::new();
        if CROSS_JOIN.is_match(&masked) || (joins > conditions) {
            notes.push("Potential Cartesian product: a JOIN has no ON/USING condition".to_string());
        } else if COMMA_FROM.is_match(&masked) && !WHERE.is_match(&masked) {
            notes.push("Potential Cartesian product: comma-separated tables without a WHERE clause".to_string());
        }
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct SelectStarAdvisory;

impl OptimizationRule for SelectStarAdvisory {
    fn name(&self) -> &'static str {
        "SELECT * analysis"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let masked = mask_literals(sql);
        let outer_star = SELECT_STAR
            .find_iter(&masked)
            .any(|m| !is_inside_exists(&masked, m.start()));
        let notes = if outer_star {
            vec!["Consider specifying column names instead of SELECT *".to_string()]
        } else {
            Vec::new()
        };
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

fn is_inside_exists(masked: &str, select_pos: usize) -> bool {
    let before = masked[..select_pos].trim_end();
    let Some(before) = before.strip_suffix('(') else {
        return false;
    };
    before.trim_end().to_ascii_uppercase().ends_with("EXISTS")
}

pub struct LeadingWildcardAdvisory;

impl OptimizationRule for LeadingWildcardAdvisory {
    fn name(&self) -> &'static str {
        "Leading wildcard LIKE"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let notes = if LEADING_WILDCARD.is_match(sql) {
            vec!["Leading wildcard in LIKE prevents index usage; consider full-text search".to_string()]
        } else {
            Vec::new()
        };
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct LargeInListAdvisory {
    pub max_values: usize,
}

impl OptimizationRule for LargeInListAdvisory {
    fn name(&self) -> &'static str {
        "IN list size"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        // count commas on the raw text so literal values are counted too
        let notes = IN_LIST
            .captures_iter(sql)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|body| !body.trim_start().to_ascii_uppercase().starts_with("SELECT"))
            .map(|body| body.split(',').count())
            .filter(|n| *n > self.max_values)
            .map(|n| format!("IN clause with {} values; consider a temporary table or a JOIN", n))
            .collect();
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct NotInAdvisory;

impl OptimizationRule for NotInAdvisory {
    fn name(&self) -> &'static str {
        "NOT IN vs NOT EXISTS"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let notes = if NOT_IN.is_match(&mask_literals(sql)) {
            vec!["NOT IN with NULL values can cause unexpected results; consider NOT EXISTS".to_string()]
        } else {
            Vec::new()
        };
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct ExistsSelectOne;

impl OptimizationRule for ExistsSelectOne {
    fn name(&self) -> &'static str {
        "EXISTS (SELECT 1)"
    }

    fn weight(&self) -> u32 {
        8
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        if !EXISTS_SELECT_STAR.is_match(&mask_literals(sql)) {
            return Ok(RuleOutcome::unchanged(sql, Vec::new()));
        }
        require_closed_literals(self.name(), sql)?;
        let rewritten = rewrite_outside_literals(sql, |code| {
            EXISTS_SELECT_STAR.replace_all(code, "${1}SELECT 1").into_owned()
        });
        Ok(RuleOutcome {
            modified: rewritten != sql,
            sql: rewritten,
            notes: vec!["Replaced SELECT * with SELECT 1 in EXISTS clause".to_string()],
        })
    }
}

pub struct GroupByOrderAdvisory;

impl OptimizationRule for GroupByOrderAdvisory {
    fn name(&self) -> &'static str {
        "GROUP BY ordering"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let masked = mask_literals(sql);
        let notes = if GROUP_BY.is_match(&masked) && !ORDER_BY.is_match(&masked) {
            vec!["Consider adding ORDER BY for consistent results with GROUP BY".to_string()]
        } else {
            Vec::new()
        };
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct CountDistinctAdvisory;

impl OptimizationRule for CountDistinctAdvisory {
    fn name(&self) -> &'static str {
        "COUNT(DISTINCT) cost"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let notes = if COUNT_DISTINCT.is_match(&mask_literals(sql)) {
            vec!["COUNT(DISTINCT ...) can be expensive on large tables".to_string()]
        } else {
            Vec::new()
        };
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

pub struct OrderByFunctionAdvisory;

impl OptimizationRule for OrderByFunctionAdvisory {
    fn name(&self) -> &'static str {
        "ORDER BY functions"
    }

    fn apply(&self, sql: &str) -> Result<RuleOutcome> {
        let masked = mask_literals(sql);
        let notes = ORDER_BY_CLAUSE
            .captures(&masked)
            .and_then(|c| c.get(1))
            .filter(|clause| CALL.is_match(clause.as_str()))
            .map(|_| vec!["Functions in ORDER BY cannot use an index; consider a computed column".to_string()])
            .unwrap_or_default();
        Ok(RuleOutcome::unchanged(sql, notes))
    }
}

/// Result of one optimizer pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub original_query: String,
    pub optimized_query: String,
    /// Rules that rewrote the statement
    pub applied_rules: Vec<String>,
    pub improvement_estimate_percent: u32,
    pub advisory_notes: Vec<String>,
    /// Rules that failed and were skipped
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceAnalysis {
    pub performance_score: u32,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

pub struct SqlOptimizer {
    rules: Vec<Box<dyn OptimizationRule>>,
}

impl Default for SqlOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlOptimizer {
    /// Optimizer with the standard rule catalog.
    pub fn new() -> Self {
        Self::with_rules(vec![
            Box::new(SelectStarAdvisory),
            Box::new(JoinSimplification),
            Box::new(CartesianJoinDetector),
            Box::new(LeadingWildcardAdvisory),
            Box::new(LargeInListAdvisory { max_values: 10 }),
            Box::new(NotInAdvisory),
            Box::new(ExistsSelectOne),
            Box::new(GroupByOrderAdvisory),
            Box::new(CountDistinctAdvisory),
            Box::new(OrderByFunctionAdvisory),
        ])
    }

    pub fn with_rules(rules: Vec<Box<dyn OptimizationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn optimize(&self, sql: &str) -> OptimizationResult {
        let mut current = sql.to_string();
        let mut applied_rules = Vec::new();
        let mut advisory_notes = Vec::new();
        let mut warnings = Vec::new();
        let mut score = 0u32;

        for rule in &self.rules {
            match rule.apply(&current) {
                Ok(outcome) => {
                    if outcome.modified {
                        debug!("Rule '{}' rewrote the statement", rule.name());
                        current = outcome.sql;
                        applied_rules.push(rule.name().to_string());
                        score += rule.weight();
                    }
                    advisory_notes.extend(outcome.notes);
                }
                Err(e) => {
                    warn!("Optimization rule '{}' skipped: {}", rule.name(), e);
                    warnings.push(format!("Rule '{}' skipped: {}", rule.name(), e));
                }
            }
        }

        OptimizationResult {
            original_query: sql.to_string(),
            optimized_query: current,
            applied_rules,
            improvement_estimate_percent: score.min(MAX_IMPROVEMENT_PERCENT),
            advisory_notes,
            warnings,
        }
    }

    /// Performance score: 100 minus per-issue deductions, floored at 0.
    pub fn analyze(&self, sql: &str) -> PerformanceAnalysis {
        let masked = mask_literals(sql);
        let mut deduction: i64 = 0;
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut flag = |points: i64, issue: String, recommendation: &str| {
            deduction += points;
            issues.push(issue);
            recommendations.push(recommendation.to_string());
        };

        if SELECT_STAR.is_match(&masked) {
            flag(10, "SELECT * reduces performance".to_string(), "Specify only needed columns");
        }
        if WRITE_WORD.is_match(&masked) && !WHERE.is_match(&masked) {
            flag(
                30,
                "UPDATE/DELETE without WHERE is dangerous and slow".to_string(),
                "Add an appropriate WHERE clause",
            );
        }
        let joins = JOIN.find_iter(&masked).count() as i64;
        if joins > 0 && !JOIN_CONDITION.is_match(&masked) {
            flag(40, "Potential Cartesian product".to_string(), "Add proper JOIN conditions");
        }
        if LEADING_WILDCARD.is_match(sql) {
            flag(
                15,
                "Leading wildcard in LIKE prevents index usage".to_string(),
                "Avoid leading wildcards or use full-text search",
            );
        }
        if let Some(m) = WHERE.find(&masked) {
            if INDEX_BREAKING_CALL.is_match(&masked[m.end()..]) {
                flag(
                    12,
                    "Functions in WHERE clause prevent index usage".to_string(),
                    "Create computed columns or function-based indexes",
                );
            }
        }
        if NOT_IN.is_match(&masked) {
            flag(8, "NOT IN can cause issues with NULL values".to_string(), "Use NOT EXISTS instead");
        }
        if OR.find_iter(&masked).count() > 3 {
            flag(10, "Multiple OR conditions can be slow".to_string(), "Consider using UNION or IN clause");
        }
        let subqueries = (SELECT_WORD.find_iter(&masked).count() as i64 - 1).max(0);
        if subqueries > 2 {
            flag(
                subqueries * 5,
                format!("Multiple subqueries ({}) may impact performance", subqueries),
                "Consider converting subqueries to JOINs",
            );
        }
        if joins > 5 {
            flag(
                (joins - 5) * 3,
                format!("Many JOINs ({}) increase complexity", joins),
                "Consider breaking into smaller queries or using temp tables",
            );
        }

        PerformanceAnalysis {
            performance_score: (100 - deduction).max(0) as u32,
            issues,
            recommendations,
        }
    }

    /// Index candidates from WHERE, JOIN and ORDER BY column references.
    pub fn suggest_indexes(&self, sql: &str) -> Vec<String> {
        let masked = mask_literals(sql);
        let mut suggestions: Vec<String> = Vec::new();
        let mut push = |column: &str, purpose: &str| {
            let column = column.rsplit('.').next().unwrap_or(column);
            let suggestion = format!("Consider index on {} for {} optimization", column, purpose);
            if !suggestions.contains(&suggestion) {
                suggestions.push(suggestion);
            }
        };

        for c in WHERE_COLUMN.captures_iter(&masked) {
            if let Some(col) = c.get(1) {
                push(col.as_str(), "WHERE clause");
            }
        }
        for c in JOIN_COLUMNS.captures_iter(&masked) {
            for col in [c.get(1), c.get(2)].into_iter().flatten() {
                push(col.as_str(), "JOIN");
            }
        }
        if let Some(clause) = ORDER_BY_CLAUSE.captures(&masked).and_then(|c| c.get(1)) {
            for item in clause.as_str().split(',') {
                if let Some(col) = item.split_whitespace().next() {
                    if !col.contains('(') {
                        push(col, "ORDER BY");
                    }
                }
            }
        }
        suggestions
    }
}

/// Error for rules that cannot handle a statement.
pub fn rule_error(rule: &str, reason: impl std::fmt::Display) -> Nl2SqlError {
    Nl2SqlError::Optimization(format!("{}: {}", rule, reason))
}

/// Text rewrites need every literal closed to know where code ends.
fn require_closed_literals(rule: &str, sql: &str) -> Result<()> {
    if unescaped_quote_count(sql) % 2 != 0 {
        return Err(rule_error(rule, "unterminated string literal"));
    }
    Ok(())
}
