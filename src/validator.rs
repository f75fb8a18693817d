//! SQL Validator
//!
//! A checklist of independent passes (syntax, statement type, security,
//! structural/performance advice) folded into one [`ValidationReport`].
//! All checks are textual. Keyword scans run over a copy of the statement
//! with string literal contents masked out, so `WHERE note = 'drop'` is not
//! a DROP.

use crate::config::ValidationConfig;
use crate::sql_text::{first_keyword, mask_literals, normalize_whitespace, paren_balance, unescaped_quote_count};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Categorical danger estimate for a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(format!("unknown risk level '{}'", other)),
        }
    }
}

/// How strict the verdict is. `Basic` skips the advisory pass, `Strict`
/// turns high risk into an invalid verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Basic,
    #[default]
    Standard,
    Strict,
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ValidationMode::Basic),
            "standard" => Ok(ValidationMode::Standard),
            "strict" => Ok(ValidationMode::Strict),
            other => Err(format!("unknown validation mode '{}'", other)),
        }
    }
}

/// A verdict-affecting finding. Repair decides what it can patch from these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SqlDefect {
    Empty,
    UnbalancedParentheses { difference: i64 },
    UnmatchedQuote,
    UnknownStatementStart { found: String },
    StatementType { found: String },
    BlockedHighRisk,
}

impl SqlDefect {
    /// Whether a textual patch can address this defect.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            SqlDefect::UnbalancedParentheses { .. } | SqlDefect::UnmatchedQuote
        )
    }
}

impl fmt::Display for SqlDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDefect::Empty => write!(f, "Empty SQL query"),
            SqlDefect::UnbalancedParentheses { difference } => {
                write!(f, "Unmatched parentheses (difference: {})", difference)
            }
            SqlDefect::UnmatchedQuote => write!(f, "Unmatched single quotes"),
            SqlDefect::UnknownStatementStart { found } => {
                write!(f, "Query does not start with a recognized SQL statement ({})", found)
            }
            SqlDefect::StatementType { found } => write!(f, "Statement type not allowed: {}", found),
            SqlDefect::BlockedHighRisk => write!(f, "High-risk query blocked by strict validation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub security_issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub risk_level: RiskLevel,
    pub sanitized_query: String,
    #[serde(skip)]
    pub defects: Vec<SqlDefect>,
}

impl ValidationReport {
    /// True when every defect can be patched textually.
    pub fn is_repairable(&self) -> bool {
        !self.defects.is_empty() && self.defects.iter().all(SqlDefect::is_repairable)
    }

    fn defect(&mut self, defect: SqlDefect) {
        self.errors.push(defect.to_string());
        self.defects.push(defect);
    }

    fn raise(&mut self, level: RiskLevel) {
        self.risk_level = self.risk_level.max(level);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplexityReport {
    pub score: u32,
    pub level: ComplexityLevel,
    pub factors: BTreeMap<String, u32>,
}

/// Qualified column references checked against a known column set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnCheck {
    pub referenced: BTreeSet<String>,
    pub missing: BTreeSet<String>,
}

impl ColumnCheck {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

const ALLOWED_STATEMENTS: &[&str] = &["SELECT", "WITH"];
const RECOGNIZED_STARTS: &[&str] = &["SELECT", "WITH", "INSERT", "UPDATE", "DELETE"];

const HIGH_RISK_KEYWORDS: &[&str] = &["DROP", "DELETE", "TRUNCATE", "ALTER", "SHUTDOWN"];
const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "CREATE",
    "INSERT",
    "UPDATE",
    "EXEC",
    "EXECUTE",
    "GRANT",
    "REVOKE",
    "OPENROWSET",
    "OPENDATASOURCE",
    "BACKUP",
    "RESTORE",
    "RECONFIGURE",
];

const WHERE_FUNCTIONS: &[&str] = &["UPPER", "LOWER", "SUBSTRING", "CONVERT", "CAST", "DATE", "YEAR", "TRIM"];

lazy_static! {
    static ref KEYWORD_PATTERNS: Vec<(&'static str, Regex, RiskLevel)> = HIGH_RISK_KEYWORDS
        .iter()
        .map(|k| (*k, RiskLevel::High))
        .chain(MEDIUM_RISK_KEYWORDS.iter().map(|k| (*k, RiskLevel::Medium)))
        .map(|(k, level)| (k, Regex::new(&format!(r"(?i)\b{}\b", k)).unwrap(), level))
        .collect();
    static ref PROCEDURE_CALL: Regex = Regex::new(r"(?i)\b(sp|xp)_\w+").unwrap();
    static ref SYSTEM_CATALOG: Regex = Regex::new(
        r"(?i)\b(information_schema|mysql|performance_schema|sys|master|msdb|tempdb)\s*\."
    )
    .unwrap();
    static ref COMMENT_TERMINATED: Regex = Regex::new(r";\s*(--|#|/\*)").unwrap();
    static ref UNION_SELECT: Regex = Regex::new(r"(?i)\bunion\s+(all\s+)?select\b").unwrap();
    static ref QUOTED_TAUTOLOGY: Regex = Regex::new(r"(?i)'\s*or\s+'[^']*'\s*=\s*'").unwrap();
    static ref NUMERIC_TAUTOLOGY: Regex = Regex::new(r"(?i)\bor\s+(\d+)\s*=\s*(\d+)\b").unwrap();
    static ref CHAR_CALL: Regex = Regex::new(r"(?i)\bchar\s*\(").unwrap();
    static ref CAST_CALL: Regex = Regex::new(r"(?i)\bcast\s*\(").unwrap();
    static ref WHERE_FUNCTION_PATTERNS: Vec<(&'static str, Regex)> = WHERE_FUNCTIONS
        .iter()
        .map(|f| (*f, Regex::new(&format!(r"(?i)\b{}\s*\(", f)).unwrap()))
        .collect();
    static ref WHERE_WORD: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();
    static ref WRITE_WORD: Regex = Regex::new(r"(?i)\b(update|delete)\b").unwrap();
    static ref SELECT_STAR: Regex = Regex::new(r"(?i)\bselect\s+(distinct\s+)?\*").unwrap();
    static ref GROUP_BY: Regex = Regex::new(r"(?i)\bgroup\s+by\b").unwrap();
    static ref ORDER_BY: Regex = Regex::new(r"(?i)\border\s+by\b").unwrap();
    static ref LIMIT: Regex = Regex::new(r"(?i)\blimit\b").unwrap();
    static ref JOIN: Regex = Regex::new(r"(?i)\bjoin\b").unwrap();
    static ref LEADING_WILDCARD: Regex = Regex::new(r"(?i)\blike\s+'%").unwrap();
    static ref NOT_IN: Regex = Regex::new(r"(?i)\bnot\s+in\b").unwrap();
    static ref OR_WORD: Regex = Regex::new(r"(?i)\bor\b").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"(?m)--.*$").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"(?s)/\*.*?\*/").unwrap();
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref UNION_WORD: Regex = Regex::new(r"(?i)\bunion\b").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"(?i)\b(count|sum|avg|max|min)\s*\(").unwrap();
    static ref CONDITION: Regex = Regex::new(r"(?i)\b(where|having)\b").unwrap();
    static ref CASE_WORD: Regex = Regex::new(r"(?i)\bcase\b").unwrap();
    static ref WINDOW: Regex = Regex::new(r"(?i)\bover\s*\(").unwrap();
    static ref QUALIFIED_NAME: Regex = Regex::new(r"\b[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)+").unwrap();
}

/// Words after which a dotted name is a table, not a column
const TABLE_POSITION_WORDS: &[&str] = &["FROM", "JOIN", "INTO", "UPDATE", "TABLE"];

#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    config: ValidationConfig,
}

impl SqlValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> ValidationMode {
        self.config.mode
    }

    /// Run every pass and fold the results into one verdict.
    pub fn validate(&self, sql: &str) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            security_issues: Vec::new(),
            suggestions: Vec::new(),
            risk_level: RiskLevel::Low,
            sanitized_query: sanitize(sql),
            defects: Vec::new(),
        };
        let masked = mask_literals(sql);

        let syntax_ok = self.check_syntax(sql, &mut report);
        let statement_ok = self.check_statement_type(sql, &mut report);
        self.check_security(sql, &masked, &mut report);
        if self.config.mode != ValidationMode::Basic {
            self.check_structure(sql, &masked, &mut report);
        }

        let blocked = report.risk_level == RiskLevel::High && self.config.mode == ValidationMode::Strict;
        if blocked {
            report.defect(SqlDefect::BlockedHighRisk);
        }
        report.valid = syntax_ok && statement_ok && !blocked;

        debug!(
            "Validated SQL: valid={} risk={} errors={} warnings={}",
            report.valid,
            report.risk_level,
            report.errors.len(),
            report.warnings.len()
        );
        report
    }

    fn check_syntax(&self, sql: &str, report: &mut ValidationReport) -> bool {
        if sql.trim().is_empty() {
            report.defect(SqlDefect::Empty);
            return false;
        }
        let before = report.defects.len();

        let balance = paren_balance(sql);
        if balance != 0 {
            report.defect(SqlDefect::UnbalancedParentheses { difference: balance });
        }
        if unescaped_quote_count(sql) % 2 != 0 {
            report.defect(SqlDefect::UnmatchedQuote);
        }
        let keyword = first_keyword(sql);
        if !RECOGNIZED_STARTS.contains(&keyword.as_str()) {
            report.defect(SqlDefect::UnknownStatementStart { found: keyword });
        }

        report.defects.len() == before
    }

    fn check_statement_type(&self, sql: &str, report: &mut ValidationReport) -> bool {
        let keyword = first_keyword(sql);
        if ALLOWED_STATEMENTS.contains(&keyword.as_str()) {
            return true;
        }
        let found = if keyword.is_empty() {
            "unknown".to_string()
        } else {
            keyword
        };
        report.defect(SqlDefect::StatementType { found });
        false
    }

    fn check_security(&self, sql: &str, masked: &str, report: &mut ValidationReport) {
        for (keyword, pattern, level) in KEYWORD_PATTERNS.iter() {
            if pattern.is_match(masked) {
                let label = if *level == RiskLevel::High {
                    "Dangerous keyword detected"
                } else {
                    "Potentially dangerous keyword"
                };
                report.security_issues.push(format!("{}: {}", label, keyword));
                report.raise(*level);
            }
        }

        if let Some(m) = PROCEDURE_CALL.find(masked) {
            report
                .security_issues
                .push(format!("Stored procedure call: {}", m.as_str()));
            report.raise(RiskLevel::Medium);
        }

        if let Some(m) = SYSTEM_CATALOG.find(masked) {
            report
                .security_issues
                .push(format!("Access to system object: {}", m.as_str()));
            report.raise(RiskLevel::High);
        }

        let injection_checks: [(&Regex, &str, &str, RiskLevel); 5] = [
            (&*COMMENT_TERMINATED, masked, "comment-terminated statement", RiskLevel::High),
            (&*UNION_SELECT, masked, "UNION SELECT probing", RiskLevel::High),
            (&*QUOTED_TAUTOLOGY, sql, "quoted tautology", RiskLevel::High),
            (&*CHAR_CALL, masked, "CHAR() obfuscation", RiskLevel::High),
            (&*CAST_CALL, masked, "inline CAST", RiskLevel::Medium),
        ];
        for (pattern, text, label, level) in injection_checks {
            if pattern.is_match(text) {
                report
                    .security_issues
                    .push(format!("Potential SQL injection pattern detected: {}", label));
                report.raise(level);
            }
        }

        if NUMERIC_TAUTOLOGY
            .captures_iter(masked)
            .any(|c| c.get(1).map(|m| m.as_str()) == c.get(2).map(|m| m.as_str()))
        {
            report
                .security_issues
                .push("Potential SQL injection pattern detected: numeric tautology".to_string());
            report.raise(RiskLevel::High);
        }

        if has_stacked_statements(masked) {
            report
                .security_issues
                .push("Multiple statements in one query".to_string());
            report.raise(RiskLevel::High);
        }

        if WRITE_WORD.is_match(masked) && !WHERE_WORD.is_match(masked) {
            report
                .security_issues
                .push("UPDATE/DELETE without WHERE clause is dangerous".to_string());
            report.raise(RiskLevel::High);
        }

        if masked.matches('*').count() > 3 {
            report
                .warnings
                .push("Excessive use of wildcards (*) may impact performance".to_string());
        }
    }

    fn check_structure(&self, sql: &str, masked: &str, report: &mut ValidationReport) {
        if SELECT_STAR.is_match(masked) {
            report
                .warnings
                .push("SELECT * can impact performance, specify needed columns".to_string());
            report
                .suggestions
                .push("Consider specifying column names instead of using SELECT *".to_string());
        }

        let has_order_by = ORDER_BY.is_match(masked);
        if GROUP_BY.is_match(masked) && !has_order_by {
            report
                .suggestions
                .push("Consider adding ORDER BY for consistent results with GROUP BY".to_string());
        }
        if has_order_by && !LIMIT.is_match(masked) {
            report
                .suggestions
                .push("Consider adding a LIMIT clause with ORDER BY".to_string());
        }

        let joins = JOIN.find_iter(masked).count();
        if joins > self.config.max_joins {
            report.warnings.push(format!(
                "Query has {} joins (limit {}), consider breaking it into smaller queries",
                joins, self.config.max_joins
            ));
        }

        if LEADING_WILDCARD.is_match(sql) {
            report
                .warnings
                .push("Leading wildcard in LIKE clause prevents index usage".to_string());
        }

        if let Some(pos) = WHERE_WORD.find(masked).map(|m| m.end()) {
            let clause = &masked[pos..];
            for (func, pattern) in WHERE_FUNCTION_PATTERNS.iter() {
                if pattern.is_match(clause) {
                    report.warnings.push(format!(
                        "Function {}() in WHERE clause may prevent index usage",
                        func
                    ));
                }
            }
        }

        if NOT_IN.is_match(masked) {
            report.suggestions.push(
                "NOT IN with NULL values can cause unexpected results, consider NOT EXISTS".to_string(),
            );
        }

        if OR_WORD.find_iter(masked).count() > 3 {
            report
                .suggestions
                .push("Multiple OR conditions may benefit from UNION or IN clause".to_string());
        }
    }

    /// Collect `alias.column` references and report those whose column is
    /// not in `available`. Names compare case-insensitively; `available`
    /// is expected lowercased. Table names after FROM/JOIN are skipped.
    pub fn check_column_references(&self, sql: &str, available: &HashSet<String>) -> ColumnCheck {
        let masked = mask_literals(sql).replace('`', "");
        let mut check = ColumnCheck::default();

        for m in QUALIFIED_NAME.find_iter(&masked) {
            let before = masked[..m.start()].trim_end();
            let previous = before
                .rsplit(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();
            if TABLE_POSITION_WORDS.contains(&previous.as_str()) {
                continue;
            }

            let Some(column) = m.as_str().rsplit('.').next() else {
                continue;
            };
            let column = column.to_ascii_lowercase();
            if !available.contains(&column) {
                check.missing.insert(column.clone());
            }
            check.referenced.insert(column);
        }

        debug!(
            "Column check: {} referenced, {} missing",
            check.referenced.len(),
            check.missing.len()
        );
        check
    }

    /// Weighted complexity score.
    pub fn complexity(&self, sql: &str) -> ComplexityReport {
        let masked = mask_literals(sql);
        let count = |re: &Regex| re.find_iter(&masked).count() as u32;

        let factors: [(&str, u32, u32); 7] = [
            ("joins", count(&*JOIN), 2),
            ("subqueries", count(&*SELECT_WORD).saturating_sub(1), 3),
            ("unions", count(&*UNION_WORD), 2),
            ("aggregations", count(&*AGGREGATE), 1),
            ("conditions", count(&*CONDITION), 1),
            ("case_statements", count(&*CASE_WORD), 2),
            ("window_functions", count(&*WINDOW), 3),
        ];

        let score = factors.iter().map(|(_, n, w)| n * w).sum();
        let level = match score {
            0..=5 => ComplexityLevel::Simple,
            6..=15 => ComplexityLevel::Moderate,
            16..=30 => ComplexityLevel::Complex,
            _ => ComplexityLevel::VeryComplex,
        };

        ComplexityReport {
            score,
            level,
            factors: factors
                .iter()
                .map(|(name, n, _)| (name.to_string(), *n))
                .collect(),
        }
    }
}

/// Anything but whitespace after a non-final `;`
fn has_stacked_statements(masked: &str) -> bool {
    let body = masked.trim().trim_end_matches(';');
    match body.find(';') {
        Some(pos) => !body[pos + 1..].trim().is_empty(),
        None => false,
    }
}

/// Strip comments, collapse whitespace, guarantee a trailing semicolon.
pub fn sanitize(sql: &str) -> String {
    let without_line = LINE_COMMENT.replace_all(sql, "");
    let without_block = BLOCK_COMMENT.replace_all(&without_line, "");
    let mut sanitized = normalize_whitespace(&without_block);
    if !sanitized.is_empty() && !sanitized.ends_with(';') {
        sanitized.push(';');
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::default()
    }

    #[test]
    fn test_simple_select_is_valid_and_low_risk() {
        let report = validator().validate("SELECT i.firstname, i.lastname FROM spt_identity i WHERE i.inactive = 0");
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(report.security_issues.is_empty());
        assert_eq!(
            report.sanitized_query,
            "SELECT i.firstname, i.lastname FROM spt_identity i WHERE i.inactive = 0;"
        );
    }

    #[test]
    fn test_drop_is_invalid_and_high_risk() {
        let report = validator().validate("DROP TABLE spt_identity;");
        assert!(!report.valid);
        assert_eq!(report.risk_level, RiskLevel::High);
        assert!(report
            .defects
            .contains(&SqlDefect::StatementType { found: "DROP".to_string() }));
        assert!(!report.is_repairable());
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let report = validator().validate("SELECT id FROM spt_identity WHERE display_name = 'Drop Delete'");
        assert_eq!(report.risk_level, RiskLevel::Low);
        // identifiers merely containing a keyword are fine too
        let report = validator().validate("SELECT created, update_count FROM spt_application");
        assert_eq!(report.risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_injection_signatures() {
        let cases = [
            "SELECT * FROM spt_identity WHERE name = '' OR '1'='1'",
            "SELECT * FROM spt_identity WHERE id = 1 OR 1 = 1",
            "SELECT name FROM spt_identity UNION SELECT table_name FROM information_schema.tables",
            "SELECT name FROM spt_identity; -- trailing",
            "SELECT name FROM spt_identity; DROP TABLE spt_link",
            "SELECT CHAR(65) FROM spt_identity",
        ];
        for sql in cases {
            assert_eq!(validator().validate(sql).risk_level, RiskLevel::High, "{}", sql);
        }
        assert_eq!(
            validator().validate("SELECT CAST(id AS CHAR) FROM spt_identity").risk_level,
            RiskLevel::Medium
        );
    }

    #[test]
    fn test_update_without_where_is_high() {
        let report = validator().validate("UPDATE spt_identity SET inactive = 1");
        assert_eq!(report.risk_level, RiskLevel::High);
        assert!(!report.valid);
    }

    #[test]
    fn test_with_query_is_allowed() {
        let report = validator().validate(
            "WITH active AS (SELECT id FROM spt_identity WHERE inactive = 0) SELECT COUNT(*) FROM active",
        );
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_unbalanced_parenthesis_is_repairable() {
        let report = validator().validate("SELECT COUNT(id FROM spt_link;");
        assert!(!report.valid);
        assert!(report
            .defects
            .contains(&SqlDefect::UnbalancedParentheses { difference: 1 }));
        assert!(report.is_repairable());
    }

    #[test]
    fn test_strict_mode_blocks_high_risk() {
        let sql = "SELECT name FROM spt_identity UNION SELECT name FROM spt_application";
        assert!(validator().validate(sql).valid);

        let strict = SqlValidator::new(ValidationConfig {
            mode: ValidationMode::Strict,
            ..Default::default()
        });
        let report = strict.validate(sql);
        assert!(!report.valid);
        assert!(report.defects.contains(&SqlDefect::BlockedHighRisk));
    }

    #[test]
    fn test_advisories_never_invalidate() {
        let report = validator().validate(
            "SELECT * FROM spt_identity i WHERE UPPER(i.name) LIKE '%smith' AND i.id NOT IN (SELECT identity_id FROM spt_link) GROUP BY i.name",
        );
        assert!(report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("Leading wildcard")));
        assert!(report.warnings.iter().any(|w| w.contains("UPPER()")));
        assert!(report.suggestions.iter().any(|s| s.contains("NOT EXISTS")));
        assert!(report.suggestions.iter().any(|s| s.contains("GROUP BY")));

        let basic = SqlValidator::new(ValidationConfig {
            mode: ValidationMode::Basic,
            ..Default::default()
        });
        assert!(basic.validate("SELECT * FROM spt_link").suggestions.is_empty());
    }

    #[test]
    fn test_sanitize_strips_comments() {
        assert_eq!(
            sanitize("SELECT id -- the key\nFROM   spt_link /* all */"),
            "SELECT id FROM spt_link;"
        );
    }

    fn identity_columns() -> HashSet<String> {
        ["id", "name", "firstname", "lastname", "email", "inactive", "manager", "identity_id", "application"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn test_column_references_report_unknown_columns() {
        let sql = "SELECT i.firstname, i.department, l.application FROM spt_identity i \
                   JOIN spt_link l ON i.id = l.identity_id WHERE i.Is_Active = 1";
        let check = validator().check_column_references(sql, &identity_columns());
        assert!(!check.is_complete());
        assert_eq!(
            check.missing.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["department", "is_active"]
        );
        assert!(check.referenced.contains("firstname"));
        assert!(check.referenced.contains("identity_id"));
    }

    #[test]
    fn test_column_references_skip_tables_and_literals() {
        let sql = "SELECT `i`.`email` FROM identityiq.spt_identity i \
                   WHERE i.name = 'first.last' AND i.inactive = 0";
        let check = validator().check_column_references(sql, &identity_columns());
        assert!(check.is_complete(), "{:?}", check.missing);
        assert_eq!(
            check.referenced.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["email", "inactive", "name"]
        );
    }

    #[test]
    fn test_complexity_levels() {
        let v = validator();
        assert_eq!(v.complexity("SELECT id FROM spt_identity").level, ComplexityLevel::Simple);

        let report = v.complexity(
            "SELECT a.name, COUNT(l.id) FROM spt_application a JOIN spt_link l ON l.application = a.id \
             JOIN spt_identity i ON i.id = l.identity_id WHERE i.id IN (SELECT id FROM spt_identity) GROUP BY a.name",
        );
        assert_eq!(report.factors["joins"], 2);
        assert_eq!(report.factors["subqueries"], 1);
        assert_eq!(report.score, 4 + 3 + 1 + 1);
        assert_eq!(report.level, ComplexityLevel::Moderate);
    }

    #[test]
    fn test_risk_level_parsing_and_order() {
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!(RiskLevel::Low < RiskLevel::Medium && RiskLevel::Medium < RiskLevel::High);
        assert!("severe".parse::<RiskLevel>().is_err());
    }
}
