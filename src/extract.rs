//! SQL extraction from raw model output.
//!
//! Models wrap SQL in fences, preambles and trailing explanations. The
//! extractor keeps the statement lines only. When nothing usable remains it
//! returns [`SENTINEL_SQL`] instead of an error; callers compare against it
//! with [`is_sentinel`].

use crate::sql_text::{first_keyword, mask_literals, normalize_whitespace};
use lazy_static::lazy_static;
use regex::Regex;

/// Placeholder returned when no SQL could be extracted
pub const SENTINEL_SQL: &str = "SELECT 'No SQL could be extracted from the model output' AS error_message;";

/// Shorter results are treated as noise
pub const MIN_SQL_LEN: usize = 15;

const STATEMENT_KEYWORDS: &[&str] = &["SELECT", "WITH", "INSERT", "UPDATE", "DELETE"];

/// Statement starts that are captured only so the rejection can be reported
const DDL_KEYWORDS: &[&str] = &[
    "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE", "EXEC", "EXECUTE", "REPLACE",
    "RENAME", "SHUTDOWN",
];

/// Leading words of lines that continue a statement; such a line is never
/// read as commentary.
const SQL_LINE_WORDS: &[&str] = &[
    "SELECT", "WITH", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "CROSS", "FULL", "OUTER",
    "ON", "AND", "OR", "NOT", "IN", "EXISTS", "IS", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET",
    "UNION", "AS", "CASE", "WHEN", "THEN", "ELSE", "END", "DISTINCT", "INSERT", "INTO", "VALUES",
    "UPDATE", "SET", "DELETE",
];

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z]*").unwrap();
    static ref CLAUSE_WORD: Regex = Regex::new(r"(?i)\b(FROM|WHERE|JOIN)\b").unwrap();
    static ref EXPLANATION_START: Regex = Regex::new(
        r"(?i)^(this query|explanation|note:|the above query|here is|here's|this will|the result|this sql)"
    )
    .unwrap();
}

pub fn is_sentinel(sql: &str) -> bool {
    sql.trim() == SENTINEL_SQL
}

/// True when the statement begins with SELECT or WITH.
pub fn looks_like_select(sql: &str) -> bool {
    matches!(first_keyword(sql).as_str(), "SELECT" | "WITH")
}

fn is_explanation(line: &str) -> bool {
    let masked = mask_literals(line);
    let keyword = first_keyword(&masked);
    if keyword.is_empty() || SQL_LINE_WORDS.contains(&keyword.as_str()) {
        return false;
    }
    EXPLANATION_START.is_match(masked.trim_start())
}

fn starts_statement(line: &str) -> bool {
    STATEMENT_KEYWORDS.contains(&first_keyword(line).as_str())
}

fn starts_ddl(line: &str) -> bool {
    DDL_KEYWORDS.contains(&first_keyword(line).as_str())
}

/// Lines from the first statement start up to the first commentary line.
/// The flag is set when capture began on a bare clause line.
fn capture<'a>(lines: &[&'a str], ddl: bool) -> (Vec<&'a str>, bool) {
    let mut captured: Vec<&str> = Vec::new();
    let mut started_by_fallback = false;

    for &line in lines {
        if is_explanation(line) {
            if captured.is_empty() {
                continue;
            }
            break;
        }
        if !captured.is_empty() {
            captured.push(line);
        } else if ddl {
            if starts_ddl(line) {
                captured.push(line);
            }
        } else if starts_statement(line) {
            captured.push(line);
        } else if CLAUSE_WORD.is_match(line) {
            started_by_fallback = true;
            captured.push(line);
        }
    }
    (captured, started_by_fallback)
}

/// Isolate the statement text without the read-only gate. Returns `None`
/// when no statement-like line is present. Write statements come back
/// as-is so they can be reported on; DDL is only picked up when the text
/// holds no other statement.
pub fn extract_candidate(raw: &str) -> Option<String> {
    let unfenced = CODE_FENCE.replace_all(raw, "");
    let lines: Vec<&str> = unfenced.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let (mut captured, started_by_fallback) = capture(&lines, false);
    if captured.is_empty() {
        captured = capture(&lines, true).0;
    }
    if captured.is_empty() {
        return None;
    }

    let mut sql = normalize_whitespace(&captured.join(" "));
    if started_by_fallback && !starts_statement(&sql) && !starts_ddl(&sql) {
        // a column list that lost its SELECT
        sql = format!("SELECT {}", sql);
    }
    if !sql.ends_with(';') {
        sql.push(';');
    }
    Some(sql)
}

/// Extract a read-only statement, or the sentinel.
pub fn extract(raw: &str) -> String {
    match extract_candidate(raw) {
        Some(sql) if sql.len() >= MIN_SQL_LEN && looks_like_select(&sql) => sql,
        _ => SENTINEL_SQL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fences_and_trailing_explanation() {
        let raw = "Here is the query you asked for:\n```sql\nSELECT i.firstname\nFROM spt_identity i\nWHERE i.inactive = 0\n```\nThis query returns active identities.";
        assert_eq!(
            extract(raw),
            "SELECT i.firstname FROM spt_identity i WHERE i.inactive = 0;"
        );
    }

    #[test]
    fn test_clause_lines_containing_commentary_words_are_kept() {
        let raw = "SELECT name FROM spt_identity\nWHERE is_active = 1 AND manager IS NULL";
        assert_eq!(
            extract(raw),
            "SELECT name FROM spt_identity WHERE is_active = 1 AND manager IS NULL;"
        );

        let raw = "SELECT i.name FROM spt_identity i WHERE is_active = 1\nORDER BY i.name\nThis query lists active identities.";
        assert_eq!(
            extract(raw),
            "SELECT i.name FROM spt_identity i WHERE is_active = 1 ORDER BY i.name;"
        );
    }

    #[test]
    fn test_commentary_inside_literals_does_not_end_capture() {
        let raw = "SELECT a.name FROM spt_application a\nWHERE a.description = 'Note: this will sync nightly'";
        assert_eq!(
            extract(raw),
            "SELECT a.name FROM spt_application a WHERE a.description = 'Note: this will sync nightly';"
        );
    }

    #[test]
    fn test_prose_starting_with_ddl_word_is_skipped() {
        let raw = "Replace 'Workday' with the application you need.\nSELECT i.name FROM spt_identity i WHERE i.inactive = 0";
        assert_eq!(extract(raw), "SELECT i.name FROM spt_identity i WHERE i.inactive = 0;");
    }

    #[test]
    fn test_fallback_prepends_select() {
        let raw = "i.firstname, i.lastname FROM spt_identity i";
        assert_eq!(extract(raw), "SELECT i.firstname, i.lastname FROM spt_identity i;");
    }

    #[test]
    fn test_keeps_existing_semicolon() {
        assert_eq!(extract("SELECT id FROM spt_link;"), "SELECT id FROM spt_link;");
    }

    #[test]
    fn test_prose_and_short_text_yield_sentinel() {
        assert_eq!(extract("I cannot answer that about the weather."), SENTINEL_SQL);
        assert_eq!(extract(""), SENTINEL_SQL);
        assert_eq!(extract("SELECT 1"), SENTINEL_SQL);
        assert!(is_sentinel(&extract("```\n```")));
    }

    #[test]
    fn test_write_statements_are_rejected() {
        let raw = "DELETE FROM spt_identity WHERE id = '1';";
        assert_eq!(extract_candidate(raw).as_deref(), Some(raw));
        assert_eq!(extract(raw), SENTINEL_SQL);
        assert_eq!(
            extract_candidate("DROP TABLE spt_identity;").as_deref(),
            Some("DROP TABLE spt_identity;")
        );
        assert_eq!(extract("DROP TABLE spt_identity;"), SENTINEL_SQL);
    }

    #[test]
    fn test_output_always_looks_like_select() {
        for raw in [
            "UPDATE spt_identity SET inactive = 1",
            "WITH t AS (SELECT id FROM spt_identity) SELECT * FROM t",
            "sure!",
            "name FROM spt_application",
        ] {
            assert!(looks_like_select(&extract(raw)), "{}", raw);
        }
    }
}
