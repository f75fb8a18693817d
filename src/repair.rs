//! Textual repair of shallow syntax defects.
//!
//! Patches only what a validator defect points at: a missing closing quote
//! and unbalanced parentheses. A trailing semicolon is always ensured. The
//! result is not guaranteed to be correct SQL; it only gives re-validation
//! a second chance. Repair is idempotent.

use crate::sql_text::{paren_balance, unescaped_quote_count};
use crate::validator::SqlDefect;

/// Apply the patches for `defects`. Statements with a defect that cannot be
/// patched (wrong statement type, empty text, strict-mode block) come back
/// unchanged.
pub fn repair(sql: &str, defects: &[SqlDefect]) -> String {
    if defects.iter().any(|d| !d.is_repairable()) {
        return sql.to_string();
    }

    let mut body = sql.trim().trim_end_matches(';').trim_end().to_string();

    if unescaped_quote_count(&body) % 2 != 0 {
        body.push('\'');
    }

    let balance = paren_balance(&body);
    if balance > 0 {
        body.push_str(&")".repeat(balance as usize));
    } else if balance < 0 {
        body = format!("{}{}", "(".repeat(balance.unsigned_abs() as usize), body);
    }

    if body.is_empty() {
        return body;
    }
    body.push(';');
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parens(difference: i64) -> Vec<SqlDefect> {
        vec![SqlDefect::UnbalancedParentheses { difference }]
    }

    #[test]
    fn test_appends_missing_parenthesis_before_semicolon() {
        let sql = "SELECT COUNT(*) FROM spt_identity i WHERE i.id IN (SELECT l.identity_id FROM spt_link l;";
        assert_eq!(
            repair(sql, &parens(1)),
            "SELECT COUNT(*) FROM spt_identity i WHERE i.id IN (SELECT l.identity_id FROM spt_link l);"
        );
    }

    #[test]
    fn test_closes_open_quote_then_balances() {
        let sql = "SELECT id FROM spt_application WHERE name IN ('Workday";
        let defects = vec![
            SqlDefect::UnbalancedParentheses { difference: 1 },
            SqlDefect::UnmatchedQuote,
        ];
        assert_eq!(
            repair(sql, &defects),
            "SELECT id FROM spt_application WHERE name IN ('Workday');"
        );
    }

    #[test]
    fn test_surplus_closing_parenthesis_is_prepended() {
        assert_eq!(repair("SELECT 1)", &parens(-1)), "(SELECT 1);");
    }

    #[test]
    fn test_repair_is_idempotent() {
        let inputs = [
            "SELECT COUNT(id FROM spt_link",
            "SELECT id FROM spt_identity WHERE name = 'x",
            "SELECT 1)",
            "SELECT id FROM spt_link;",
        ];
        for sql in inputs {
            let once = repair(sql, &parens(1));
            assert_eq!(repair(&once, &parens(1)), once, "{}", sql);
        }
    }

    #[test]
    fn test_statement_type_is_never_repaired() {
        let sql = "DROP TABLE spt_identity";
        let defects = vec![SqlDefect::StatementType {
            found: "DROP".to_string(),
        }];
        assert_eq!(repair(sql, &defects), sql);
    }
}
