//! Plain-English description of a generated statement.
//!
//! Built from the statement text alone (top-level clauses, joins, filters),
//! so asking for an explanation never costs another completion call.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

lazy_static! {
    static ref CLAUSE: Regex =
        Regex::new(r"(?i)\b(select|from|where|group\s+by|having|order\s+by|limit)\b").unwrap();
    static ref JOIN_SPLIT: Regex =
        Regex::new(r"(?i)\b(?:(?:left|right|inner|cross|full)(?:\s+outer)?\s+)?join\b").unwrap();
    static ref ON_SPLIT: Regex = Regex::new(r"(?i)\s+on\s+").unwrap();
    static ref DISTINCT: Regex = Regex::new(r"(?i)^distinct\s+").unwrap();
}

/// Top-level clauses of a single SELECT
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryOutline {
    pub distinct: bool,
    pub columns: String,
    pub source: String,
    pub joins: Vec<JoinOutline>,
    pub filter: Option<String>,
    pub grouping: Option<String>,
    pub having: Option<String>,
    pub ordering: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinOutline {
    pub table: String,
    pub condition: Option<String>,
}

/// Positions of clause keywords outside parentheses and string literals
fn top_level_clauses(sql: &str) -> Vec<(String, usize, usize)> {
    let mut depth = 0i32;
    let mut in_literal: Option<char> = None;
    let mut depth_at = vec![0i32; sql.len() + 1];
    let mut literal_at = vec![false; sql.len() + 1];

    for (i, c) in sql.char_indices() {
        depth_at[i] = depth;
        literal_at[i] = in_literal.is_some();
        match in_literal {
            Some(q) if c == q => in_literal = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => in_literal = Some(c),
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            },
        }
    }

    CLAUSE
        .find_iter(sql)
        .filter(|m| depth_at[m.start()] == 0 && !literal_at[m.start()])
        .map(|m| {
            let keyword = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
            (keyword, m.start(), m.end())
        })
        .collect()
}

/// Split a statement into its top-level clauses. Returns `None` for
/// anything that is not a plain SELECT.
pub fn outline(sql: &str) -> Option<QueryOutline> {
    let sql = sql.trim().trim_end_matches(';').trim();
    let clauses = top_level_clauses(sql);
    let (first, _, _) = clauses.first()?;
    if first != "SELECT" {
        return None;
    }

    let body = |idx: usize| -> String {
        let start = clauses[idx].2;
        let end = clauses.get(idx + 1).map_or(sql.len(), |c| c.1);
        sql[start..end].trim().to_string()
    };

    let mut outline = QueryOutline::default();
    for (idx, (keyword, _, _)) in clauses.iter().enumerate() {
        let text = body(idx);
        match keyword.as_str() {
            "SELECT" if outline.columns.is_empty() => {
                outline.distinct = DISTINCT.is_match(&text);
                outline.columns = DISTINCT.replace(&text, "").into_owned();
            }
            "FROM" if outline.source.is_empty() => {
                let mut parts = JOIN_SPLIT.split(&text).map(str::trim);
                outline.source = parts.next().unwrap_or_default().to_string();
                outline.joins = parts
                    .filter(|p| !p.is_empty())
                    .map(|p| {
                        let mut pieces = ON_SPLIT.splitn(p, 2);
                        JoinOutline {
                            table: pieces.next().unwrap_or_default().trim().to_string(),
                            condition: pieces.next().map(|c| c.trim().to_string()),
                        }
                    })
                    .collect();
            }
            "WHERE" => outline.filter = Some(text),
            "GROUP BY" => outline.grouping = Some(text),
            "HAVING" => outline.having = Some(text),
            "ORDER BY" => outline.ordering = Some(text),
            "LIMIT" => outline.limit = Some(text),
            _ => {}
        }
    }
    Some(outline)
}

/// One-paragraph description of `sql`.
pub fn describe(sql: &str) -> String {
    let Some(o) = outline(sql) else {
        return "This statement is not a plain SELECT query and is not described.".to_string();
    };

    let mut text = format!(
        "Returns {}{}",
        if o.distinct { "distinct " } else { "" },
        o.columns
    );
    if !o.source.is_empty() {
        text.push_str(&format!(" from {}", o.source));
    }
    if !o.joins.is_empty() {
        let joins: Vec<String> = o
            .joins
            .iter()
            .map(|j| match &j.condition {
                Some(cond) => format!("{} on {}", j.table, cond),
                None => j.table.clone(),
            })
            .collect();
        text.push_str(&format!(", joined with {}", joins.join(" and ")));
    }
    if let Some(filter) = &o.filter {
        text.push_str(&format!(", keeping rows where {}", filter));
    }
    if let Some(grouping) = &o.grouping {
        text.push_str(&format!(", grouped by {}", grouping));
    }
    if let Some(having) = &o.having {
        text.push_str(&format!(" having {}", having));
    }
    if let Some(ordering) = &o.ordering {
        text.push_str(&format!(", ordered by {}", ordering));
    }
    if let Some(limit) = &o.limit {
        text.push_str(&format!(", limited to {} rows", limit));
    }
    text.push('.');
    text
}
