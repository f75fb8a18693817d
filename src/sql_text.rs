//! Small textual helpers shared by the extractor, validator, repair and
//! optimizer. None of this parses SQL; it only scans characters.

/// Replace the contents of quoted string literals (single or double quoted)
/// with nothing, keeping the quote characters. Keyword scans run over the
/// masked text so words inside literals never count. An unterminated
/// literal is masked to the end of the text.
pub fn mask_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut open: Option<char> = None;

    while let Some(c) = chars.next() {
        match open {
            None => {
                if c == '\'' || c == '"' {
                    open = Some(c);
                }
                out.push(c);
            }
            Some(q) => {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    // doubled quote is an escaped quote inside the literal
                    if chars.peek() == Some(&q) {
                        chars.next();
                    } else {
                        open = None;
                        out.push(c);
                    }
                }
            }
        }
    }
    out
}

/// Apply `rewrite` to the parts of `sql` outside string literals. Literal
/// text, quotes included, is copied through untouched.
pub fn rewrite_outside_literals<F>(sql: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(sql.len());
    let mut code_start = 0;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '\'' && c != '"' {
            continue;
        }
        out.push_str(&rewrite(&sql[code_start..i]));
        let mut end = sql.len();
        while let Some((j, d)) = chars.next() {
            if d == '\\' {
                chars.next();
            } else if d == c {
                if chars.peek().map(|(_, n)| *n) == Some(c) {
                    chars.next();
                } else {
                    end = j + d.len_utf8();
                    break;
                }
            }
        }
        out.push_str(&sql[i..end]);
        code_start = end;
    }
    if code_start < sql.len() {
        out.push_str(&rewrite(&sql[code_start..]));
    }
    out
}

/// Number of single quotes not preceded by a backslash
pub fn unescaped_quote_count(sql: &str) -> usize {
    let mut count = 0;
    let mut prev = '\0';
    for c in sql.chars() {
        if c == '\'' && prev != '\\' {
            count += 1;
        }
        prev = if prev == '\\' && c == '\\' { '\0' } else { c };
    }
    count
}

/// `(` count minus `)` count, outside string literals.
pub fn paren_balance(sql: &str) -> i64 {
    mask_literals(sql).chars().fold(0i64, |acc, c| match c {
        '(' => acc + 1,
        ')' => acc - 1,
        _ => acc,
    })
}

/// Leading keyword of the statement, uppercased. Empty when the text does
/// not begin with a letter.
pub fn first_keyword(sql: &str) -> String {
    sql.trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn normalize_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
