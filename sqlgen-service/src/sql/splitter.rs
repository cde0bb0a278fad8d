//! Statement splitting for generated SQL.
//!
//! The generation step may return several statements in one block of text,
//! wrapped in a markdown fence and decorated with comments. Everything here is
//! a pure string transformation; nothing touches the database.

use std::ops::Range;

/// Scanner state for quoted literals (`'...'` or `"..."`).
///
/// A quote preceded by a backslash never toggles the state.
#[derive(Debug, Default, Clone, Copy)]
struct LiteralState {
    quote: Option<char>,
}

impl LiteralState {
    fn advance(&mut self, ch: char, prev: Option<char>) {
        if (ch == '\'' || ch == '"') && prev != Some('\\') {
            match self.quote {
                None => self.quote = Some(ch),
                Some(open) if open == ch => self.quote = None,
                Some(_) => {}
            }
        }
    }

    fn in_literal(&self) -> bool {
        self.quote.is_some()
    }

    fn in_string(&self) -> bool {
        self.quote == Some('\'')
    }
}

/// Split raw SQL text into individual statements.
///
/// Semicolons inside string literals are statement content, not boundaries.
/// Statements that are empty or consist only of comments are dropped; the
/// retained statements keep their leading comments and are trimmed.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = LiteralState::default();
    let mut prev = None;

    for ch in sql.chars() {
        state.advance(ch, prev);
        prev = Some(ch);

        if ch == ';' && !state.in_literal() {
            push_statement(&mut statements, &current);
            current.clear();
        } else {
            current.push(ch);
        }
    }

    // Trailing statement without a terminating semicolon.
    push_statement(&mut statements, &current);

    statements
}

fn push_statement(statements: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if trimmed.is_empty() || strip_leading_comments(trimmed).is_empty() {
        return;
    }
    statements.push(trimmed.to_string());
}

/// Remove the leading run of `--` and `/* */` comments.
///
/// Comments after the first token are left alone. An unterminated block
/// comment swallows the rest of the input.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim();

    loop {
        if let Some(after) = rest.strip_prefix("--") {
            match after.find('\n') {
                Some(idx) => rest = after[idx + 1..].trim(),
                None => return "",
            }
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(idx) => rest = after[idx + 2..].trim(),
                None => return "",
            }
        } else {
            return rest;
        }
    }
}

/// Blank out the contents of single-quoted string literals, keeping the
/// quotes and the character count, so keyword heuristics never match inside
/// user data. Double-quoted identifiers stay visible.
pub fn mask_string_literals(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut state = LiteralState::default();
    let mut prev = None;

    for ch in sql.chars() {
        let was_inside = state.in_string();
        state.advance(ch, prev);
        prev = Some(ch);

        if was_inside && state.in_string() {
            masked.push(' ');
        } else {
            masked.push(ch);
        }
    }

    masked
}

/// Byte ranges of single-quoted literal contents, quotes excluded.
/// An unterminated literal runs to the end of the input.
pub fn string_literal_spans(sql: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut state = LiteralState::default();
    let mut prev = None;
    let mut open_at = None;

    for (idx, ch) in sql.char_indices() {
        let was_inside = state.in_string();
        state.advance(ch, prev);
        prev = Some(ch);

        match (was_inside, state.in_string()) {
            (false, true) => open_at = Some(idx + ch.len_utf8()),
            (true, false) => {
                if let Some(start) = open_at.take() {
                    spans.push(start..idx);
                }
            }
            _ => {}
        }
    }

    if let Some(start) = open_at {
        spans.push(start..sql.len());
    }
    spans
}

/// Like [`mask_string_literals`], and also blanks `--` and `/* */` comments.
///
/// Line breaks survive so line structure is kept. Use this before looking for
/// clause keywords such as `LIMIT` or `RETURNING`.
pub fn mask_literals_and_comments(sql: &str) -> String {
    let masked = mask_string_literals(sql);
    let chars: Vec<char> = masked.chars().collect();
    let mut out = String::with_capacity(masked.len());
    let mut in_identifier = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let next = chars.get(i + 1).copied();

        if ch == '"' {
            in_identifier = !in_identifier;
        }

        if !in_identifier && ch == '-' && next == Some('-') {
            while i < chars.len() && chars[i] != '\n' {
                out.push(' ');
                i += 1;
            }
            continue;
        }

        if !in_identifier && ch == '/' && next == Some('*') {
            out.push_str("  ");
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                out.push(if chars[i] == '\n' { '\n' } else { ' ' });
                i += 1;
            }
            if i < chars.len() {
                out.push_str("  ");
                i += 2;
            }
            continue;
        }

        out.push(ch);
        i += 1;
    }

    out
}

/// Pull the SQL body out of a model response.
///
/// Strips a surrounding markdown code fence (` ``` ` or ` ```sql `) when the
/// response starts with one.
pub fn extract_sql(response: &str) -> String {
    let text = response.trim();

    if !text.starts_with("```") {
        return text.to_string();
    }

    let mut lines: Vec<&str> = text.lines().skip(1).collect();
    if lines.last().is_some_and(|line| line.trim() == "```") {
        lines.pop();
    }

    lines.join("\n").trim().to_string()
}
