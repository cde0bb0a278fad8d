//! Row caps for read statements.

use crate::sql::splitter::mask_literals_and_comments;
use once_cell::sync::Lazy;
use regex::Regex;

static LIMIT_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\blimit\b").expect("valid LIMIT regex"));

static RETURNING_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\breturning\b").expect("valid RETURNING regex"));

/// Whether the statement already carries a `LIMIT`, in any letter case.
/// String literals and comments are ignored.
pub fn has_limit_clause(sql: &str) -> bool {
    LIMIT_CLAUSE.is_match(&mask_literals_and_comments(sql))
}

/// Whether a write statement hands rows back through `RETURNING`.
pub fn has_returning_clause(sql: &str) -> bool {
    RETURNING_CLAUSE.is_match(&mask_literals_and_comments(sql))
}

/// Append `LIMIT max_rows` unless one is already present.
///
/// Any trailing terminator is removed first. The clause goes on its own line
/// so a trailing `--` comment cannot swallow it. Applying this twice is a no-op
/// the second time.
pub fn apply_row_limit(sql: &str, max_rows: u32) -> String {
    if has_limit_clause(sql) {
        return sql.to_string();
    }

    let body = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{}\nLIMIT {}", body, max_rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_limit() {
        assert_eq!(
            apply_row_limit("SELECT * FROM employees;", 100),
            "SELECT * FROM employees\nLIMIT 100"
        );
    }

    #[test]
    fn test_existing_limit_is_kept() {
        let sql = "SELECT * FROM employees limit 5";
        assert_eq!(apply_row_limit(sql, 100), sql);
    }

    #[test]
    fn test_applying_twice_adds_one_clause() {
        let once = apply_row_limit("SELECT 1", 10);
        let twice = apply_row_limit(&once, 10);
        assert_eq!(once, twice);
        assert_eq!(twice.to_ascii_uppercase().matches("LIMIT").count(), 1);
    }

    #[test]
    fn test_column_names_containing_limit_do_not_count() {
        let limited = apply_row_limit("SELECT credit_limit FROM accounts", 50);
        assert!(limited.ends_with("LIMIT 50"));
    }

    #[test]
    fn test_trailing_comment_does_not_hide_limit() {
        let limited = apply_row_limit("SELECT 1 -- everything", 5);
        assert_eq!(limited, "SELECT 1 -- everything\nLIMIT 5");
    }

    #[test]
    fn test_limit_inside_a_literal_is_not_a_clause() {
        let limited = apply_row_limit("SELECT * FROM tr_leaves WHERE reason = 'over the limit'", 100);
        assert!(limited.ends_with("\nLIMIT 100"));
    }

    #[test]
    fn test_limit_inside_a_comment_is_not_a_clause() {
        let limited = apply_row_limit("SELECT * FROM tr_leaves -- no limit here", 100);
        assert_eq!(limited, "SELECT * FROM tr_leaves -- no limit here\nLIMIT 100");

        let limited = apply_row_limit("SELECT /* limit 5 */ id FROM tr_leaves", 100);
        assert!(limited.ends_with("\nLIMIT 100"));
    }

    #[test]
    fn test_returning_inside_a_literal_is_not_a_clause() {
        assert!(!has_returning_clause("UPDATE t SET note = 'returning soon' WHERE id = 1"));
    }

    #[test]
    fn test_returning_detection() {
        assert!(has_returning_clause("INSERT INTO t VALUES (1) returning id"));
        assert!(!has_returning_clause("UPDATE t SET a = 1"));
    }
}
