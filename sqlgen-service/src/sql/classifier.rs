//! Operation classification by leading keyword.

use super::splitter::strip_leading_comments;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a statement does, judged by its first keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "SELECT")]
    Read,
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "DROP")]
    Drop,
    #[serde(rename = "ALTER")]
    Alter,
    #[serde(rename = "TRUNCATE")]
    Truncate,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Operation {
    /// Keyword form, as used in the allow-list configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Drop => "DROP",
            Self::Alter => "ALTER",
            Self::Truncate => "TRUNCATE",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read)
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Schema-destroying operations that are rejected unless explicitly allowed.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Drop | Self::Alter | Self::Truncate)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SELECT" | "READ" => Ok(Self::Read),
            "INSERT" => Ok(Self::Insert),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "DROP" => Ok(Self::Drop),
            "ALTER" => Ok(Self::Alter),
            "TRUNCATE" => Ok(Self::Truncate),
            other => Err(format!("unknown SQL operation '{}'", other)),
        }
    }
}

/// Classify a single statement.
///
/// `WITH` counts as a read: its terminal statement is assumed to be a query.
/// Data-modifying CTEs are caught later by the security validator.
pub fn classify(statement: &str) -> Operation {
    let body = strip_leading_comments(statement);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => Operation::Read,
        "INSERT" => Operation::Insert,
        "UPDATE" => Operation::Update,
        "DELETE" => Operation::Delete,
        "DROP" => Operation::Drop,
        "ALTER" => Operation::Alter,
        "TRUNCATE" => Operation::Truncate,
        _ => Operation::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reads() {
        assert_eq!(classify("  -- note\nSELECT 1"), Operation::Read);
        assert_eq!(
            classify("WITH c AS (SELECT 1) SELECT * FROM c"),
            Operation::Read
        );
        assert_eq!(classify("select * from employees"), Operation::Read);
    }

    #[test]
    fn test_classify_writes_and_destructive() {
        assert_eq!(classify("DELETE FROM t"), Operation::Delete);
        assert_eq!(classify("DROP TABLE t"), Operation::Drop);
        assert_eq!(classify("/* x */ insert into t values (1)"), Operation::Insert);
        assert_eq!(classify("UPDATE t SET a = 1"), Operation::Update);
        assert_eq!(classify("TRUNCATE t"), Operation::Truncate);
        assert_eq!(classify("ALTER TABLE t ADD c int"), Operation::Alter);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("GRANT ALL ON t TO bob"), Operation::Unknown);
        assert_eq!(classify("SELECTED"), Operation::Unknown);
        assert_eq!(classify("-- only a comment"), Operation::Unknown);
        assert_eq!(classify(""), Operation::Unknown);
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("select".parse::<Operation>(), Ok(Operation::Read));
        assert_eq!(" Delete ".parse::<Operation>(), Ok(Operation::Delete));
        assert!("MERGE".parse::<Operation>().is_err());
    }

    #[test]
    fn test_operation_flags() {
        assert!(Operation::Drop.is_destructive());
        assert!(!Operation::Delete.is_destructive());
        assert!(Operation::Insert.is_write());
        assert!(Operation::Read.is_read());
    }
}
