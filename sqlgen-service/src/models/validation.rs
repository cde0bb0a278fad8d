//! Result of validating one generated statement.

use crate::models::identity::RoleLevel;
use crate::sql::Operation;
use serde::Serialize;

/// Errors block execution; warnings and modifications are advisory and audit
/// trail respectively.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    /// Substituted statement when valid, the original text otherwise.
    pub validated_sql: String,
    pub operation: Operation,
    pub role_level: RoleLevel,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub modifications: Vec<String>,
}

impl ValidationOutcome {
    pub fn rejected(sql: &str, role_level: RoleLevel, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            validated_sql: sql.to_string(),
            operation: Operation::Unknown,
            role_level,
            errors: vec![error.into()],
            warnings: Vec::new(),
            modifications: Vec::new(),
        }
    }
}
