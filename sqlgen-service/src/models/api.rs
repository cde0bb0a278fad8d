//! HTTP request and response bodies.

use crate::models::execution::{Row, StatementResult};
use crate::models::identity::RoleLevel;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SqlGenerationRequest {
    #[validate(custom(function = "not_blank"))]
    pub question: String,
    /// Free-form hint such as `leaves` or `assets`.
    pub context: Option<String>,
    pub user_id: Option<String>,
    /// Display role requested by the caller. Never used for enforcement.
    pub role: Option<String>,
    #[serde(default)]
    pub execute: bool,
    #[validate(range(min = 1, max = 10000))]
    pub max_rows: Option<u32>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut error = ValidationError::new("blank");
        error.message = Some("Question cannot be empty".into());
        return Err(error);
    }
    Ok(())
}

/// Counters explaining an empty or unusable generation.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct GenerationDiagnostics {
    pub fragment_count: usize,
    pub context_items: usize,
    pub prompt_length: usize,
}

/// Present on every response, success or not.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub security_validated: bool,
    pub role_level: RoleLevel,
    pub warnings: Vec<String>,
    pub modifications: Vec<String>,
    pub validation_errors: Vec<String>,
    pub statement_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<GenerationDiagnostics>,
}

impl ResponseMetadata {
    pub fn new(role_level: RoleLevel) -> Self {
        Self {
            security_validated: false,
            role_level,
            warnings: Vec::new(),
            modifications: Vec::new(),
            validation_errors: Vec::new(),
            statement_count: 0,
            context: None,
            requested_role: None,
            diagnostics: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlGenerationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Rows produced by a write's `RETURNING` clause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returning: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_results: Option<Vec<StatementResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful_queries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_queries: Option<usize>,
    /// Seconds, generation plus execution.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

impl SqlGenerationResponse {
    pub fn failure(
        sql: Option<String>,
        error: impl Into<String>,
        execution_time: f64,
        metadata: ResponseMetadata,
    ) -> Self {
        Self {
            success: false,
            sql,
            operation: None,
            results: None,
            row_count: None,
            rows_affected: None,
            returning: None,
            query_count: None,
            query_results: None,
            total_row_count: None,
            successful_queries: None,
            failed_queries: None,
            execution_time,
            explanation: None,
            error: Some(error.into()),
            metadata,
        }
    }

    pub fn generated(sql: String, explanation: String, execution_time: f64, metadata: ResponseMetadata) -> Self {
        Self {
            success: true,
            sql: Some(sql),
            explanation: Some(explanation),
            error: None,
            ..Self::failure(None, "", execution_time, metadata)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SchemaTrainingRequest {
    #[validate(length(min = 1, message = "Schema name cannot be empty"))]
    pub schema_name: Option<String>,
    pub tables: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaTrainingResponse {
    pub success: bool,
    pub message: String,
    pub tables_trained: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sample_questions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainedTablesResponse {
    pub success: bool,
    pub trained_tables: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaQuery {
    #[serde(default = "default_schema_name")]
    pub schema_name: String,
}

fn default_schema_name() -> String {
    "public".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<crate::services::database::ColumnInfo>,
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaResponse {
    pub success: bool,
    pub schemas: Vec<String>,
    pub tables: Vec<TableInfo>,
    pub total_tables: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
