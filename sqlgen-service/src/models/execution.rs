//! Per-statement and batch execution results.

use crate::sql::Operation;
use serde::Serialize;

/// One result row: column name to JSON value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of one statement. Failures are data, never a panic or an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct StatementResult {
    pub index: usize,
    pub sql: String,
    pub operation: Operation,
    pub success: bool,
    pub rows: Vec<Row>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    /// Wall time in seconds.
    pub execution_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatementResult {
    pub fn fetched(index: usize, sql: String, operation: Operation, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            index,
            sql,
            operation,
            success: true,
            rows,
            row_count,
            rows_affected: None,
            execution_time: 0.0,
            error: None,
        }
    }

    /// Write result. `rows` is empty unless the statement had a `RETURNING` clause.
    pub fn written(
        index: usize,
        sql: String,
        operation: Operation,
        rows: Vec<Row>,
        rows_affected: u64,
    ) -> Self {
        let row_count = rows.len();
        Self {
            index,
            sql,
            operation,
            success: true,
            rows,
            row_count,
            rows_affected: Some(rows_affected),
            execution_time: 0.0,
            error: None,
        }
    }

    pub fn failed(index: usize, sql: String, operation: Operation, error: impl Into<String>) -> Self {
        Self {
            index,
            sql,
            operation,
            success: false,
            rows: Vec::new(),
            row_count: 0,
            rows_affected: None,
            execution_time: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }
}

/// Aggregate of a best-effort batch. Counts are derived once, at construction.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub statements: Vec<StatementResult>,
    pub total_row_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub execution_time: f64,
}

impl BatchResult {
    pub fn from_results(statements: Vec<StatementResult>, execution_time: f64) -> Self {
        let total_row_count = statements.iter().map(|s| s.row_count).sum();
        let successful_count = statements.iter().filter(|s| s.success).count();
        let failed_count = statements.len() - successful_count;
        Self {
            statements,
            total_row_count,
            successful_count,
            failed_count,
            execution_time,
        }
    }

    pub fn success(&self) -> bool {
        self.failed_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: i64) -> Row {
        let mut row = Row::new();
        row.insert("n".to_string(), json!(value));
        row
    }

    #[test]
    fn test_batch_counts_are_derived() {
        let batch = BatchResult::from_results(
            vec![
                StatementResult::fetched(0, "SELECT 1".into(), Operation::Read, vec![row(1)]),
                StatementResult::failed(1, "SELECT x".into(), Operation::Read, "boom"),
                StatementResult::fetched(2, "SELECT 2".into(), Operation::Read, vec![row(2), row(3)]),
            ],
            0.5,
        );

        assert_eq!(batch.total_row_count, 3);
        assert_eq!(batch.successful_count, 2);
        assert_eq!(batch.failed_count, 1);
        assert!(!batch.success());
        assert_eq!(
            batch.successful_count + batch.failed_count,
            batch.statements.len()
        );
    }

    #[test]
    fn test_empty_batch_is_successful() {
        let batch = BatchResult::from_results(Vec::new(), 0.0);
        assert!(batch.success());
        assert_eq!(batch.total_row_count, 0);
    }

    #[test]
    fn test_write_result_serialization() {
        let result = StatementResult::written(0, "DELETE FROM t".into(), Operation::Delete, vec![], 4);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["rows_affected"], 4);
        assert_eq!(value["operation"], "DELETE");
        assert!(value.get("error").is_none());
    }
}
