//! Statement execution against the relational backend.

use crate::models::execution::{BatchResult, Row, StatementResult};
use crate::services::metrics::{record_db_query_duration, record_statement_executed};
use crate::sql::{apply_row_limit, classify, has_returning_clause, Operation};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo, ValueRef};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

/// Extra time the client waits beyond the server-side statement timeout.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("{0}")]
    Statement(String),

    #[error("Statement timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(QUERY_CANCELED) => {
                Self::Timeout(db.message().to_string())
            }
            sqlx::Error::Database(db) => Self::Statement(db.message().to_string()),
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::Tls(e) => Self::Connection(e.to_string()),
            sqlx::Error::Protocol(e) => Self::Connection(e),
            sqlx::Error::PoolTimedOut => Self::Connection("timed out acquiring a connection".into()),
            sqlx::Error::PoolClosed => Self::Connection("connection pool is closed".into()),
            sqlx::Error::WorkerCrashed => Self::Connection("connection worker crashed".into()),
            other => Self::Statement(other.to_string()),
        }
    }
}

/// One acquired connection. Dropping it returns it to the pool.
#[async_trait]
pub trait QueryConnection: Send {
    async fn fetch(&mut self, sql: &str) -> Result<Vec<Row>, BackendError>;

    /// Run a statement and return the backend's command status, e.g. `UPDATE 3`.
    async fn execute(&mut self, sql: &str) -> Result<String, BackendError>;

    /// Close instead of recycling when dropped.
    fn discard(&mut self);
}

#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn QueryConnection>, BackendError>;

    async fn health_check(&self) -> Result<(), BackendError>;
}

pub struct PgQueryBackend {
    pool: PgPool,
}

impl PgQueryBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryBackend for PgQueryBackend {
    async fn acquire(&self) -> Result<Box<dyn QueryConnection>, BackendError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgQueryConnection { conn }))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgQueryConnection {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl QueryConnection for PgQueryConnection {
    async fn fetch(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        let rows = sqlx::query(sql)
            .persistent(false)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<String, BackendError> {
        let result = sqlx::query(sql)
            .persistent(false)
            .execute(&mut *self.conn)
            .await?;
        Ok(command_tag(classify(sql), result.rows_affected()))
    }

    fn discard(&mut self) {
        self.conn.close_on_drop();
    }
}

/// Rebuild the Postgres command tag; sqlx only exposes the row count.
fn command_tag(operation: Operation, rows_affected: u64) -> String {
    match operation {
        Operation::Insert => format!("INSERT 0 {}", rows_affected),
        other => format!("{} {}", other.as_str(), rows_affected),
    }
}

/// Final whitespace-separated token of a command status, or 0.
pub fn parse_rows_affected(status: &str) -> u64 {
    status
        .split_whitespace()
        .last()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(_) => decode_column(row, idx, column.type_info().name()),
            Err(_) => Value::Null,
        };
        out.insert(column.name().to_string(), value);
    }
    out
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> Value {
    fn json<T: serde::Serialize>(value: Result<T, sqlx::Error>) -> Value {
        value
            .ok()
            .and_then(|v| serde_json::to_value(v).ok())
            .unwrap_or(Value::Null)
    }

    match type_name {
        "BOOL" => json(row.try_get::<bool, _>(idx)),
        "INT2" => json(row.try_get::<i16, _>(idx)),
        "INT4" => json(row.try_get::<i32, _>(idx)),
        "INT8" => json(row.try_get::<i64, _>(idx)),
        "FLOAT4" => json(row.try_get::<f32, _>(idx)),
        "FLOAT8" => json(row.try_get::<f64, _>(idx)),
        "NUMERIC" => match row.try_get::<rust_decimal::Decimal, _>(idx) {
            Ok(d) => d
                .to_f64()
                .map(Value::from)
                .unwrap_or_else(|| Value::String(d.to_string())),
            Err(_) => Value::Null,
        },
        "UUID" => json(row.try_get::<uuid::Uuid, _>(idx).map(|u| u.to_string())),
        "DATE" => json(row.try_get::<chrono::NaiveDate, _>(idx).map(|d| d.to_string())),
        "TIME" => json(row.try_get::<chrono::NaiveTime, _>(idx).map(|t| t.to_string())),
        "TIMESTAMP" => json(row.try_get::<chrono::NaiveDateTime, _>(idx).map(|t| t.to_string())),
        "TIMESTAMPTZ" => json(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                .map(|t| t.to_rfc3339()),
        ),
        "JSON" | "JSONB" => json(row.try_get::<Value, _>(idx)),
        "TEXT[]" | "VARCHAR[]" => json(row.try_get::<Vec<String>, _>(idx)),
        "INT4[]" => json(row.try_get::<Vec<i32>, _>(idx)),
        "INT8[]" => json(row.try_get::<Vec<i64>, _>(idx)),
        "UUID[]" => json(
            row.try_get::<Vec<uuid::Uuid>, _>(idx)
                .map(|ids| ids.iter().map(|u| u.to_string()).collect::<Vec<_>>()),
        ),
        // Text-like and user-defined enum types share the text wire format.
        _ => json(row.try_get_unchecked::<String, _>(idx)),
    }
}

/// Runs validated statements and turns every failure into data.
#[derive(Clone)]
pub struct ExecutionOrchestrator {
    backend: Arc<dyn QueryBackend>,
    statement_timeout: Duration,
}

impl ExecutionOrchestrator {
    pub fn new(backend: Arc<dyn QueryBackend>, statement_timeout: Duration) -> Self {
        Self {
            backend,
            statement_timeout,
        }
    }

    pub async fn health_check(&self) -> Result<(), BackendError> {
        self.backend.health_check().await
    }

    /// Execute one statement on its own connection.
    #[instrument(skip(self, sql))]
    pub async fn execute_one(&self, sql: &str, max_rows: u32) -> StatementResult {
        let operation = classify(sql);
        if !is_supported(operation) {
            return unsupported(0, sql, operation);
        }

        let mut conn = match self.backend.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to acquire connection");
                return StatementResult::failed(0, sql.to_string(), operation, e.to_string());
            }
        };

        let (result, poisoned) = self.run(conn.as_mut(), 0, sql, operation, max_rows).await;
        if poisoned {
            conn.discard();
        }
        result
    }

    /// Execute statements in order on one connection, without a transaction.
    ///
    /// A failed statement does not stop the batch. Once the connection is
    /// unusable, the remaining statements fail without reaching the backend.
    #[instrument(skip(self, statements), fields(statement_count = statements.len()))]
    pub async fn execute_many(&self, statements: &[String], max_rows: u32) -> BatchResult {
        let started = Instant::now();

        let mut conn = match self.backend.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to acquire connection for batch");
                let results = statements
                    .iter()
                    .enumerate()
                    .map(|(index, sql)| {
                        StatementResult::failed(index, sql.clone(), classify(sql), e.to_string())
                    })
                    .collect();
                return BatchResult::from_results(results, started.elapsed().as_secs_f64());
            }
        };

        let mut poisoned_by: Option<String> = None;
        let mut results = Vec::with_capacity(statements.len());

        for (index, sql) in statements.iter().enumerate() {
            let operation = classify(sql);
            if let Some(cause) = &poisoned_by {
                results.push(StatementResult::failed(
                    index,
                    sql.clone(),
                    operation,
                    format!("Connection error: connection unusable after earlier failure ({})", cause),
                ));
                continue;
            }
            if !is_supported(operation) {
                results.push(unsupported(index, sql, operation));
                continue;
            }

            let (result, poisoned) = self.run(conn.as_mut(), index, sql, operation, max_rows).await;
            if poisoned {
                conn.discard();
                poisoned_by = result.error.clone();
            }
            results.push(result);
        }
        drop(conn);

        let batch = BatchResult::from_results(results, started.elapsed().as_secs_f64());
        info!(
            successful = batch.successful_count,
            failed = batch.failed_count,
            total_rows = batch.total_row_count,
            "Batch executed"
        );
        batch
    }

    /// Returns the result and whether the connection must be discarded.
    async fn run(
        &self,
        conn: &mut dyn QueryConnection,
        index: usize,
        sql: &str,
        operation: Operation,
        max_rows: u32,
    ) -> (StatementResult, bool) {
        let started = Instant::now();
        let deadline = self.statement_timeout + TIMEOUT_GRACE;

        let outcome =
            tokio::time::timeout(deadline, dispatch(conn, index, sql, operation, max_rows)).await;

        let elapsed = started.elapsed().as_secs_f64();
        record_db_query_duration(operation.as_str(), elapsed);

        let (result, poisoned) = match outcome {
            Ok(Ok(result)) => (result, false),
            Ok(Err(e)) => {
                let poisoned = matches!(e, BackendError::Connection(_));
                warn!(index, error = %e, "Statement failed");
                (StatementResult::failed(index, sql.to_string(), operation, e.to_string()), poisoned)
            }
            Err(_) => {
                let e = BackendError::Timeout(format!("no response within {:?}", deadline));
                warn!(index, error = %e, "Statement abandoned, discarding connection");
                (StatementResult::failed(index, sql.to_string(), operation, e.to_string()), true)
            }
        };

        record_statement_executed(
            operation.as_str(),
            if result.success { "success" } else { "error" },
        );
        debug!(index, success = result.success, row_count = result.row_count, "Statement finished");
        (result.with_execution_time(elapsed), poisoned)
    }
}

/// Reads fetch capped rows; writes fetch `RETURNING` rows or report the status count.
async fn dispatch(
    conn: &mut dyn QueryConnection,
    index: usize,
    sql: &str,
    operation: Operation,
    max_rows: u32,
) -> Result<StatementResult, BackendError> {
    if operation.is_read() {
        let limited = apply_row_limit(sql, max_rows);
        let rows = conn.fetch(&limited).await?;
        return Ok(StatementResult::fetched(index, limited, operation, rows));
    }

    if has_returning_clause(sql) {
        let rows = conn.fetch(sql).await?;
        let affected = rows.len() as u64;
        return Ok(StatementResult::written(index, sql.to_string(), operation, rows, affected));
    }

    let status = conn.execute(sql).await?;
    let affected = parse_rows_affected(&status);
    Ok(StatementResult::written(index, sql.to_string(), operation, Vec::new(), affected))
}

fn is_supported(operation: Operation) -> bool {
    operation.is_read() || operation.is_write()
}

fn unsupported(index: usize, sql: &str, operation: Operation) -> StatementResult {
    StatementResult::failed(
        index,
        sql.to_string(),
        operation,
        format!("Unsupported operation type: {}", operation),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted backend keyed on markers in the SQL text.
    #[derive(Default)]
    struct ScriptedBackend {
        executed: Arc<Mutex<Vec<String>>>,
        discarded: Arc<Mutex<usize>>,
        refuse: bool,
    }

    struct ScriptedConnection {
        executed: Arc<Mutex<Vec<String>>>,
        discarded: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn acquire(&self) -> Result<Box<dyn QueryConnection>, BackendError> {
            if self.refuse {
                return Err(BackendError::Connection("pool exhausted".into()));
            }
            Ok(Box::new(ScriptedConnection {
                executed: self.executed.clone(),
                discarded: self.discarded.clone(),
            }))
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    impl ScriptedConnection {
        async fn script(&mut self, sql: &str) -> Result<(), BackendError> {
            self.executed.lock().unwrap().push(sql.to_string());
            if sql.contains("broken") {
                return Err(BackendError::Statement("relation \"broken\" does not exist".into()));
            }
            if sql.contains("hang") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if sql.contains("disconnect") {
                return Err(BackendError::Connection("server closed the connection".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl QueryConnection for ScriptedConnection {
        async fn fetch(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
            self.script(sql).await?;
            let mut row = Row::new();
            row.insert("sql_len".into(), json!(sql.len()));
            Ok(vec![row])
        }

        async fn execute(&mut self, sql: &str) -> Result<String, BackendError> {
            self.script(sql).await?;
            Ok("UPDATE 3".to_string())
        }

        fn discard(&mut self) {
            *self.discarded.lock().unwrap() += 1;
        }
    }

    fn orchestrator(backend: ScriptedBackend) -> ExecutionOrchestrator {
        ExecutionOrchestrator::new(Arc::new(backend), Duration::from_secs(1))
    }

    #[test]
    fn test_parse_rows_affected() {
        assert_eq!(parse_rows_affected("INSERT 0 5"), 5);
        assert_eq!(parse_rows_affected("UPDATE 12"), 12);
        assert_eq!(parse_rows_affected("DELETE"), 0);
        assert_eq!(parse_rows_affected(""), 0);
    }

    #[test]
    fn test_command_tag() {
        assert_eq!(command_tag(Operation::Insert, 2), "INSERT 0 2");
        assert_eq!(command_tag(Operation::Delete, 7), "DELETE 7");
    }

    #[tokio::test]
    async fn test_read_applies_row_limit() {
        let backend = ScriptedBackend::default();
        let executed = backend.executed.clone();
        let result = orchestrator(backend).execute_one("SELECT * FROM t;", 25).await;

        assert!(result.success);
        assert_eq!(result.row_count, 1);
        assert_eq!(executed.lock().unwrap()[0], "SELECT * FROM t\nLIMIT 25");
    }

    #[tokio::test]
    async fn test_write_parses_status() {
        let result = orchestrator(ScriptedBackend::default())
            .execute_one("UPDATE t SET a = 1 WHERE id = 2", 10)
            .await;
        assert!(result.success);
        assert_eq!(result.rows_affected, Some(3));
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn test_returning_write_captures_rows() {
        let result = orchestrator(ScriptedBackend::default())
            .execute_one("INSERT INTO t (a) VALUES (1) RETURNING id", 10)
            .await;
        assert_eq!(result.rows_affected, Some(1));
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn test_unsupported_operation_never_reaches_backend() {
        let backend = ScriptedBackend::default();
        let executed = backend.executed.clone();
        let result = orchestrator(backend).execute_one("DROP TABLE t", 10).await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unsupported operation type: DROP"));
        assert!(executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let statements = vec![
            "SELECT 1".to_string(),
            "SELECT * FROM broken".to_string(),
            "SELECT 3".to_string(),
        ];
        let batch = orchestrator(ScriptedBackend::default())
            .execute_many(&statements, 10)
            .await;

        assert_eq!(batch.successful_count, 2);
        assert_eq!(batch.failed_count, 1);
        assert!(!batch.success());
        assert_eq!(batch.statements[0].row_count, 1);
        assert_eq!(batch.statements[2].row_count, 1);
        assert_eq!(batch.total_row_count, 2);
        assert!(batch.statements[1].error.as_deref().unwrap_or_default().contains("broken"));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let backend = ScriptedBackend::default();
        let executed = backend.executed.clone();
        let statements = vec![
            "INSERT INTO t VALUES (1)".to_string(),
            "SELECT * FROM t".to_string(),
        ];
        orchestrator(backend).execute_many(&statements, 5).await;

        let executed = executed.lock().unwrap();
        assert_eq!(executed[0], "INSERT INTO t VALUES (1)");
        assert_eq!(executed[1], "SELECT * FROM t\nLIMIT 5");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_poisons_remaining_statements() {
        let backend = ScriptedBackend::default();
        let executed = backend.executed.clone();
        let discarded = backend.discarded.clone();
        let statements = vec![
            "SELECT 1".to_string(),
            "SELECT hang".to_string(),
            "SELECT 3".to_string(),
        ];
        let batch = orchestrator(backend).execute_many(&statements, 10).await;

        assert!(batch.statements[0].success);
        assert!(batch.statements[1].error.as_deref().unwrap_or_default().contains("timed out"));
        assert!(batch.statements[2].error.as_deref().unwrap_or_default().contains("Connection error"));
        assert_eq!(executed.lock().unwrap().len(), 2);
        assert_eq!(*discarded.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_statement_error_keeps_connection() {
        let backend = ScriptedBackend::default();
        let discarded = backend.discarded.clone();
        let statements = vec!["SELECT * FROM broken".to_string(), "SELECT 2".to_string()];
        let batch = orchestrator(backend).execute_many(&statements, 10).await;

        assert!(batch.statements[1].success);
        assert_eq!(*discarded.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_fast() {
        let statements = vec![
            "UPDATE t SET disconnect = 1 WHERE id = 1".to_string(),
            "SELECT 2".to_string(),
        ];
        let batch = orchestrator(ScriptedBackend::default())
            .execute_many(&statements, 10)
            .await;
        assert_eq!(batch.failed_count, 2);
    }

    #[tokio::test]
    async fn test_acquire_failure_fails_every_statement() {
        let backend = ScriptedBackend { refuse: true, ..Default::default() };
        let statements = vec!["SELECT 1".to_string(), "SELECT 2".to_string()];
        let batch = orchestrator(backend).execute_many(&statements, 10).await;
        assert_eq!(batch.failed_count, 2);
        assert_eq!(batch.total_row_count, 0);
    }
}
