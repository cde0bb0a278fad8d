//! Database service for sqlgen-service.

use crate::config::DatabaseConfig;
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// One column as reported by `information_schema.columns`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
    pub column_default: Option<String>,
    pub character_maximum_length: Option<i32>,
}

/// Read-only catalog access used by training and the schema endpoint.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError>;

    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>, AppError>;

    /// `None` when the count cannot be taken.
    async fn row_count(&self, schema: &str, table: &str) -> Option<i64>;
}

/// Render a `CREATE TABLE` statement from catalog columns.
pub fn render_ddl(table: &str, columns: &[ColumnInfo]) -> String {
    if columns.is_empty() {
        return format!("-- Table {} not found", table);
    }

    let definitions: Vec<String> = columns
        .iter()
        .map(|col| {
            let mut def = format!("    {} {}", col.column_name, col.data_type);
            if let Some(len) = col.character_maximum_length {
                def.push_str(&format!("({})", len));
            }
            if col.is_nullable == "NO" {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = &col.column_default {
                def.push_str(&format!(" DEFAULT {}", default));
            }
            def
        })
        .collect();

    format!("CREATE TABLE {} (\n{}\n);", table, definitions.join(",\n"))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect and give every pooled connection a server-side statement timeout.
    #[instrument(skip(config), fields(service = "sqlgen-service"))]
    pub async fn new(config: &DatabaseConfig, statement_timeout: Duration) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            statement_timeout_ms = statement_timeout.as_millis() as u64,
            "Connecting to PostgreSQL"
        );

        let timeout_ms = statement_timeout.as_millis();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    sqlx::query(&format!("SET statement_timeout = {}", timeout_ms))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

#[async_trait]
impl SchemaIntrospector for Database {
    #[instrument(skip(self))]
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_tables"])
            .start_timer();

        let tables = sqlx::query_scalar::<_, String>(
            r#"
            SELECT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1 AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list tables: {}", e)))?;

        timer.observe_duration();
        Ok(tables)
    }

    #[instrument(skip(self))]
    async fn table_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["table_columns"])
            .start_timer();

        let columns = sqlx::query_as::<_, ColumnInfo>(
            r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                character_maximum_length::int4 AS character_maximum_length
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to read columns of {}: {}", table, e))
        })?;

        timer.observe_duration();
        Ok(columns)
    }

    #[instrument(skip(self))]
    async fn row_count(&self, schema: &str, table: &str) -> Option<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}.{}", quote_ident(schema), quote_ident(table));
        match sqlx::query_scalar::<_, i64>(&sql).fetch_one(&self.pool).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(error = %e, "Row count failed");
                None
            }
        }
    }
}
