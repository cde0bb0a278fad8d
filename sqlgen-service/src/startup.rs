//! Application startup and lifecycle management.

use crate::config::{LlmProvider, SqlgenConfig};
use crate::handlers::{
    generate_sql, get_schema, health_check, metrics_handler, query, readiness_check,
    train_schema, trained_tables,
};
use crate::services::{
    init_metrics, AgentSettings, ContextMemory, Database, ExecutionOrchestrator,
    HeuristicRiskClassifier, IdentityResolver, InMemoryContextStore, MockSqlGenerator,
    OpenAiConfig, OpenAiSqlGenerator, PgIdentityStore, PgQueryBackend, SchemaIntrospector,
    SchemaTrainer, SecurityValidator, SqlAgent, SqlGenerator,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use service_core::middleware::metrics::{install_recorder, metrics_middleware};
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub agent: Arc<SqlAgent>,
    pub catalog: Arc<dyn SchemaIntrospector>,
    pub http_metrics: Option<PrometheusHandle>,
}

/// Routes plus the shared middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/generate-sql", post(generate_sql))
        .route("/api/query", post(query))
        .route("/api/train-schema", post(train_schema))
        .route("/api/trained-tables", get(trained_tables))
        .route("/api/schema", get(get_schema))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

fn build_generator(config: &SqlgenConfig) -> Result<Arc<dyn SqlGenerator>, AppError> {
    match config.llm.provider {
        LlmProvider::Mock => {
            tracing::warn!("Using mock SQL generator");
            let generator = match &config.llm.mock_response {
                Some(response) => MockSqlGenerator::with_response(response),
                None => MockSqlGenerator::new(true),
            };
            Ok(Arc::new(generator))
        }
        LlmProvider::OpenAi => {
            let generator = OpenAiSqlGenerator::new(OpenAiConfig {
                api_key: config.llm.api_key.clone(),
                base_url: config.llm.base_url.clone(),
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                request_timeout: LLM_REQUEST_TIMEOUT,
            })
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{}", e)))?;
            Ok(Arc::new(generator))
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    db: Database,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: SqlgenConfig) -> Result<Self, AppError> {
        init_metrics();
        let http_metrics = install_recorder();

        let db = Database::new(&config.database, config.query.timeout)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                e
            })?;

        let generator = build_generator(&config)?;
        let memory: Arc<dyn ContextMemory> = Arc::new(InMemoryContextStore::new());
        let catalog: Arc<dyn SchemaIntrospector> = Arc::new(db.clone());

        let trainer = Arc::new(SchemaTrainer::new(
            memory.clone(),
            catalog.clone(),
            config.training.schema_dir.clone(),
        ));

        let agent = Arc::new(SqlAgent::new(
            IdentityResolver::new(Arc::new(PgIdentityStore::new(db.pool().clone()))),
            memory,
            generator,
            SecurityValidator::new(
                config.query.allowed_operations.iter().copied(),
                Arc::new(HeuristicRiskClassifier::new()),
            ),
            ExecutionOrchestrator::new(
                Arc::new(PgQueryBackend::new(db.pool().clone())),
                config.query.timeout,
            ),
            trainer.clone(),
            AgentSettings {
                default_max_rows: config.query.max_results,
                memory_search_limit: config.training.memory_search_limit,
            },
        ));

        if config.training.auto_train_on_startup {
            match trainer
                .train_on_schema_config(&config.training.schema_name)
                .await
            {
                Ok(report) => tracing::info!(
                    schema = %report.schema_name,
                    version = %report.schema_version,
                    trained_count = report.trained_count,
                    errors = report.errors.len(),
                    "Startup training complete"
                ),
                Err(e) => tracing::warn!(
                    error = %e,
                    schema = %config.training.schema_name,
                    "Startup training skipped"
                ),
            }
        }

        let state = AppState {
            service_name: config.service_name.clone(),
            agent,
            catalog,
            http_metrics,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "SQL generation service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            db,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);

        tracing::info!(
            service = "sqlgen-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
