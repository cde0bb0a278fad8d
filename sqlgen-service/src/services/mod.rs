//! Services module for sqlgen-service.

pub mod database;
pub mod executor;
pub mod generation;
pub mod identity;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod risk;
pub mod training;
pub mod validator;

pub use database::{ColumnInfo, Database, SchemaIntrospector};
pub use executor::{BackendError, ExecutionOrchestrator, PgQueryBackend, QueryBackend, QueryConnection};
pub use generation::{MockSqlGenerator, OpenAiConfig, OpenAiSqlGenerator, SqlGenerator};
pub use identity::{IdentityResolver, IdentityStore, PgIdentityStore};
pub use memory::{ContextMemory, InMemoryContextStore};
pub use metrics::{
    get_metrics, init_metrics, record_db_query_duration, record_error, record_generation_duration,
    record_request, record_statement_executed, record_validation_rejection,
};
pub use pipeline::{AgentSettings, SqlAgent};
pub use risk::{HeuristicRiskClassifier, RiskClassifier};
pub use training::SchemaTrainer;
pub use validator::SecurityValidator;
