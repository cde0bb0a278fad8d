//! Domain and transport types for sqlgen-service.

pub mod api;
pub mod execution;
pub mod identity;
pub mod schema_config;
pub mod validation;

pub use api::{
    GenerationDiagnostics, ResponseMetadata, SchemaQuery, SchemaResponse, SchemaTrainingRequest,
    SchemaTrainingResponse, SqlGenerationRequest, SqlGenerationResponse, TableInfo,
    TrainedTablesResponse,
};
pub use execution::{BatchResult, Row, StatementResult};
pub use identity::{AccessScope, Identity, PrincipalId, RoleLevel};
pub use schema_config::SchemaTrainingConfig;
pub use validation::ValidationOutcome;
