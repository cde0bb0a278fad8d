use axum::{
    extract::{Query, State},
    Json,
};
use validator::Validate;

use crate::models::{
    SchemaQuery, SchemaResponse, SchemaTrainingRequest, SchemaTrainingResponse, TableInfo,
    TrainedTablesResponse,
};
use crate::services::{record_error, record_request};
use crate::startup::AppState;
use service_core::error::AppError;

const SCHEMA_LISTING_LIMIT: usize = 20;

/// Train context memory on live tables.
#[tracing::instrument(skip(state, request))]
pub async fn train_schema(
    State(state): State<AppState>,
    Json(request): Json<SchemaTrainingRequest>,
) -> Result<Json<SchemaTrainingResponse>, AppError> {
    request.validate()?;

    let result = state
        .agent
        .trainer()
        .train_on_database_schema(request.tables, request.schema_name.as_deref())
        .await;

    let response = match result {
        Ok(report) => {
            record_request("train_schema", "success");
            SchemaTrainingResponse {
                success: true,
                message: format!(
                    "Successfully trained on {} tables",
                    report.tables_trained.len()
                ),
                tables_trained: report.tables_trained,
                sample_questions: report.sample_questions,
                error: None,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Schema training failed");
            record_request("train_schema", "failure");
            record_error("training");
            SchemaTrainingResponse {
                success: false,
                message: "Training failed".to_string(),
                tables_trained: Vec::new(),
                sample_questions: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    };

    Ok(Json(response))
}

pub async fn trained_tables(State(state): State<AppState>) -> Json<TrainedTablesResponse> {
    let trained_tables = state.agent.trainer().trained_tables().await;
    Json(TrainedTablesResponse {
        success: true,
        count: trained_tables.len(),
        trained_tables,
    })
}

/// Base tables of a schema, the first few with columns and row counts.
#[tracing::instrument(skip(state))]
pub async fn get_schema(
    State(state): State<AppState>,
    Query(query): Query<SchemaQuery>,
) -> Json<SchemaResponse> {
    let tables = match state.catalog.list_tables(&query.schema_name).await {
        Ok(tables) => tables,
        Err(e) => {
            tracing::error!(error = %e, schema = %query.schema_name, "Failed to list tables");
            record_request("schema", "failure");
            return Json(SchemaResponse {
                success: false,
                schemas: Vec::new(),
                tables: Vec::new(),
                total_tables: 0,
                error: Some(e.to_string()),
            });
        }
    };

    let mut infos = Vec::with_capacity(tables.len().min(SCHEMA_LISTING_LIMIT));
    for table in tables.iter().take(SCHEMA_LISTING_LIMIT) {
        let columns = match state.catalog.table_columns(&query.schema_name, table).await {
            Ok(columns) => columns,
            Err(e) => {
                tracing::warn!(error = %e, table = %table, "Failed to read columns");
                Vec::new()
            }
        };
        infos.push(TableInfo {
            table_name: table.clone(),
            columns,
            row_count: state.catalog.row_count(&query.schema_name, table).await,
        });
    }

    record_request("schema", "success");
    Json(SchemaResponse {
        success: true,
        schemas: vec![query.schema_name],
        tables: infos,
        total_tables: tables.len(),
        error: None,
    })
}
