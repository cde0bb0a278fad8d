use axum::{extract::State, Json};
use validator::Validate;

use crate::models::{SqlGenerationRequest, SqlGenerationResponse};
use crate::services::record_request;
use crate::startup::AppState;
use service_core::error::AppError;

fn outcome(response: &SqlGenerationResponse) -> &'static str {
    if response.success {
        "success"
    } else {
        "failure"
    }
}

/// Generate SQL for a question, executing it when `execute` is set.
#[tracing::instrument(skip(state, request))]
pub async fn generate_sql(
    State(state): State<AppState>,
    Json(request): Json<SqlGenerationRequest>,
) -> Result<Json<SqlGenerationResponse>, AppError> {
    request.validate()?;

    let response = state.agent.handle(&request).await;
    record_request("generate_sql", outcome(&response));
    Ok(Json(response))
}

/// Generate and always execute.
#[tracing::instrument(skip(state, request))]
pub async fn query(
    State(state): State<AppState>,
    Json(mut request): Json<SqlGenerationRequest>,
) -> Result<Json<SqlGenerationResponse>, AppError> {
    request.validate()?;
    request.execute = true;

    let response = state.agent.handle(&request).await;
    record_request("query", outcome(&response));
    Ok(Json(response))
}
