//! End-to-end request flow: identity, context, generation, validation, execution.

use crate::models::api::{
    GenerationDiagnostics, ResponseMetadata, SqlGenerationRequest, SqlGenerationResponse,
};
use crate::models::execution::{BatchResult, StatementResult};
use crate::models::identity::Identity;
use crate::services::executor::ExecutionOrchestrator;
use crate::services::generation::{collect_text, SqlGenerator};
use crate::services::identity::IdentityResolver;
use crate::services::memory::{ContextMemory, MemoryEntry};
use crate::services::metrics::{record_error, record_generation_duration, record_validation_rejection};
use crate::services::training::SchemaTrainer;
use crate::services::validator::SecurityValidator;
use crate::sql::{extract_sql, split_statements};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const INSTRUCTIONS: &str = "You are a SQL expert for a relational database. \
Generate a PostgreSQL query that answers the question below.

Rules:
- Use only the tables and columns that appear in the reference context.
- If the question needs several statements, each one must be self-contained. \
Never reference a CTE or temporary table defined in another statement; repeat the WITH clause instead.
- Return only SQL, with no explanation or commentary.";

/// Per-request defaults.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub default_max_rows: u32,
    pub memory_search_limit: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_max_rows: 1000,
            memory_search_limit: 5,
        }
    }
}

/// The collaborators one request flows through.
pub struct SqlAgent {
    resolver: IdentityResolver,
    memory: Arc<dyn ContextMemory>,
    generator: Arc<dyn SqlGenerator>,
    validator: SecurityValidator,
    orchestrator: ExecutionOrchestrator,
    trainer: Arc<SchemaTrainer>,
    settings: AgentSettings,
}

/// Statements split from one generation, before or after validation.
struct StatementBatch {
    statements: Vec<String>,
    sql: String,
}

impl SqlAgent {
    pub fn new(
        resolver: IdentityResolver,
        memory: Arc<dyn ContextMemory>,
        generator: Arc<dyn SqlGenerator>,
        validator: SecurityValidator,
        orchestrator: ExecutionOrchestrator,
        trainer: Arc<SchemaTrainer>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            resolver,
            memory,
            generator,
            validator,
            orchestrator,
            trainer,
            settings,
        }
    }

    pub fn trainer(&self) -> &SchemaTrainer {
        &self.trainer
    }

    pub fn generator_name(&self) -> &'static str {
        self.generator.name()
    }

    pub async fn database_connected(&self) -> bool {
        match self.orchestrator.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        }
    }

    pub async fn generator_ready(&self) -> bool {
        self.generator.health_check().await.is_ok()
    }

    /// Run one request. Every failure comes back as a `success: false` response.
    #[instrument(
        skip(self, request),
        fields(user_id = request.user_id.as_deref().unwrap_or("system"), execute = request.execute)
    )]
    pub async fn handle(&self, request: &SqlGenerationRequest) -> SqlGenerationResponse {
        let started = Instant::now();

        let identity = self
            .resolver
            .resolve(request.user_id.as_deref(), request.role.as_deref())
            .await;

        let mut metadata = ResponseMetadata::new(identity.role_level);
        metadata.context = request.context.clone();
        metadata.requested_role = request.role.clone();

        let batch = match self.generate(request, &identity, &mut metadata).await {
            Ok(batch) => batch,
            Err(message) => {
                return SqlGenerationResponse::failure(
                    None,
                    message,
                    started.elapsed().as_secs_f64(),
                    metadata,
                )
            }
        };

        let batch = match self.validate(batch, &identity, &mut metadata) {
            Ok(batch) => batch,
            Err((sql, message)) => {
                return SqlGenerationResponse::failure(
                    Some(sql),
                    message,
                    started.elapsed().as_secs_f64(),
                    metadata,
                )
            }
        };

        if !request.execute {
            info!(statements = batch.statements.len(), "SQL generated and validated");
            return SqlGenerationResponse::generated(
                batch.sql,
                format!("Generated SQL for: {}", request.question),
                started.elapsed().as_secs_f64(),
                metadata,
            );
        }

        let max_rows = request.max_rows.unwrap_or(self.settings.default_max_rows);

        if batch.statements.len() == 1 {
            let result = self.orchestrator.execute_one(&batch.statements[0], max_rows).await;
            single_response(result, started, metadata)
        } else {
            let result = self.orchestrator.execute_many(&batch.statements, max_rows).await;
            batch_response(batch.sql, result, started, metadata)
        }
    }

    /// Retrieve context, prompt the generator and split its answer.
    async fn generate(
        &self,
        request: &SqlGenerationRequest,
        identity: &Identity,
        metadata: &mut ResponseMetadata,
    ) -> Result<StatementBatch, String> {
        let context_items = match self
            .memory
            .search(&request.question, self.settings.memory_search_limit)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Context retrieval failed, continuing without context");
                Vec::new()
            }
        };

        let prompt = compose_prompt(
            identity,
            &context_items,
            &request.question,
            request.context.as_deref(),
        );
        debug!(
            context_items = context_items.len(),
            prompt_length = prompt.len(),
            generator = self.generator.name(),
            "Prompt composed"
        );

        let mut diagnostics = GenerationDiagnostics {
            fragment_count: 0,
            context_items: context_items.len(),
            prompt_length: prompt.len(),
        };

        let generation_started = Instant::now();
        let generated = match self.generator.generate(&prompt).await {
            Ok(stream) => collect_text(stream).await,
            Err(e) => Err(e),
        };
        record_generation_duration(generation_started.elapsed().as_secs_f64());

        let generated = match generated {
            Ok(generated) => generated,
            Err(e) => {
                error!(error = %e, "SQL generation failed");
                record_error("generation");
                metadata.diagnostics = Some(diagnostics);
                return Err(format!("SQL generation failed: {}", e));
            }
        };

        diagnostics.fragment_count = generated.fragment_count;
        let sql = extract_sql(&generated.text);
        if sql.is_empty() {
            error!(
                fragment_count = diagnostics.fragment_count,
                context_items = diagnostics.context_items,
                "Generator returned an empty response"
            );
            record_error("empty_generation");
            metadata.diagnostics = Some(diagnostics);
            return Err("Agent returned empty response".to_string());
        }

        let statements = split_statements(&sql);
        if statements.is_empty() {
            record_error("empty_generation");
            metadata.diagnostics = Some(diagnostics);
            return Err("Empty SQL generated".to_string());
        }

        Ok(StatementBatch { statements, sql })
    }

    /// Validate every statement; any blocking error rejects the whole request.
    fn validate(
        &self,
        batch: StatementBatch,
        identity: &Identity,
        metadata: &mut ResponseMetadata,
    ) -> Result<StatementBatch, (String, String)> {
        let multiple = batch.statements.len() > 1;
        let mut validated = Vec::with_capacity(batch.statements.len());

        for (idx, statement) in batch.statements.iter().enumerate() {
            let outcome = self.validator.validate(statement, identity);
            metadata.warnings.extend(outcome.warnings);
            metadata.modifications.extend(outcome.modifications);

            for err in outcome.errors {
                record_validation_rejection(rejection_reason(&err));
                metadata.validation_errors.push(if multiple {
                    format!("Statement {}: {}", idx + 1, err)
                } else {
                    err
                });
            }
            validated.push(outcome.validated_sql);
        }

        metadata.statement_count = validated.len();

        if !metadata.validation_errors.is_empty() {
            warn!(errors = ?metadata.validation_errors, "Security validation failed");
            let message = format!(
                "Security validation failed: {}",
                metadata.validation_errors.join("; ")
            );
            return Err((batch.sql, message));
        }

        metadata.security_validated = true;
        if !metadata.modifications.is_empty() {
            info!(modifications = ?metadata.modifications, "Placeholders substituted");
        }

        let sql = if multiple {
            validated
                .iter()
                .map(|s| format!("{};", s))
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            validated[0].clone()
        };

        Ok(StatementBatch {
            statements: validated,
            sql,
        })
    }
}

fn rejection_reason(error: &str) -> &'static str {
    if error.starts_with("Insufficient privileges") {
        "insufficient_privileges"
    } else if error.starts_with("Dangerous") {
        "dangerous_construct"
    } else if error.contains("not allowed") {
        "operation_not_allowed"
    } else if error.contains("user identity") || error.contains("department") {
        "unresolved_placeholder"
    } else {
        "other"
    }
}

fn single_response(
    result: StatementResult,
    started: Instant,
    mut metadata: ResponseMetadata,
) -> SqlGenerationResponse {
    let elapsed = started.elapsed().as_secs_f64();
    metadata.statement_count = 1;

    if !result.success {
        let cause = result.error.clone().unwrap_or_default();
        let message = if result.operation.is_read() || result.operation.is_write() {
            format!("Execution error: {}", cause)
        } else {
            cause
        };
        error!(error = %message, "Statement execution failed");
        return SqlGenerationResponse::failure(Some(result.sql), message, elapsed, metadata);
    }

    let mut response = SqlGenerationResponse::generated(
        result.sql,
        "Executed 1 SQL statement".to_string(),
        elapsed,
        metadata,
    );

    if result.operation.is_read() {
        response.operation = Some("read".to_string());
        response.row_count = Some(result.row_count);
        response.results = Some(result.rows);
    } else {
        response.operation = Some("write".to_string());
        response.rows_affected = result.rows_affected;
        if !result.rows.is_empty() {
            response.row_count = Some(result.row_count);
            response.returning = Some(result.rows);
        }
    }
    response
}

fn batch_response(
    sql: String,
    batch: BatchResult,
    started: Instant,
    metadata: ResponseMetadata,
) -> SqlGenerationResponse {
    let elapsed = started.elapsed().as_secs_f64();
    let count = batch.statements.len();
    let all_reads = batch.statements.iter().all(|s| s.operation.is_read());

    let mut response = SqlGenerationResponse::generated(
        sql,
        format!("Executed {} SQL statements", count),
        elapsed,
        metadata,
    );
    response.success = batch.success();
    if !batch.success() {
        response.error = Some(format!("{} of {} statements failed", batch.failed_count, count));
    }
    response.operation = Some(if all_reads { "multi_read" } else { "multi_write" }.to_string());
    response.query_count = Some(count);
    response.total_row_count = Some(batch.total_row_count);
    response.successful_queries = Some(batch.successful_count);
    response.failed_queries = Some(batch.failed_count);
    response.query_results = Some(batch.statements);
    response
}

/// Instruction block, user scope, numbered references, then the question.
pub fn compose_prompt(
    identity: &Identity,
    context_items: &[MemoryEntry],
    question: &str,
    context_hint: Option<&str>,
) -> String {
    let mut prompt = String::from(INSTRUCTIONS);

    if let Some(user_id) = identity.concrete_id() {
        prompt.push_str("\n\nCurrent user:\n");
        prompt.push_str(&format!("- User ID: {}\n", user_id));
        prompt.push_str(&format!(
            "- Role: {} (level {})\n",
            identity.role_name, identity.role_level
        ));
        prompt.push_str(&format!(
            "- Department: {}\n",
            identity.department_name.as_deref().unwrap_or("Unknown")
        ));
        prompt.push_str(&format!("- Is manager: {}\n", identity.is_manager));
        prompt.push_str(&format!(
            "- Direct reports: {}\n",
            identity.direct_report_ids.len()
        ));
        prompt.push_str(
            "\nWhen the question is about the current user (\"my leaves\", \"requests I need to approve\"), \
filter with the placeholder $CURRENT_USER_ID instead of a literal id, for example employee_id = $CURRENT_USER_ID.",
        );
        if identity.department_id.is_some() {
            prompt.push_str(" Use $CURRENT_DEPARTMENT_ID for the user's department.");
        }
    }

    let references: Vec<String> = context_items
        .iter()
        .enumerate()
        .map(|(idx, item)| format!("Reference {}:\n{}", idx + 1, item.content))
        .collect();
    prompt.push_str("\n\nContext (DDL, examples and documentation):\n");
    prompt.push_str(&references.join("\n\n"));

    prompt.push_str(&format!("\n\nQuestion: {}", question));
    if let Some(hint) = context_hint.filter(|h| !h.trim().is_empty()) {
        prompt.push_str(&format!("\nContext hint: {}", hint));
    }
    prompt
}
