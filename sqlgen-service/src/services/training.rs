//! Schema training: loads the YAML corpus and database DDL into context memory.

use crate::models::schema_config::{SchemaTrainingConfig, TableConfig};
use crate::services::database::{render_ddl, SchemaIntrospector};
use crate::services::memory::{ContextMemory, MemoryEntry, MemoryError, MemoryKind};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Schema config '{name}' not found")]
    SchemaNotFound { name: String, available: Vec<String> },

    #[error("Invalid schema config '{name}': {message}")]
    InvalidCorpus { name: String, message: String },

    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Outcome of training on a YAML corpus.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusTrainingReport {
    pub schema_name: String,
    pub schema_version: String,
    pub trained_count: usize,
    pub tables_trained: Vec<String>,
    pub examples_trained: usize,
    pub errors: Vec<String>,
}

/// Outcome of training directly on database tables.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatabaseTrainingReport {
    pub tables_trained: Vec<String>,
    pub sample_questions: Vec<String>,
    pub errors: Vec<String>,
}

pub struct SchemaTrainer {
    memory: Arc<dyn ContextMemory>,
    introspector: Arc<dyn SchemaIntrospector>,
    schema_dir: PathBuf,
    trained_tables: Mutex<BTreeSet<String>>,
}

impl SchemaTrainer {
    pub fn new(
        memory: Arc<dyn ContextMemory>,
        introspector: Arc<dyn SchemaIntrospector>,
        schema_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            memory,
            introspector,
            schema_dir: schema_dir.into(),
            trained_tables: Mutex::new(BTreeSet::new()),
        }
    }

    /// Names of the corpus files in the schema directory, sorted.
    pub fn list_schemas(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.schema_dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn corpus_path(&self, name: &str) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.schema_dir.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
    }

    /// Parse `<schema_dir>/<name>.yaml` (or `.yml`).
    pub fn load_corpus(&self, name: &str) -> Result<SchemaTrainingConfig, TrainingError> {
        let path = self
            .corpus_path(name)
            .ok_or_else(|| TrainingError::SchemaNotFound {
                name: name.to_string(),
                available: self.list_schemas(),
            })?;
        parse_corpus(name, &path)
    }

    /// Tables stored in memory so far, sorted.
    pub async fn trained_tables(&self) -> Vec<String> {
        self.trained_tables.lock().await.iter().cloned().collect()
    }

    async fn mark_trained(&self, table: &str) {
        self.trained_tables.lock().await.insert(table.to_string());
    }

    async fn table_ddl(&self, schema: &str, table: &str) -> Result<String, TrainingError> {
        let columns = self
            .introspector
            .table_columns(schema, table)
            .await
            .map_err(|e| TrainingError::Introspection(e.to_string()))?;
        Ok(render_ddl(table, &columns))
    }

    async fn corpus_table_ddl(&self, schema: &str, table: &TableConfig) -> Result<String, TrainingError> {
        let mut ddl = if table.discovery {
            self.table_ddl(schema, &table.name).await?
        } else {
            table
                .ddl_override
                .clone()
                .unwrap_or_else(|| format!("-- No DDL for {}", table.name))
        };

        if let Some(notes) = table.notes.as_deref().filter(|n| !n.is_empty()) {
            ddl.push_str(&format!("\n-- Notes:\n-- {}", notes.replace('\n', "\n-- ")));
        }
        if let Some(description) = table.description.as_deref().filter(|d| !d.is_empty()) {
            ddl = format!("-- {}\n{}", description, ddl);
        }
        Ok(ddl)
    }

    /// Train on a YAML corpus. Per-item failures are collected, never fatal.
    #[instrument(skip(self))]
    pub async fn train_on_schema_config(&self, name: &str) -> Result<CorpusTrainingReport, TrainingError> {
        let corpus = self.load_corpus(name)?;
        let db_schema = corpus.schema_info.database_schema.clone();

        info!(
            schema = %corpus.schema_info.name,
            version = %corpus.schema_info.version,
            tables = corpus.tables.len(),
            examples = corpus.examples.len(),
            "Training on schema config"
        );

        let mut report = CorpusTrainingReport {
            schema_name: corpus.schema_info.name.clone(),
            schema_version: corpus.schema_info.version.clone(),
            trained_count: 0,
            tables_trained: Vec::new(),
            examples_trained: 0,
            errors: Vec::new(),
        };

        for table in corpus.tables.iter().filter(|t| t.include_in_training) {
            let saved = match self.corpus_table_ddl(&db_schema, table).await {
                Ok(ddl) => self
                    .memory
                    .save(MemoryEntry::new(MemoryKind::Ddl, ddl).tag("table", table.name.as_str()))
                    .await
                    .map_err(TrainingError::from),
                Err(e) => Err(e),
            };

            match saved {
                Ok(()) => {
                    report.trained_count += 1;
                    report.tables_trained.push(table.name.clone());
                    self.mark_trained(&table.name).await;
                    debug!(table = %table.name, "Trained table DDL");
                }
                Err(e) => {
                    let message = format!("Failed to train table {}: {}", table.name, e);
                    warn!(table = %table.name, error = %e, "Table training failed");
                    report.errors.push(message);
                }
            }
        }

        for example in &corpus.examples {
            let entry = MemoryEntry::new(
                MemoryKind::Example,
                format!("Question: {}\nSQL: {}", example.question, example.sql),
            )
            .tag("category", example.category.as_deref().unwrap_or("general"));

            match self.memory.save(entry).await {
                Ok(()) => {
                    report.trained_count += 1;
                    report.examples_trained += 1;
                }
                Err(e) => {
                    let question: String = example.question.chars().take(30).collect();
                    warn!(error = %e, "Example training failed");
                    report
                        .errors
                        .push(format!("Failed to train example '{}...': {}", question, e));
                }
            }
        }

        for doc in &corpus.documentation {
            let entry = MemoryEntry::new(
                MemoryKind::Documentation,
                format!("Topic: {}\n\n{}", doc.topic, doc.content),
            )
            .tag("topic", doc.topic.as_str());

            match self.memory.save(entry).await {
                Ok(()) => report.trained_count += 1,
                Err(e) => {
                    warn!(topic = %doc.topic, error = %e, "Documentation training failed");
                    report
                        .errors
                        .push(format!("Failed to train doc '{}': {}", doc.topic, e));
                }
            }
        }

        if !corpus.relationships.is_empty() {
            let mut content = String::from("Database Relationships:\n");
            for rel in &corpus.relationships {
                content.push_str(&format!(
                    "\n- {}.{} → {}.{}",
                    rel.from_table, rel.from_column, rel.to_table, rel.to_column
                ));
                if let Some(description) = rel.description.as_deref().filter(|d| !d.is_empty()) {
                    content.push_str(&format!(" ({})", description));
                }
            }

            let entry =
                MemoryEntry::new(MemoryKind::Documentation, content).tag("topic", "relationships");
            match self.memory.save(entry).await {
                Ok(()) => report.trained_count += 1,
                Err(e) => {
                    warn!(error = %e, "Relationship training failed");
                    report
                        .errors
                        .push(format!("Failed to train relationships: {}", e));
                }
            }
        }

        info!(
            tables = report.tables_trained.len(),
            examples = report.examples_trained,
            trained_count = report.trained_count,
            errors = report.errors.len(),
            "Schema training complete"
        );

        Ok(report)
    }

    /// Train on live tables, or every base table of `public` when none are given.
    #[instrument(skip(self, tables))]
    pub async fn train_on_database_schema(
        &self,
        tables: Option<Vec<String>>,
        schema_name: Option<&str>,
    ) -> Result<DatabaseTrainingReport, TrainingError> {
        let tables = match tables.filter(|t| !t.is_empty()) {
            Some(tables) => tables,
            None => self
                .introspector
                .list_tables("public")
                .await
                .map_err(|e| TrainingError::Introspection(e.to_string()))?,
        };
        let label = schema_name.unwrap_or("default");

        let mut report = DatabaseTrainingReport::default();

        for table in &tables {
            let ddl = match self.table_ddl("public", table).await {
                Ok(ddl) => ddl,
                Err(e) => {
                    warn!(table = %table, error = %e, "Failed to read table DDL");
                    report.errors.push(format!("Failed to train on table {}: {}", table, e));
                    continue;
                }
            };

            let entry = MemoryEntry::new(MemoryKind::Ddl, ddl)
                .tag("table", table.as_str())
                .tag("schema", label);
            if let Err(e) = self.memory.save(entry).await {
                warn!(table = %table, error = %e, "Failed to store table DDL");
                report.errors.push(format!("Failed to train on table {}: {}", table, e));
                continue;
            }

            report.tables_trained.push(table.clone());
            self.mark_trained(table).await;
            info!(table = %table, "Trained on table");

            for (question, sql) in sample_questions(table) {
                let entry = MemoryEntry::new(
                    MemoryKind::Example,
                    format!("Question: {}\nSQL: {}", question, sql),
                )
                .tag("table", table.as_str());
                match self.memory.save(entry).await {
                    Ok(()) => report.sample_questions.push(question),
                    Err(e) => warn!(table = %table, error = %e, "Failed to train sample question"),
                }
            }
        }

        info!(tables = report.tables_trained.len(), "Database training complete");
        Ok(report)
    }
}

fn parse_corpus(name: &str, path: &Path) -> Result<SchemaTrainingConfig, TrainingError> {
    let invalid = |message: String| TrainingError::InvalidCorpus {
        name: name.to_string(),
        message,
    };

    let path_str = path
        .to_str()
        .ok_or_else(|| invalid("path is not valid UTF-8".to_string()))?;

    ::config::Config::builder()
        .add_source(::config::File::new(path_str, ::config::FileFormat::Yaml))
        .build()
        .and_then(|c| c.try_deserialize::<SchemaTrainingConfig>())
        .map_err(|e| invalid(e.to_string()))
}

/// Canned question/SQL pairs by table family, plus two generic ones.
pub fn sample_questions(table: &str) -> Vec<(String, String)> {
    let lower = table.to_lowercase();
    let mut questions: Vec<(String, String)> = if lower.contains("leave") {
        vec![
            (
                "Show all pending leave requests".to_string(),
                format!("SELECT * FROM {} WHERE status = 'pending'", table),
            ),
            (
                "Count leave requests by status".to_string(),
                format!("SELECT status, COUNT(*) as count FROM {} GROUP BY status", table),
            ),
            (
                "Show approved leaves this month".to_string(),
                format!(
                    "SELECT * FROM {} WHERE status = 'approved' AND EXTRACT(MONTH FROM created_at) = EXTRACT(MONTH FROM CURRENT_DATE)",
                    table
                ),
            ),
        ]
    } else if lower.contains("asset") {
        vec![
            (
                "Show all available assets".to_string(),
                format!("SELECT * FROM {} WHERE status = 'available'", table),
            ),
            (
                "Count assets by category".to_string(),
                format!("SELECT category, COUNT(*) as count FROM {} GROUP BY category", table),
            ),
        ]
    } else if lower.contains("document") {
        vec![
            (
                "Show recent documents".to_string(),
                format!("SELECT * FROM {} ORDER BY created_at DESC LIMIT 10", table),
            ),
            (
                "Count documents by type".to_string(),
                format!(
                    "SELECT document_type, COUNT(*) as count FROM {} GROUP BY document_type",
                    table
                ),
            ),
        ]
    } else {
        Vec::new()
    };

    questions.push((
        format!("Show all records from {}", table),
        format!("SELECT * FROM {} LIMIT 100", table),
    ));
    questions.push((
        format!("Count total records in {}", table),
        format!("SELECT COUNT(*) as total FROM {}", table),
    ));
    questions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::ColumnInfo;
    use crate::services::memory::InMemoryContextStore;
    use async_trait::async_trait;
    use service_core::error::AppError;

    struct FakeCatalog;

    #[async_trait]
    impl SchemaIntrospector for FakeCatalog {
        async fn list_tables(&self, _schema: &str) -> Result<Vec<String>, AppError> {
            Ok(vec!["tr_leaves".to_string(), "employees".to_string()])
        }

        async fn table_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
            match table {
                "broken" => Err(AppError::DatabaseError(anyhow::anyhow!("catalog offline"))),
                "ghost" => Ok(Vec::new()),
                _ => Ok(vec![ColumnInfo {
                    column_name: "id".to_string(),
                    data_type: "uuid".to_string(),
                    is_nullable: "NO".to_string(),
                    column_default: None,
                    character_maximum_length: None,
                }]),
            }
        }

        async fn row_count(&self, _schema: &str, _table: &str) -> Option<i64> {
            Some(0)
        }
    }

    const CORPUS: &str = r#"
schema:
  name: hrms
  version: "2.1.0"
  description: Test corpus
tables:
  - name: tr_leaves
    description: Leave requests
    notes: "status is pending or approved\nuse employee_id for ownership"
  - name: legacy_view
    discovery: false
    ddl_override: "CREATE VIEW legacy_view AS SELECT 1"
  - name: broken
  - name: hidden
    include_in_training: false
examples:
  - question: Show my pending leaves
    sql: SELECT * FROM tr_leaves WHERE employee_id = $CURRENT_USER_ID
    category: leaves
documentation:
  - topic: Leave statuses
    content: pending, approved, rejected
relationships:
  - from_table: tr_leaves
    from_column: employee_id
    to_table: employees
    to_column: id
    description: leave owner
"#;

    fn trainer_with_corpus() -> (SchemaTrainer, Arc<InMemoryContextStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hrms.yaml"), CORPUS).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let memory = Arc::new(InMemoryContextStore::new());
        let trainer = SchemaTrainer::new(memory.clone(), Arc::new(FakeCatalog), dir.path());
        (trainer, memory, dir)
    }

    #[tokio::test]
    async fn test_train_on_schema_config() {
        let (trainer, memory, _dir) = trainer_with_corpus();
        let report = trainer.train_on_schema_config("hrms").await.unwrap();

        assert_eq!(report.schema_name, "hrms");
        assert_eq!(report.schema_version, "2.1.0");
        assert_eq!(report.tables_trained, vec!["tr_leaves", "legacy_view"]);
        assert_eq!(report.examples_trained, 1);
        // two tables, one example, one doc, one relationships doc
        assert_eq!(report.trained_count, 5);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Failed to train table broken"));
        assert_eq!(memory.len().await, 5);
        assert_eq!(trainer.trained_tables().await, vec!["legacy_view", "tr_leaves"]);

        let hits = memory.search("Relationships", 1).await.unwrap();
        assert!(hits[0]
            .content
            .contains("- tr_leaves.employee_id → employees.id (leave owner)"));
    }

    #[tokio::test]
    async fn test_table_ddl_carries_description_and_notes() {
        let (trainer, _memory, _dir) = trainer_with_corpus();
        let corpus = trainer.load_corpus("hrms").unwrap();
        let ddl = trainer.corpus_table_ddl("public", &corpus.tables[0]).await.unwrap();
        assert_eq!(
            ddl,
            "-- Leave requests\nCREATE TABLE tr_leaves (\n    id uuid NOT NULL\n);\n-- Notes:\n-- status is pending or approved\n-- use employee_id for ownership"
        );
    }

    #[tokio::test]
    async fn test_missing_corpus_lists_available() {
        let (trainer, _memory, _dir) = trainer_with_corpus();
        match trainer.train_on_schema_config("payroll").await {
            Err(TrainingError::SchemaNotFound { name, available }) => {
                assert_eq!(name, "payroll");
                assert_eq!(available, vec!["hrms"]);
            }
            other => panic!("expected SchemaNotFound, got {:?}", other.map(|r| r.schema_name)),
        }
    }

    #[tokio::test]
    async fn test_train_on_database_schema() {
        let (trainer, memory, _dir) = trainer_with_corpus();
        let report = trainer.train_on_database_schema(None, Some("leaves")).await.unwrap();

        assert_eq!(report.tables_trained, vec!["tr_leaves", "employees"]);
        // three leave questions and two generic per table
        assert_eq!(report.sample_questions.len(), 7);
        assert!(report.sample_questions.contains(&"Count total records in employees".to_string()));
        assert_eq!(memory.len().await, 9);
    }

    #[tokio::test]
    async fn test_train_on_listed_tables_collects_failures() {
        let (trainer, _memory, _dir) = trainer_with_corpus();
        let report = trainer
            .train_on_database_schema(Some(vec!["broken".to_string(), "ghost".to_string()]), None)
            .await
            .unwrap();
        assert_eq!(report.tables_trained, vec!["ghost"]);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn test_sample_questions_by_family() {
        assert_eq!(sample_questions("asset_inventory").len(), 4);
        assert_eq!(sample_questions("documents").len(), 4);
        let generic = sample_questions("roles");
        assert_eq!(generic.len(), 2);
        assert_eq!(generic[0].1, "SELECT * FROM roles LIMIT 100");
    }
}
