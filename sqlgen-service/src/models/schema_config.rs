//! Training corpus description, loaded from `<schema_dir>/<name>.yaml`.

use serde::Deserialize;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_database_schema() -> String {
    "public".to_string()
}

fn default_relationship_type() -> String {
    "many-to-one".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaTrainingConfig {
    #[serde(rename = "schema", alias = "schema_info")]
    pub schema_info: SchemaMetadata,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub examples: Vec<ExampleQuery>,
    #[serde(default)]
    pub documentation: Vec<DocumentationSection>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaMetadata {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub description: Option<String>,
    /// Postgres schema the tables live in.
    #[serde(default = "default_database_schema")]
    pub database_schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub description: Option<String>,
    /// Discover DDL from `information_schema` instead of `ddl_override`.
    #[serde(default = "default_true")]
    pub discovery: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnConfig>,
    pub ddl_override: Option<String>,
    #[serde(default = "default_true")]
    pub include_in_training: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ColumnConfig {
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub type_hint: Option<String>,
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub is_foreign_key: bool,
    pub references: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExampleQuery {
    pub question: String,
    pub sql: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentationSection {
    pub topic: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipConfig {
    pub from_table: String,
    pub to_table: String,
    pub from_column: String,
    pub to_column: String,
    #[serde(default = "default_relationship_type")]
    pub relationship_type: String,
    pub description: Option<String>,
}
