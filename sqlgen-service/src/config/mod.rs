//! Configuration module for sqlgen-service.

use crate::sql::Operation;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SqlgenConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub query: QueryConfig,
    pub llm: LlmConfig,
    pub training: TrainingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub timeout: Duration,
    pub max_results: u32,
    pub allowed_operations: Vec<Operation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Mock,
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "mock" => Ok(Self::Mock),
            other => Err(format!("unknown LLM provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Canned answer for the mock provider.
    pub mock_response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub schema_dir: PathBuf,
    pub schema_name: String,
    pub auto_train_on_startup: bool,
    pub memory_search_limit: usize,
}

fn parsed<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma separated operation list such as `SELECT,INSERT`.
pub fn parse_allowed_operations(raw: &str) -> Result<Vec<Operation>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Operation>()
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!("ALLOWED_OPERATIONS: {}", e)))
        })
        .collect()
}

impl SqlgenConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let provider = env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse::<LlmProvider>()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("LLM_PROVIDER: {}", e)))?;

        let api_key = env::var("LLM_API_KEY").unwrap_or_default();
        if provider == LlmProvider::OpenAi && api_key.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "LLM_API_KEY is required unless LLM_PROVIDER=mock"
            )));
        }

        let allowed_operations = parse_allowed_operations(
            &env::var("ALLOWED_OPERATIONS")
                .unwrap_or_else(|_| "SELECT,INSERT,UPDATE,DELETE".to_string()),
        )?;

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "sqlgen-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed("DATABASE_MIN_CONNECTIONS", 2),
                acquire_timeout_secs: parsed("DATABASE_ACQUIRE_TIMEOUT_SECS", 30),
            },
            query: QueryConfig {
                timeout: Duration::from_secs(parsed("QUERY_TIMEOUT_SECS", 30)),
                max_results: parsed("MAX_QUERY_RESULTS", 1000),
                allowed_operations,
            },
            llm: LlmConfig {
                provider,
                api_key,
                base_url: env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                temperature: parsed("LLM_TEMPERATURE", 0.1),
                mock_response: env::var("LLM_MOCK_RESPONSE").ok().filter(|s| !s.is_empty()),
            },
            training: TrainingConfig {
                schema_dir: PathBuf::from(
                    env::var("SCHEMA_DIR").unwrap_or_else(|_| "schemas".to_string()),
                ),
                schema_name: env::var("SCHEMA_NAME").unwrap_or_else(|_| "hrms".to_string()),
                auto_train_on_startup: parsed("AUTO_TRAIN_ON_STARTUP", true),
                memory_search_limit: parsed("MEMORY_SEARCH_LIMIT", 5),
            },
        })
    }
}
