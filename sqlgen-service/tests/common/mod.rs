//! Common test utilities for sqlgen-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use service_core::error::AppError;
use sqlgen_service::models::Row;
use sqlgen_service::services::database::ColumnInfo;
use sqlgen_service::services::identity::{IdentityStoreError, PrincipalRecord};
use sqlgen_service::services::{
    AgentSettings, BackendError, ContextMemory, ExecutionOrchestrator, HeuristicRiskClassifier,
    IdentityResolver, IdentityStore, InMemoryContextStore, MockSqlGenerator, QueryBackend,
    QueryConnection, SchemaIntrospector, SchemaTrainer, SecurityValidator, SqlAgent,
};
use sqlgen_service::sql::Operation;
use sqlgen_service::startup::{build_router, AppState};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tower::ServiceExt;

static INIT: Once = Once::new();

pub const EMPLOYEE_ID: &str = "11111111-1111-4111-8111-111111111111";
pub const MANAGER_ID: &str = "22222222-2222-4222-8222-222222222222";
pub const HR_ID: &str = "33333333-3333-4333-8333-333333333333";
pub const ADMIN_ID: &str = "44444444-4444-4444-8444-444444444444";
pub const OUTSIDER_ID: &str = "55555555-5555-4555-8555-555555555555";
pub const DEPARTMENT_ID: &str = "d0000000-0000-4000-8000-000000000001";

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,sqlgen_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

fn principal(id: &str, first_name: &str, role: &str, level: i32, manager: Option<&str>) -> PrincipalRecord {
    PrincipalRecord {
        id: id.to_string(),
        first_name: Some(first_name.to_string()),
        last_name: Some("Tester".to_string()),
        email: Some(format!("{}@example.com", first_name.to_lowercase())),
        position: None,
        status: Some("active".to_string()),
        department_id: Some(DEPARTMENT_ID.to_string()),
        department_name: Some("Engineering".to_string()),
        manager_id: manager.map(String::from),
        role_name: Some(role.to_string()),
        role_level: Some(level),
    }
}

/// Five principals in one department: employee reports to manager.
pub struct StaticIdentityStore {
    principals: HashMap<String, PrincipalRecord>,
}

impl StaticIdentityStore {
    pub fn new() -> Self {
        let principals = [
            principal(EMPLOYEE_ID, "Erin", "employee", 1, Some(MANAGER_ID)),
            principal(MANAGER_ID, "Morgan", "manager", 3, None),
            principal(HR_ID, "Harper", "hr", 4, None),
            principal(ADMIN_ID, "Avery", "admin", 5, None),
        ]
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();
        Self { principals }
    }
}

#[async_trait]
impl IdentityStore for StaticIdentityStore {
    async fn find_principal(&self, id: &str) -> Result<Option<PrincipalRecord>, IdentityStoreError> {
        Ok(self.principals.get(id).cloned())
    }

    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>, IdentityStoreError> {
        Ok(self
            .principals
            .values()
            .filter(|p| p.manager_id.as_deref() == Some(manager_id))
            .map(|p| p.id.clone())
            .collect())
    }

    async fn active_unit_members(&self, unit_id: &str) -> Result<Vec<String>, IdentityStoreError> {
        Ok(self
            .principals
            .values()
            .filter(|p| p.department_id.as_deref() == Some(unit_id))
            .map(|p| p.id.clone())
            .collect())
    }
}

/// Backend that answers every read with two rows and fails on `missing_table`.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub executed: Arc<Mutex<Vec<String>>>,
}

struct RecordingConnection {
    executed: Arc<Mutex<Vec<String>>>,
}

impl RecordingConnection {
    fn record(&self, sql: &str) -> Result<(), BackendError> {
        self.executed.lock().unwrap().push(sql.to_string());
        if sql.contains("missing_table") {
            return Err(BackendError::Statement(
                "relation \"missing_table\" does not exist".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueryBackend for RecordingBackend {
    async fn acquire(&self) -> Result<Box<dyn QueryConnection>, BackendError> {
        Ok(Box::new(RecordingConnection {
            executed: self.executed.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait]
impl QueryConnection for RecordingConnection {
    async fn fetch(&mut self, sql: &str) -> Result<Vec<Row>, BackendError> {
        self.record(sql)?;
        Ok((1..=2)
            .map(|n| {
                let mut row = Row::new();
                row.insert("id".to_string(), json!(n));
                row.insert("status".to_string(), json!("pending"));
                row
            })
            .collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<String, BackendError> {
        self.record(sql)?;
        Ok(match sqlgen_service::sql::classify(sql) {
            Operation::Insert => "INSERT 0 1".to_string(),
            Operation::Delete => "DELETE 4".to_string(),
            _ => "UPDATE 3".to_string(),
        })
    }

    fn discard(&mut self) {}
}

/// Catalog with two tables.
pub struct StaticCatalog;

#[async_trait]
impl SchemaIntrospector for StaticCatalog {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, AppError> {
        if schema == "public" {
            Ok(vec!["employees".to_string(), "tr_leaves".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn table_columns(&self, _schema: &str, _table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        Ok(vec![
            ColumnInfo {
                column_name: "id".to_string(),
                data_type: "uuid".to_string(),
                is_nullable: "NO".to_string(),
                column_default: Some("gen_random_uuid()".to_string()),
                character_maximum_length: None,
            },
            ColumnInfo {
                column_name: "status".to_string(),
                data_type: "character varying".to_string(),
                is_nullable: "YES".to_string(),
                column_default: None,
                character_maximum_length: Some(20),
            },
        ])
    }

    async fn row_count(&self, _schema: &str, _table: &str) -> Option<i64> {
        Some(42)
    }
}

/// A router wired to in-process collaborators.
pub struct TestApp {
    pub router: Router,
    pub executed: Arc<Mutex<Vec<String>>>,
    pub generator: Arc<MockSqlGenerator>,
    pub memory: Arc<InMemoryContextStore>,
    pub agent: Arc<SqlAgent>,
}

impl TestApp {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

pub fn schema_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas")
}

/// Build the app with a generator that always answers `response`.
pub fn spawn_app(response: &str) -> TestApp {
    init_tracing();

    let backend = RecordingBackend::default();
    let executed = backend.executed.clone();
    let generator = Arc::new(MockSqlGenerator::with_response(response));
    let memory = Arc::new(InMemoryContextStore::new());
    let catalog: Arc<dyn SchemaIntrospector> = Arc::new(StaticCatalog);
    let memory_handle: Arc<dyn ContextMemory> = memory.clone();

    let trainer = Arc::new(SchemaTrainer::new(
        memory_handle.clone(),
        catalog.clone(),
        schema_dir(),
    ));

    let agent = Arc::new(SqlAgent::new(
        IdentityResolver::new(Arc::new(StaticIdentityStore::new())),
        memory_handle,
        generator.clone(),
        SecurityValidator::new(
            [
                Operation::Read,
                Operation::Insert,
                Operation::Update,
                Operation::Delete,
            ],
            Arc::new(HeuristicRiskClassifier::new()),
        ),
        ExecutionOrchestrator::new(Arc::new(backend), Duration::from_secs(5)),
        trainer,
        AgentSettings {
            default_max_rows: 100,
            memory_search_limit: 5,
        },
    ));

    let router = build_router(AppState {
        service_name: "sqlgen-service-test".to_string(),
        agent: agent.clone(),
        catalog,
        http_metrics: None,
    });

    TestApp {
        router,
        executed,
        generator,
        memory,
        agent,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

pub async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request");
    send(router, request).await
}

pub async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri(path)
        .body(Body::empty())
        .expect("valid request");
    send(router, request).await
}
