//! Requester identity resolution against the HR directory.

use crate::models::identity::{Identity, PrincipalId, RoleLevel};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Requester ids that never reach the identity store.
pub const SYSTEM_SENTINELS: [&str; 5] = ["system", "training_system", "sql_generator", "anonymous", ""];

#[derive(Error, Debug)]
pub enum IdentityStoreError {
    #[error("Invalid principal key: {0}")]
    InvalidKey(String),

    #[error("Identity store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for IdentityStoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// One principal as the store knows it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PrincipalRecord {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub position: Option<String>,
    pub status: Option<String>,
    pub department_id: Option<String>,
    pub department_name: Option<String>,
    pub manager_id: Option<String>,
    pub role_name: Option<String>,
    pub role_level: Option<i32>,
}

impl PrincipalRecord {
    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("active"))
            .unwrap_or(true)
    }

    fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// Read-only view of the principal graph.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_principal(&self, id: &str) -> Result<Option<PrincipalRecord>, IdentityStoreError>;

    /// Active principals whose manager is `manager_id`.
    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>, IdentityStoreError>;

    /// Active principals in organizational unit `unit_id`.
    async fn active_unit_members(&self, unit_id: &str) -> Result<Vec<String>, IdentityStoreError>;
}

/// Identity store over the `employees`, `roles` and `departments` tables.
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_key(id: &str) -> Result<Uuid, IdentityStoreError> {
        Uuid::parse_str(id).map_err(|_| IdentityStoreError::InvalidKey(id.to_string()))
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    #[instrument(skip(self))]
    async fn find_principal(&self, id: &str) -> Result<Option<PrincipalRecord>, IdentityStoreError> {
        let key = Self::parse_key(id)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_principal"])
            .start_timer();

        let record = sqlx::query_as::<_, PrincipalRecord>(
            r#"
            SELECT
                e.id::text AS id,
                e.first_name,
                e.last_name,
                e.email,
                e.position,
                e.status::text AS status,
                e.department_id::text AS department_id,
                d.name AS department_name,
                e.manager_id::text AS manager_id,
                r.name AS role_name,
                r.level::int4 AS role_level
            FROM employees e
            LEFT JOIN roles r ON e.role_id = r.id
            LEFT JOIN departments d ON e.department_id = d.id
            WHERE e.id = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn direct_reports(&self, manager_id: &str) -> Result<Vec<String>, IdentityStoreError> {
        let key = Self::parse_key(manager_id)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["direct_reports"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id::text FROM employees WHERE manager_id = $1 AND status = 'active'",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn active_unit_members(&self, unit_id: &str) -> Result<Vec<String>, IdentityStoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_unit_members"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, String>(
            "SELECT id::text FROM employees WHERE department_id::text = $1 AND status = 'active'",
        )
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(ids)
    }
}

/// Turns a raw requester id into an [`Identity`]. Never fails.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Sentinels and anything that is not a hyphenated UUID skip the store.
    pub fn is_system_id(raw_id: &str) -> bool {
        SYSTEM_SENTINELS.contains(&raw_id)
            || raw_id.len() != 36
            || Uuid::parse_str(raw_id).is_err()
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, raw_id: Option<&str>, role_override: Option<&str>) -> Identity {
        let raw_id = raw_id.map(str::trim).unwrap_or("system");

        if Self::is_system_id(raw_id) {
            debug!("Resolved system identity");
            return Identity::system(raw_id);
        }

        let record = match self.store.find_principal(raw_id).await {
            Ok(Some(record)) if record.is_active() => record,
            Ok(Some(record)) => {
                warn!(status = ?record.status, "Principal is not active, using baseline identity");
                return Self::fallback(raw_id, role_override);
            }
            Ok(None) => {
                warn!("Principal not found, using baseline identity");
                return Self::fallback(raw_id, role_override);
            }
            Err(e) => {
                error!(error = %e, "Identity lookup failed, using baseline identity");
                return Self::fallback(raw_id, role_override);
            }
        };

        self.enrich(record, role_override).await
    }

    async fn enrich(&self, record: PrincipalRecord, role_override: Option<&str>) -> Identity {
        let role_level = record
            .role_level
            .map(RoleLevel::new)
            .unwrap_or(RoleLevel::EMPLOYEE);
        let role_name = Self::display_role(record.role_name.as_deref(), role_override);

        let direct_report_ids: BTreeSet<String> = if role_level >= RoleLevel::MANAGER {
            self.store
                .direct_reports(&record.id)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Direct report lookup failed");
                    Vec::new()
                })
                .into_iter()
                .collect()
        } else {
            BTreeSet::new()
        };

        let department_member_ids: BTreeSet<String> = match (&record.department_id, role_level) {
            (Some(unit), level) if level >= RoleLevel::HR => self
                .store
                .active_unit_members(unit)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Department member lookup failed");
                    Vec::new()
                })
                .into_iter()
                .collect(),
            _ => BTreeSet::new(),
        };

        let mut groups: BTreeSet<String> =
            role_level.groups().into_iter().map(String::from).collect();
        groups.insert(role_name.to_lowercase());

        let mut identity = Identity {
            display_name: record.display_name().unwrap_or_else(|| record.id.clone()),
            id: PrincipalId::User(record.id),
            role_name,
            role_level,
            department_id: record.department_id,
            department_name: record.department_name,
            manager_id: record.manager_id,
            is_manager: !direct_report_ids.is_empty(),
            is_privileged: role_level >= RoleLevel::HR,
            direct_report_ids,
            department_member_ids,
            groups,
            extensions: Default::default(),
        };
        if let Some(email) = record.email {
            identity.extensions.insert("email".to_string(), email);
        }
        if let Some(position) = record.position {
            identity.extensions.insert("position".to_string(), position);
        }

        debug!(
            role_level = %identity.role_level,
            direct_reports = identity.direct_report_ids.len(),
            department_members = identity.department_member_ids.len(),
            "Resolved principal"
        );
        identity
    }

    /// An override only labels the identity when it agrees with the stored role.
    fn display_role(stored: Option<&str>, role_override: Option<&str>) -> String {
        match (stored, role_override) {
            (Some(stored), Some(requested)) if !stored.eq_ignore_ascii_case(requested) => {
                warn!(
                    stored_role = stored,
                    requested_role = requested,
                    "Ignoring role override that conflicts with stored role"
                );
                stored.to_string()
            }
            (Some(stored), _) => stored.to_string(),
            (None, Some(requested)) => requested.to_string(),
            (None, None) => "employee".to_string(),
        }
    }

    fn fallback(raw_id: &str, role_override: Option<&str>) -> Identity {
        let identity = Identity::baseline(raw_id);
        match role_override {
            Some(role) => identity.with_extension("requested_role", role),
            None => identity,
        }
    }
}
