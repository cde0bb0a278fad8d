//! HTTP handlers for sqlgen-service.

pub mod health;
pub mod schema;
pub mod sql;

pub use health::{health_check, metrics_handler, readiness_check};
pub use schema::{get_schema, train_schema, trained_tables};
pub use sql::{generate_sql, query};
