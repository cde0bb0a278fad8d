//! SQL generation service: natural-language questions to validated, role-scoped SQL.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod sql;
pub mod startup;
