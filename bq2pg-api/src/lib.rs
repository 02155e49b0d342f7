//! HTTP service replicating BigQuery datasets into PostgreSQL databases.
//!
//! Exposes `POST /replicate` next to health, metrics and OpenAPI documentation endpoints.

pub mod config;
pub mod routes;
pub mod startup;
