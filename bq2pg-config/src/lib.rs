//! Configuration management for the replication service.
//!
//! Provides environment detection, layered configuration loading from YAML files and
//! environment variables, secret handling, and the Postgres connection settings shared
//! by the service and the replication core.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
