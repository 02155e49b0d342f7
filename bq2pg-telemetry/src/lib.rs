//! Logging and metrics setup shared by the replication binaries and their tests.

pub mod metrics;
pub mod tracing;

pub use self::tracing::{LogFlusher, init_test_tracing, init_tracing};
