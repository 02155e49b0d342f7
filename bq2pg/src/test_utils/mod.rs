//! In-memory connectors for exercising the replicator without BigQuery or Postgres.

pub mod memory_destination;
pub mod memory_source;

pub use memory_destination::{DestinationOperation, MemoryDestination, MemoryDestinationConnector};
pub use memory_source::{MemorySource, MemorySourceConnector};
