//! Copies BigQuery datasets into PostgreSQL databases.
//!
//! A replication request names any number of jobs, each pairing a service account key and a
//! dataset with a destination database. The [`replicator::Replicator`] runs them one after the
//! other through the [`source::SourceConnector`] and [`destination::DestinationConnector`]
//! traits, implemented for BigQuery and Postgres in [`clients`].

pub mod clients;
pub mod conversions;
pub mod destination;
pub mod error;
pub mod job;
mod macros;
pub mod metrics;
pub mod replicator;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
