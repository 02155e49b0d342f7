use std::future::Future;

use crate::error::ReplicateResult;
use crate::types::TableSnapshot;

/// Provisions and connects to databases on the destination server.
pub trait DestinationConnector {
    type Destination: Destination + Send + Sync;

    /// Creates `database_name` when it does not exist yet.
    ///
    /// Returns `true` if the database was created and `false` if it already existed.
    fn ensure_database(
        &self,
        database_name: &str,
    ) -> impl Future<Output = ReplicateResult<bool>> + Send;

    /// Connects to `database_name` and checks that the connection is usable.
    fn connect(
        &self,
        database_name: &str,
    ) -> impl Future<Output = ReplicateResult<Self::Destination>> + Send;
}

/// A connected destination database.
pub trait Destination {
    fn drop_table(&self, table_name: &str) -> impl Future<Output = ReplicateResult<()>> + Send;

    /// Creates the table described by `snapshot` and inserts all of its rows.
    fn write_snapshot(
        &self,
        snapshot: &TableSnapshot,
    ) -> impl Future<Output = ReplicateResult<()>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}
