use std::future::Future;
use std::path::Path;

use crate::error::ReplicateResult;
use crate::types::TableSnapshot;

/// Opens authenticated connections to the warehouse holding the source datasets.
pub trait SourceConnector {
    type Source: Source + Send + Sync;

    /// Authenticates with the service account key at `credential_path` and verifies that the
    /// warehouse is reachable with it.
    fn connect(
        &self,
        credential_path: &Path,
    ) -> impl Future<Output = ReplicateResult<Self::Source>> + Send;
}

/// A connected warehouse project that tables can be listed and read from.
pub trait Source {
    fn list_tables(&self, dataset_id: &str)
    -> impl Future<Output = ReplicateResult<Vec<String>>> + Send;

    /// Reads the whole table, following result pages until all rows are in memory.
    fn read_table(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> impl Future<Output = ReplicateResult<TableSnapshot>> + Send;
}
