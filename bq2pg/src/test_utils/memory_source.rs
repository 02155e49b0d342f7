use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::error::{ErrorKind, ReplicateError, ReplicateResult};
use crate::source::{Source, SourceConnector};
use crate::types::TableSnapshot;

#[derive(Debug, Default)]
struct Inner {
    datasets: BTreeMap<String, Vec<TableSnapshot>>,
    connect_error: Option<ReplicateError>,
    failing_tables: HashSet<String>,
    connect_calls: Vec<PathBuf>,
    list_calls: usize,
}

/// A warehouse whose datasets live in memory.
///
/// Tables are listed in insertion order. Failures can be injected for the connection and for
/// reading individual tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySourceConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_table(&self, dataset_id: &str, snapshot: TableSnapshot) {
        let mut inner = self.inner.lock().await;
        inner
            .datasets
            .entry(dataset_id.to_string())
            .or_default()
            .push(snapshot);
    }

    pub async fn add_dataset(&self, dataset_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.datasets.entry(dataset_id.to_string()).or_default();
    }

    /// Makes every following connection attempt fail with `err`.
    pub async fn fail_connect(&self, err: ReplicateError) {
        self.inner.lock().await.connect_error = Some(err);
    }

    /// Makes reading `table_id` fail.
    pub async fn fail_read(&self, table_id: &str) {
        self.inner
            .lock()
            .await
            .failing_tables
            .insert(table_id.to_string());
    }

    pub async fn connect_calls(&self) -> Vec<PathBuf> {
        self.inner.lock().await.connect_calls.clone()
    }

    pub async fn list_calls(&self) -> usize {
        self.inner.lock().await.list_calls
    }
}

impl SourceConnector for MemorySourceConnector {
    type Source = MemorySource;

    async fn connect(&self, credential_path: &Path) -> ReplicateResult<MemorySource> {
        let mut inner = self.inner.lock().await;
        inner.connect_calls.push(credential_path.to_path_buf());

        if let Some(err) = &inner.connect_error {
            return Err(err.clone());
        }

        Ok(MemorySource {
            inner: self.inner.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    inner: Arc<Mutex<Inner>>,
}

impl Source for MemorySource {
    async fn list_tables(&self, dataset_id: &str) -> ReplicateResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.list_calls += 1;

        let Some(tables) = inner.datasets.get(dataset_id) else {
            bail!(ErrorKind::SourceQueryFailed, "Dataset not found", dataset_id);
        };

        Ok(tables.iter().map(|table| table.name.clone()).collect())
    }

    async fn read_table(&self, dataset_id: &str, table_id: &str) -> ReplicateResult<TableSnapshot> {
        let inner = self.inner.lock().await;
        if inner.failing_tables.contains(table_id) {
            bail!(ErrorKind::SourceQueryFailed, "Injected read failure", table_id);
        }

        let snapshot = inner
            .datasets
            .get(dataset_id)
            .and_then(|tables| tables.iter().find(|table| table.name == table_id));
        let Some(snapshot) = snapshot else {
            bail!(ErrorKind::SourceQueryFailed, "Table not found", table_id);
        };

        info!(dataset_id, table_id, rows = snapshot.num_rows(), "reading memory table");

        Ok(snapshot.clone())
    }
}
