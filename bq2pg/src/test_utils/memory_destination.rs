use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::destination::{Destination, DestinationConnector};
use crate::error::{ErrorKind, ReplicateError, ReplicateResult};
use crate::types::TableSnapshot;

/// A call made against the in-memory destination, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOperation {
    EnsureDatabase(String),
    Connect(String),
    DropTable { database: String, table: String },
    WriteSnapshot { database: String, table: String },
    Close(String),
}

#[derive(Debug, Default)]
struct Inner {
    databases: BTreeMap<String, BTreeMap<String, TableSnapshot>>,
    provisioning_error: Option<ReplicateError>,
    connect_error: Option<ReplicateError>,
    failing_tables: HashSet<String>,
    operations: Vec<DestinationOperation>,
}

/// A database server that keeps its databases in memory.
///
/// Writing a table that already exists fails the same way `create table` would.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestinationConnector {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDestinationConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_provisioning(&self, err: ReplicateError) {
        self.inner.lock().await.provisioning_error = Some(err);
    }

    pub async fn fail_connect(&self, err: ReplicateError) {
        self.inner.lock().await.connect_error = Some(err);
    }

    /// Makes writing `table_name` fail in every database.
    pub async fn fail_write(&self, table_name: &str) {
        self.inner
            .lock()
            .await
            .failing_tables
            .insert(table_name.to_string());
    }

    /// Creates `table` in `database` as if it had been left over from an earlier run.
    pub async fn add_table(&self, database: &str, snapshot: TableSnapshot) {
        let mut inner = self.inner.lock().await;
        inner
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(snapshot.name.clone(), snapshot);
    }

    pub async fn has_database(&self, database: &str) -> bool {
        self.inner.lock().await.databases.contains_key(database)
    }

    /// Returns the tables of `database` ordered by name.
    pub async fn tables(&self, database: &str) -> Vec<TableSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .databases
            .get(database)
            .map(|tables| tables.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn operations(&self) -> Vec<DestinationOperation> {
        self.inner.lock().await.operations.clone()
    }
}

impl DestinationConnector for MemoryDestinationConnector {
    type Destination = MemoryDestination;

    async fn ensure_database(&self, database_name: &str) -> ReplicateResult<bool> {
        let mut inner = self.inner.lock().await;
        inner
            .operations
            .push(DestinationOperation::EnsureDatabase(database_name.to_string()));

        if let Some(err) = &inner.provisioning_error {
            return Err(err.clone());
        }

        if inner.databases.contains_key(database_name) {
            return Ok(false);
        }

        inner
            .databases
            .insert(database_name.to_string(), BTreeMap::new());

        Ok(true)
    }

    async fn connect(&self, database_name: &str) -> ReplicateResult<MemoryDestination> {
        let mut inner = self.inner.lock().await;
        inner
            .operations
            .push(DestinationOperation::Connect(database_name.to_string()));

        if let Some(err) = &inner.connect_error {
            return Err(err.clone());
        }

        if !inner.databases.contains_key(database_name) {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Database does not exist",
                database_name
            );
        }

        Ok(MemoryDestination {
            database_name: database_name.to_string(),
            inner: self.inner.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MemoryDestination {
    database_name: String,
    inner: Arc<Mutex<Inner>>,
}

impl Destination for MemoryDestination {
    async fn drop_table(&self, table_name: &str) -> ReplicateResult<()> {
        let mut inner = self.inner.lock().await;
        inner.operations.push(DestinationOperation::DropTable {
            database: self.database_name.clone(),
            table: table_name.to_string(),
        });

        if let Some(tables) = inner.databases.get_mut(&self.database_name) {
            tables.remove(table_name);
        }

        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &TableSnapshot) -> ReplicateResult<()> {
        let mut inner = self.inner.lock().await;
        inner.operations.push(DestinationOperation::WriteSnapshot {
            database: self.database_name.clone(),
            table: snapshot.name.clone(),
        });

        if inner.failing_tables.contains(&snapshot.name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Injected write failure",
                snapshot.name
            );
        }

        let Some(tables) = inner.databases.get_mut(&self.database_name) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Database does not exist",
                self.database_name
            );
        };
        if tables.contains_key(&snapshot.name) {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Table already exists",
                snapshot.name
            );
        }

        info!(
            database = %self.database_name,
            table = %snapshot.name,
            rows = snapshot.num_rows(),
            "writing memory table"
        );
        tables.insert(snapshot.name.clone(), snapshot.clone());

        Ok(())
    }

    async fn close(self) {
        self.inner
            .lock()
            .await
            .operations
            .push(DestinationOperation::Close(self.database_name.clone()));
    }
}
