use metrics::{counter, histogram};
use std::time::Instant;
use tracing::{Instrument, error, info, info_span};

use crate::destination::{Destination, DestinationConnector};
use crate::error::ReplicateResult;
use crate::job::{JobError, JobResult, JobSpec, parse_replication_configs};
use crate::metrics::{
    BQ2PG_JOBS_TOTAL, BQ2PG_ROWS_REPLICATED_TOTAL, BQ2PG_TABLE_COPY_DURATION_SECONDS,
    BQ2PG_TABLES_REPLICATED_TOTAL, STATUS_LABEL, register_metrics,
};
use crate::source::{Source, SourceConnector};

/// Copies BigQuery datasets into Postgres databases, one job after the other.
///
/// A job that fails is reported in its result and never prevents the following jobs from
/// running.
#[derive(Debug, Clone)]
pub struct Replicator<S, D> {
    source_connector: S,
    destination_connector: D,
}

impl<S, D> Replicator<S, D>
where
    S: SourceConnector,
    D: DestinationConnector,
{
    pub fn new(source_connector: S, destination_connector: D) -> Self {
        register_metrics();

        Self {
            source_connector,
            destination_connector,
        }
    }

    /// Runs every job of a comma separated replication config list.
    ///
    /// Returns one result per segment, in input order.
    pub async fn run(&self, replication_configs: &str) -> Vec<JobResult> {
        let jobs = parse_replication_configs(replication_configs);
        info!(jobs = jobs.len(), "starting replication");

        let mut results = Vec::with_capacity(jobs.len());
        for (config, job) in jobs {
            let span = info_span!("replication_job", config);

            let outcome = match job {
                Ok(job) => self.run_job(&job).instrument(span.clone()).await,
                Err(err) => Err(err),
            };

            let result = match outcome {
                Ok(tables_replicated) => {
                    info!(parent: &span, tables_replicated, "replication job succeeded");
                    JobResult::success(config, tables_replicated)
                }
                Err(err) => {
                    error!(parent: &span, stage = err.stage(), error = %err, "replication job failed");
                    JobResult::failure(config, &err)
                }
            };

            counter!(BQ2PG_JOBS_TOTAL, STATUS_LABEL => result.status.as_str()).increment(1);
            results.push(result);
        }

        results
    }

    async fn run_job(&self, job: &JobSpec) -> Result<usize, JobError> {
        if !matches!(tokio::fs::try_exists(&job.credential_path).await, Ok(true)) {
            return Err(JobError::CredentialNotFound(job.credential_path.clone()));
        }

        let source = self
            .source_connector
            .connect(&job.credential_path)
            .await
            .map_err(JobError::Warehouse)?;

        let created = self
            .destination_connector
            .ensure_database(&job.database_name)
            .await
            .map_err(JobError::DatabaseProvisioning)?;
        info!(database_name = %job.database_name, created, "destination database ready");

        let destination = self
            .destination_connector
            .connect(&job.database_name)
            .await
            .map_err(JobError::DatabaseConnection)?;

        let result = replicate_dataset(&source, &destination, &job.dataset_id).await;
        destination.close().await;

        result.map_err(JobError::Replication)
    }
}

/// Drops every table of the dataset from the destination, then copies the tables one by one.
///
/// The dataset is listed once for each phase. Returns the number of tables of the second
/// listing.
async fn replicate_dataset<S, D>(
    source: &S,
    destination: &D,
    dataset_id: &str,
) -> ReplicateResult<usize>
where
    S: Source,
    D: Destination,
{
    for table_id in source.list_tables(dataset_id).await? {
        destination.drop_table(&table_id).await?;
    }

    let table_ids = source.list_tables(dataset_id).await?;
    for table_id in &table_ids {
        let started = Instant::now();

        let snapshot = source.read_table(dataset_id, table_id).await?;
        destination.write_snapshot(&snapshot).await?;

        let rows = snapshot.num_rows();
        histogram!(BQ2PG_TABLE_COPY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        counter!(BQ2PG_TABLES_REPLICATED_TOTAL).increment(1);
        counter!(BQ2PG_ROWS_REPLICATED_TOTAL).increment(rows as u64);

        info!(table_id, rows, "replicated table");
    }

    Ok(table_ids.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::JobStatus;
    use crate::replicate_error;
    use crate::test_utils::{
        DestinationOperation, MemoryDestinationConnector, MemorySourceConnector,
    };
    use crate::types::{Cell, ColumnSchema, ColumnType, TableRow, TableSnapshot};
    use bq2pg_telemetry::init_test_tracing;
    use tempfile::NamedTempFile;

    fn snapshot(name: &str, ids: &[i64]) -> TableSnapshot {
        TableSnapshot::new(name, vec![ColumnSchema::new("id", ColumnType::Int64, false)])
            .with_rows(
                ids.iter()
                    .map(|id| TableRow::new(vec![Cell::I64(*id)]))
                    .collect(),
            )
    }

    fn credential_file() -> NamedTempFile {
        NamedTempFile::new().unwrap()
    }

    fn config(credential: &NamedTempFile, dataset_id: &str, database_name: &str) -> String {
        format!(
            "{}|{dataset_id}|{database_name}",
            credential.path().display()
        )
    }

    async fn source_with_tables() -> MemorySourceConnector {
        let source = MemorySourceConnector::new();
        source.add_table("sales", snapshot("orders", &[1, 2, 3])).await;
        source.add_table("sales", snapshot("customers", &[10])).await;
        source
    }

    #[tokio::test]
    async fn invalid_segments_make_no_remote_calls() {
        init_test_tracing();

        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source.clone(), destination.clone());

        let results = replicator.run("a|b,a|b|c|d").await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, JobStatus::Error);
            assert_eq!(result.message, "invalid format");
        }
        assert_eq!(results[0].config, "a|b");
        assert!(source.connect_calls().await.is_empty());
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn missing_credential_stops_the_job_before_connecting() {
        init_test_tracing();

        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source.clone(), destination.clone());

        let results = replicator.run("/nonexistent/bad.json|sales|analytics").await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, JobStatus::Error);
        assert_eq!(
            results[0].message,
            "credential not found: /nonexistent/bad.json"
        );
        assert!(source.connect_calls().await.is_empty());
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn replicates_every_table_of_the_dataset() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source.clone(), destination.clone());

        let results = replicator
            .run(&config(&credential, "sales", "analytics"))
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_success());
        assert_eq!(results[0].message, "2 tables replicated");

        let tables = destination.tables("analytics").await;
        assert_eq!(tables, vec![snapshot("customers", &[10]), snapshot("orders", &[1, 2, 3])]);
        assert_eq!(source.list_calls().await, 2);
        assert_eq!(
            source.connect_calls().await,
            vec![credential.path().to_path_buf()]
        );
    }

    #[tokio::test]
    async fn empty_dataset_replicates_zero_tables() {
        init_test_tracing();

        let credential = credential_file();
        let source = MemorySourceConnector::new();
        source.add_dataset("empty").await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source, destination.clone());

        let results = replicator.run(&config(&credential, "empty", "db")).await;

        assert_eq!(results[0].message, "0 tables replicated");
        assert!(destination.has_database("db").await);
    }

    #[tokio::test]
    async fn rerunning_a_job_is_idempotent() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source, destination.clone());
        let configs = config(&credential, "sales", "analytics");

        let first = replicator.run(&configs).await;
        let tables_after_first = destination.tables("analytics").await;
        let second = replicator.run(&configs).await;

        assert_eq!(first, second);
        assert_eq!(destination.tables("analytics").await, tables_after_first);
    }

    #[tokio::test]
    async fn stale_tables_are_dropped_before_writing() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        destination
            .add_table("analytics", snapshot("orders", &[99]))
            .await;
        let replicator = Replicator::new(source, destination.clone());

        let results = replicator
            .run(&config(&credential, "sales", "analytics"))
            .await;
        assert!(results[0].is_success());

        let operations = destination.operations().await;
        let drop_position = operations.iter().position(|operation| {
            *operation
                == DestinationOperation::DropTable {
                    database: "analytics".to_string(),
                    table: "orders".to_string(),
                }
        });
        let write_position = operations.iter().position(|operation| {
            *operation
                == DestinationOperation::WriteSnapshot {
                    database: "analytics".to_string(),
                    table: "orders".to_string(),
                }
        });
        assert!(drop_position.unwrap() < write_position.unwrap());
        assert_eq!(
            operations.last(),
            Some(&DestinationOperation::Close("analytics".to_string()))
        );

        let tables = destination.tables("analytics").await;
        assert!(tables.contains(&snapshot("orders", &[1, 2, 3])));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_job() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source, destination.clone());

        let configs = format!(
            "{},/missing.json|sales|b,broken,{}",
            config(&credential, "unknown", "a"),
            config(&credential, "sales", "c"),
        );
        let results = replicator.run(&configs).await;

        let statuses: Vec<_> = results.iter().map(|result| result.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Error,
                JobStatus::Error,
                JobStatus::Error,
                JobStatus::Success
            ]
        );
        assert!(results[0].message.starts_with("replication error: "));
        assert_eq!(results[1].message, "credential not found: /missing.json");
        assert_eq!(results[2].message, "invalid format");
        assert_eq!(results[3].message, "2 tables replicated");
    }

    #[tokio::test]
    async fn warehouse_failures_skip_the_destination() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        source
            .fail_connect(replicate_error!(
                ErrorKind::SourceAuthenticationFailed,
                "Invalid BigQuery service account key"
            ))
            .await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source, destination.clone());

        let results = replicator
            .run(&config(&credential, "sales", "analytics"))
            .await;

        assert!(results[0].message.starts_with("BigQuery error: "));
        assert!(destination.operations().await.is_empty());
    }

    #[tokio::test]
    async fn destination_failures_are_reported_by_stage() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;

        let destination = MemoryDestinationConnector::new();
        destination
            .fail_provisioning(replicate_error!(
                ErrorKind::DestinationAuthenticationFailed,
                "PostgreSQL authentication failed"
            ))
            .await;
        let results = Replicator::new(source.clone(), destination)
            .run(&config(&credential, "sales", "analytics"))
            .await;
        assert!(
            results[0]
                .message
                .starts_with("error verifying/creating database: ")
        );

        let destination = MemoryDestinationConnector::new();
        destination
            .fail_connect(replicate_error!(
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection error"
            ))
            .await;
        let results = Replicator::new(source, destination)
            .run(&config(&credential, "sales", "analytics"))
            .await;
        assert!(results[0].message.starts_with("PostgreSQL error: "));
    }

    #[tokio::test]
    async fn first_table_failure_aborts_the_job() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        source.fail_read("orders").await;
        let destination = MemoryDestinationConnector::new();
        let replicator = Replicator::new(source, destination.clone());

        let results = replicator
            .run(&config(&credential, "sales", "analytics"))
            .await;

        assert_eq!(results[0].status, JobStatus::Error);
        assert!(results[0].message.starts_with("replication error: "));
        assert!(results[0].message.contains("orders"));
        // `customers` comes after `orders` in the listing and is never written.
        assert!(destination.tables("analytics").await.is_empty());
        assert_eq!(
            destination.operations().await.last(),
            Some(&DestinationOperation::Close("analytics".to_string()))
        );
    }

    #[tokio::test]
    async fn destination_write_failure_stops_the_job() {
        init_test_tracing();

        let credential = credential_file();
        let source = source_with_tables().await;
        let destination = MemoryDestinationConnector::new();
        destination.fail_write("customers").await;
        let replicator = Replicator::new(source, destination.clone());

        let results = replicator
            .run(&config(&credential, "sales", "analytics"))
            .await;

        assert_eq!(results[0].status, JobStatus::Error);
        assert!(results[0].message.starts_with("replication error: "));
        assert!(results[0].message.contains("customers"));
        // Tables copied before the failure stay in place.
        let tables = destination.tables("analytics").await;
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "orders");
        assert_eq!(
            destination.operations().await.last(),
            Some(&DestinationOperation::Close("analytics".to_string()))
        );
    }
}
