use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const BQ2PG_JOBS_TOTAL: &str = "bq2pg_jobs_total";
pub const BQ2PG_TABLES_REPLICATED_TOTAL: &str = "bq2pg_tables_replicated_total";
pub const BQ2PG_ROWS_REPLICATED_TOTAL: &str = "bq2pg_rows_replicated_total";
pub const BQ2PG_TABLE_COPY_DURATION_SECONDS: &str = "bq2pg_table_copy_duration_seconds";

/// Label carrying the [`crate::job::JobStatus`] of a finished job.
pub const STATUS_LABEL: &str = "status";

/// Register metrics emitted by the replicator. It is safe to call
/// this method multiple times, the metrics are only described once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            BQ2PG_JOBS_TOTAL,
            Unit::Count,
            "Replication jobs processed, labeled by status"
        );

        describe_counter!(
            BQ2PG_TABLES_REPLICATED_TOTAL,
            Unit::Count,
            "Tables copied from BigQuery into PostgreSQL"
        );

        describe_counter!(
            BQ2PG_ROWS_REPLICATED_TOTAL,
            Unit::Count,
            "Rows copied from BigQuery into PostgreSQL"
        );

        describe_histogram!(
            BQ2PG_TABLE_COPY_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken to read a table from BigQuery and write it to PostgreSQL"
        );
    });
}
