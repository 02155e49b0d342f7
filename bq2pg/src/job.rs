use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::error::ReplicateError;

/// Separator between the jobs of a replication config list.
const JOB_SEPARATOR: char = ',';

/// Separator between the fields of one job.
const FIELD_SEPARATOR: char = '|';

/// One dataset to copy: `credential_path|dataset_id|database_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub credential_path: PathBuf,
    pub dataset_id: String,
    pub database_name: String,
}

impl JobSpec {
    /// Parses one job. The segment is trimmed and must split into exactly three fields.
    pub fn parse(segment: &str) -> Result<JobSpec, JobError> {
        let fields: Vec<&str> = segment.trim().split(FIELD_SEPARATOR).collect();
        let [credential_path, dataset_id, database_name] = fields.as_slice() else {
            return Err(JobError::InvalidFormat);
        };

        Ok(JobSpec {
            credential_path: PathBuf::from(credential_path),
            dataset_id: dataset_id.to_string(),
            database_name: database_name.to_string(),
        })
    }
}

/// Splits a replication config list into its segments, each paired with its parsed job.
///
/// Every segment yields an entry so that results can be reported in input order, including
/// for segments that failed to parse.
pub fn parse_replication_configs(configs: &str) -> Vec<(&str, Result<JobSpec, JobError>)> {
    configs
        .split(JOB_SEPARATOR)
        .map(|segment| (segment, JobSpec::parse(segment)))
        .collect()
}

/// The stage a job failed at together with the underlying error.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid format")]
    InvalidFormat,

    #[error("credential not found: {}", .0.display())]
    CredentialNotFound(PathBuf),

    #[error("BigQuery error: {0}")]
    Warehouse(ReplicateError),

    #[error("error verifying/creating database: {0}")]
    DatabaseProvisioning(ReplicateError),

    #[error("PostgreSQL error: {0}")]
    DatabaseConnection(ReplicateError),

    #[error("replication error: {0}")]
    Replication(ReplicateError),
}

impl JobError {
    /// Short stage name used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::InvalidFormat => "parse",
            JobError::CredentialNotFound(_) => "credential",
            JobError::Warehouse(_) => "warehouse",
            JobError::DatabaseProvisioning(_) => "provisioning",
            JobError::DatabaseConnection(_) => "connection",
            JobError::Replication(_) => "replication",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one segment of the replication config list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// The segment exactly as it appeared in the request.
    pub config: String,
    pub status: JobStatus,
    pub message: String,
}

impl JobResult {
    pub fn success(config: impl Into<String>, tables_replicated: usize) -> Self {
        Self {
            config: config.into(),
            status: JobStatus::Success,
            message: format!("{tables_replicated} tables replicated"),
        }
    }

    pub fn failure(config: impl Into<String>, err: &JobError) -> Self {
        Self {
            config: config.into(),
            status: JobStatus::Error,
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::replicate_error;

    #[test]
    fn parses_three_fields() {
        let spec = JobSpec::parse(" keys/sa.json|sales|analytics ").unwrap();
        assert_eq!(spec.credential_path, PathBuf::from("keys/sa.json"));
        assert_eq!(spec.dataset_id, "sales");
        assert_eq!(spec.database_name, "analytics");
    }

    #[test]
    fn wrong_field_counts_are_invalid() {
        for segment in ["", "a|b", "a|b|c|d", "no-separators"] {
            assert!(
                matches!(JobSpec::parse(segment), Err(JobError::InvalidFormat)),
                "segment {segment:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_fields_are_accepted() {
        let spec = JobSpec::parse("sa.json||db").unwrap();
        assert_eq!(spec.dataset_id, "");
    }

    #[test]
    fn configs_keep_input_order_and_original_text() {
        let jobs = parse_replication_configs("a.json|ds1|db1, broken ,b.json|ds2|db2");
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].0, "a.json|ds1|db1");
        assert_eq!(jobs[1].0, " broken ");
        assert!(matches!(jobs[1].1, Err(JobError::InvalidFormat)));
        assert_eq!(jobs[2].1.as_ref().unwrap().dataset_id, "ds2");
    }

    #[test]
    fn error_messages_name_the_stage() {
        assert_eq!(JobError::InvalidFormat.to_string(), "invalid format");
        assert_eq!(
            JobError::CredentialNotFound(PathBuf::from("bad.json")).to_string(),
            "credential not found: bad.json"
        );

        let err = replicate_error!(ErrorKind::SourceConnectionFailed, "BigQuery request failed");
        assert_eq!(
            JobError::Warehouse(err).to_string(),
            "BigQuery error: SourceConnectionFailed: BigQuery request failed"
        );
    }

    #[test]
    fn results_serialize_with_lowercase_status() {
        let result = JobResult::success("a.json|ds|db", 3);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "config": "a.json|ds|db",
                "status": "success",
                "message": "3 tables replicated"
            })
        );

        let failure = JobResult::failure("x", &JobError::InvalidFormat);
        assert_eq!(failure.status, JobStatus::Error);
        assert!(!failure.is_success());
    }
}
