use actix_web::http::StatusCode;
use actix_web::{HttpResponse, Responder, ResponseError, post, web};
use bq2pg::clients::bigquery::BigQueryConnector;
use bq2pg::clients::postgres::PostgresConnector;
use bq2pg::job::{JobResult, JobStatus};
use bq2pg::replicator::Replicator;
use bq2pg_config::SerializableSecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::config::ApiConfig;
use crate::routes::ErrorMessage;

const PG_USER: &str = "PG_USER";
const PG_PASSWORD: &str = "PG_PASSWORD";
const PG_HOST: &str = "PG_HOST";
const PG_PORT: &str = "PG_PORT";
const REPLICATION_CONFIGS: &str = "REPLICATION_CONFIGS";

/// Parameters every request has to carry, in the order they are reported when missing.
const REQUIRED_PARAMETERS: [&str; 5] = [PG_USER, PG_PASSWORD, PG_HOST, PG_PORT, REPLICATION_CONFIGS];

#[derive(Debug, Error)]
pub enum ReplicateRequestError {
    #[error("Missing required parameters: {}", .0.join(", "))]
    MissingParameters(Vec<&'static str>),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
}

impl ResponseError for ReplicateRequestError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorMessage {
            error: self.to_string(),
        })
    }
}

/// A replication request.
///
/// Built from the raw JSON body with [`TryFrom`] so that every missing parameter can be
/// reported at once and `PG_PORT` can be given as a string or a number.
#[derive(Debug, Clone, ToSchema)]
pub struct ReplicateRequest {
    #[serde(rename = "PG_USER")]
    #[schema(example = "loader", required = true)]
    pub pg_user: String,
    #[serde(rename = "PG_PASSWORD")]
    #[schema(value_type = String, example = "secret", required = true)]
    pub pg_password: Option<SerializableSecretString>,
    #[serde(rename = "PG_HOST")]
    #[schema(example = "db.internal", required = true)]
    pub pg_host: String,
    #[serde(rename = "PG_PORT")]
    #[schema(value_type = String, example = "5432", required = true)]
    pub pg_port: u16,
    /// Comma separated jobs, each `credential_path|dataset_id|database_name`.
    #[serde(rename = "REPLICATION_CONFIGS")]
    #[schema(example = "keys/sa.json|sales|analytics,keys/sa.json|marketing|marketing", required = true)]
    pub replication_configs: String,
}

impl TryFrom<Value> for ReplicateRequest {
    type Error = ReplicateRequestError;

    fn try_from(body: Value) -> Result<Self, Self::Error> {
        let Value::Object(params) = body else {
            return Err(ReplicateRequestError::MissingParameters(
                REQUIRED_PARAMETERS.to_vec(),
            ));
        };

        let missing: Vec<&'static str> = REQUIRED_PARAMETERS
            .into_iter()
            .filter(|name| !params.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(ReplicateRequestError::MissingParameters(missing));
        }

        Ok(ReplicateRequest {
            pg_user: string_param(&params, PG_USER)?,
            pg_password: match &params[PG_PASSWORD] {
                Value::Null => None,
                Value::String(password) => Some(password.as_str().into()),
                _ => {
                    return Err(ReplicateRequestError::InvalidParameter {
                        name: PG_PASSWORD,
                        reason: "expected a string",
                    });
                }
            },
            pg_host: string_param(&params, PG_HOST)?,
            pg_port: port_param(&params[PG_PORT])?,
            replication_configs: string_param(&params, REPLICATION_CONFIGS)?,
        })
    }
}

fn string_param(
    params: &Map<String, Value>,
    name: &'static str,
) -> Result<String, ReplicateRequestError> {
    match &params[name] {
        Value::String(value) => Ok(value.clone()),
        _ => Err(ReplicateRequestError::InvalidParameter {
            name,
            reason: "expected a string",
        }),
    }
}

fn port_param(value: &Value) -> Result<u16, ReplicateRequestError> {
    let port = match value {
        Value::String(port) => port.trim().parse::<u16>().ok(),
        Value::Number(port) => port.as_u64().and_then(|port| u16::try_from(port).ok()),
        _ => None,
    };

    match port {
        Some(port) if port > 0 => Ok(port),
        _ => Err(ReplicateRequestError::InvalidParameter {
            name: PG_PORT,
            reason: "expected a port number between 1 and 65535",
        }),
    }
}

/// Outcome of one replication job.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobResultResponse {
    #[schema(example = "keys/sa.json|sales|analytics")]
    pub config: String,
    #[schema(value_type = String, example = "success")]
    pub status: JobStatus,
    #[schema(example = "3 tables replicated")]
    pub message: String,
}

impl From<JobResult> for JobResultResponse {
    fn from(result: JobResult) -> Self {
        Self {
            config: result.config,
            status: result.status,
            message: result.message,
        }
    }
}

#[utoipa::path(
    summary = "Replicate BigQuery datasets into PostgreSQL",
    description = "Runs every job of REPLICATION_CONFIGS in order. Each job copies all tables of a BigQuery dataset into a PostgreSQL database, creating the database when needed and replacing existing tables. Failed jobs are reported in the result list and do not stop the remaining jobs.",
    request_body = ReplicateRequest,
    responses(
        (status = 200, description = "One result per job, in request order", body = Vec<JobResultResponse>),
        (status = 400, description = "Missing or invalid parameters", body = ErrorMessage),
    ),
    tag = "Replication"
)]
#[post("/replicate")]
pub async fn replicate(
    config: web::Data<ApiConfig>,
    body: web::Bytes,
) -> Result<impl Responder, ReplicateRequestError> {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request = ReplicateRequest::try_from(body)?;

    info!(
        host = request.pg_host,
        port = request.pg_port,
        username = request.pg_user,
        "received replication request"
    );

    let destination_connector = PostgresConnector::new(
        &config.destination,
        &request.pg_host,
        request.pg_port,
        &request.pg_user,
        request.pg_password.clone(),
    );
    let replicator = Replicator::new(BigQueryConnector, destination_connector);

    let results: Vec<JobResultResponse> = replicator
        .run(&request.replication_configs)
        .await
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(web::Json(results))
}
