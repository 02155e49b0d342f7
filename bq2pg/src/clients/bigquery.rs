use async_trait::async_trait;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::auth::Authenticator;
use gcp_bigquery_client::client_builder::ClientBuilder;
use gcp_bigquery_client::dataset;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_field_schema::TableFieldSchema;
use gcp_bigquery_client::model::table_row::TableRow as BigQueryRow;
use gcp_bigquery_client::model::table_schema::TableSchema;
use gcp_bigquery_client::table;
use gcp_bigquery_client::yup_oauth2::authenticator::DefaultAuthenticator;
use gcp_bigquery_client::yup_oauth2::{
    ServiceAccountAuthenticator, ServiceAccountKey, parse_service_account_key,
};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Once};
use tracing::{debug, info};

use crate::bail;
use crate::conversions::FieldDecoder;
use crate::error::{ErrorKind, ReplicateError, ReplicateResult};
use crate::replicate_error;
use crate::source::{Source, SourceConnector};
use crate::types::{ColumnSchema, TableRow, TableSnapshot};

/// How long a single `getQueryResults` call waits server-side for the job to finish.
const QUERY_RESULTS_TIMEOUT_MS: i32 = 10_000;

/// OAuth scopes requested with every service account key. Drive access is needed to query
/// tables backed by Sheets or Drive files.
const BIGQUERY_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/drive",
];

static INIT_CRYPTO: Once = Once::new();

pub type BigQueryProjectId = String;

/// Installs aws-lc-rs as the process wide rustls provider used by the BigQuery client.
///
/// Does nothing when a provider has already been installed.
pub fn install_crypto_provider_once() {
    INIT_CRYPTO.call_once(|| {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// A BigQuery client bound to the project of the service account it authenticated with.
pub struct BigQueryClient {
    project_id: BigQueryProjectId,
    client: Client,
}

impl BigQueryClient {
    /// Creates a new [`BigQueryClient`] from a service account key file.
    ///
    /// The project is taken from the `project_id` of the key.
    pub async fn new_with_key_path(sa_key_path: &Path) -> ReplicateResult<BigQueryClient> {
        let sa_key = tokio::fs::read(sa_key_path).await?;

        Self::new_with_key(&sa_key).await
    }

    /// Creates a new [`BigQueryClient`] from the contents of a service account key.
    pub async fn new_with_key(sa_key: &[u8]) -> ReplicateResult<BigQueryClient> {
        install_crypto_provider_once();

        let sa_key = parse_service_account_key(sa_key).map_err(|err| {
            replicate_error!(
                ErrorKind::SourceAuthenticationFailed,
                "Invalid BigQuery service account key",
                err
            )
        })?;

        let Some(project_id) = sa_key.project_id.clone() else {
            bail!(
                ErrorKind::SourceAuthenticationFailed,
                "Service account key has no project id"
            );
        };

        let authenticator = ScopedAuthenticator::new(sa_key, &BIGQUERY_SCOPES).await?;
        let client = ClientBuilder::new()
            .build_from_authenticator(Arc::new(authenticator))
            .await
            .map_err(bq_error_to_replicate_error)?;

        Ok(BigQueryClient { project_id, client })
    }

    /// Returns the full BigQuery table name in the form `` `project_id.dataset_id.table_id` ``.
    pub fn full_table_name(&self, dataset_id: &str, table_id: &str) -> String {
        full_table_name(&self.project_id, dataset_id, table_id)
    }

    /// Lists the datasets of the project, which proves that the credentials are accepted and
    /// the API is reachable.
    pub async fn verify_connection(&self) -> ReplicateResult<()> {
        self.client
            .dataset()
            .list(&self.project_id, dataset::ListOptions::default())
            .await
            .map_err(bq_error_to_replicate_error)?;

        debug!(project_id = %self.project_id, "connected to bigquery");

        Ok(())
    }

    /// Lists the ids of all tables in a dataset, following page tokens.
    pub async fn list_table_ids(&self, dataset_id: &str) -> ReplicateResult<Vec<String>> {
        let mut table_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut options = table::ListOptions::default();
            if let Some(token) = page_token.take() {
                options = options.page_token(token);
            }

            let table_list = self
                .client
                .table()
                .list(&self.project_id, dataset_id, options)
                .await
                .map_err(bq_error_to_replicate_error)?;

            table_ids.extend(
                table_list
                    .tables
                    .unwrap_or_default()
                    .into_iter()
                    .map(|table| table.table_reference.table_id),
            );

            match table_list.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(table_ids)
    }

    /// Runs `SELECT *` over a table and materializes every page of the result.
    pub async fn select_all(
        &self,
        dataset_id: &str,
        table_id: &str,
    ) -> ReplicateResult<TableSnapshot> {
        let query = format!("SELECT * FROM {}", self.full_table_name(dataset_id, table_id));
        let response = self
            .client
            .job()
            .query(&self.project_id, QueryRequest::new(query))
            .await
            .map_err(bq_error_to_replicate_error)?;

        let mut page = ResultPage {
            complete: response.job_complete.unwrap_or(false),
            schema: response.schema,
            rows: response.rows,
            page_token: response.page_token,
        };

        let Some(job_reference) = response.job_reference else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "BigQuery query returned no job reference",
                table_id
            );
        };
        let Some(job_id) = job_reference.job_id else {
            bail!(
                ErrorKind::SourceQueryFailed,
                "BigQuery query returned no job id",
                table_id
            );
        };

        let mut columns: Option<(Vec<ColumnSchema>, Vec<FieldDecoder>)> = None;
        let mut rows = Vec::new();

        loop {
            if page.complete {
                if columns.is_none()
                    && let Some(schema) = page.schema.take()
                {
                    columns = Some(columns_from_bigquery(&schema)?);
                }
                if let Some((_, decoders)) = &columns {
                    for row in page.rows.take().unwrap_or_default() {
                        rows.push(convert_row(decoders, row)?);
                    }
                }

                if page.page_token.as_deref().is_none_or(str::is_empty) {
                    break;
                }
            }

            let parameters = GetQueryResultsParameters {
                location: job_reference.location.clone(),
                page_token: page.page_token.take(),
                timeout_ms: Some(QUERY_RESULTS_TIMEOUT_MS),
                ..Default::default()
            };
            let response = self
                .client
                .job()
                .get_query_results(&self.project_id, &job_id, parameters)
                .await
                .map_err(bq_error_to_replicate_error)?;

            page = ResultPage {
                complete: response.job_complete.unwrap_or(false),
                schema: response.schema,
                rows: response.rows,
                page_token: response.page_token,
            };
        }

        let Some((column_schemas, _)) = columns else {
            bail!(
                ErrorKind::SourceSchemaError,
                "BigQuery result has no schema",
                table_id
            );
        };

        info!(table_id, rows = rows.len(), "read bigquery table");

        Ok(TableSnapshot::new(table_id, column_schemas).with_rows(rows))
    }
}

impl fmt::Debug for BigQueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BigQueryClient")
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl Source for BigQueryClient {
    async fn list_tables(&self, dataset_id: &str) -> ReplicateResult<Vec<String>> {
        self.list_table_ids(dataset_id).await
    }

    async fn read_table(&self, dataset_id: &str, table_id: &str) -> ReplicateResult<TableSnapshot> {
        self.select_all(dataset_id, table_id).await
    }
}

/// Service account authenticator requesting an explicit set of OAuth scopes.
#[derive(Clone)]
struct ScopedAuthenticator {
    auth: DefaultAuthenticator,
    scopes: Vec<String>,
}

impl ScopedAuthenticator {
    async fn new(sa_key: ServiceAccountKey, scopes: &[&str]) -> ReplicateResult<Self> {
        let auth = ServiceAccountAuthenticator::builder(sa_key)
            .build()
            .await
            .map_err(|err| {
                bq_error_to_replicate_error(BQError::InvalidServiceAccountAuthenticator(err))
            })?;

        Ok(ScopedAuthenticator {
            auth,
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
        })
    }
}

#[async_trait]
impl Authenticator for ScopedAuthenticator {
    async fn access_token(&self) -> Result<String, BQError> {
        let token = self.auth.token(self.scopes.as_slice()).await?;

        token.token().map(str::to_string).ok_or(BQError::NoToken)
    }
}

/// Connects to BigQuery with the service account key of each job.
#[derive(Debug, Clone, Default)]
pub struct BigQueryConnector;

impl SourceConnector for BigQueryConnector {
    type Source = BigQueryClient;

    async fn connect(&self, credential_path: &Path) -> ReplicateResult<BigQueryClient> {
        let client = BigQueryClient::new_with_key_path(credential_path).await?;
        client.verify_connection().await?;

        Ok(client)
    }
}

/// One response of `jobs.query` or `jobs.getQueryResults`.
struct ResultPage {
    complete: bool,
    schema: Option<TableSchema>,
    rows: Option<Vec<BigQueryRow>>,
    page_token: Option<String>,
}

fn full_table_name(project_id: &str, dataset_id: &str, table_id: &str) -> String {
    format!("`{project_id}.{dataset_id}.{table_id}`")
}

/// Returns the column schemas of a result together with the decoders of its fields.
fn columns_from_bigquery(
    schema: &TableSchema,
) -> ReplicateResult<(Vec<ColumnSchema>, Vec<FieldDecoder>)> {
    let Some(fields) = &schema.fields else {
        bail!(ErrorKind::SourceSchemaError, "BigQuery schema has no fields");
    };

    let mut column_schemas = Vec::with_capacity(fields.len());
    let mut decoders = Vec::with_capacity(fields.len());
    for field in fields {
        let decoder = field_decoder(field)?;
        let nullable = !field
            .mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("REQUIRED"));

        column_schemas.push(ColumnSchema::new(
            field.name.clone(),
            decoder.column_type(),
            nullable,
        ));
        decoders.push(decoder);
    }

    Ok((column_schemas, decoders))
}

fn field_decoder(field: &TableFieldSchema) -> ReplicateResult<FieldDecoder> {
    let type_name = match serde_json::to_value(&field.r#type)? {
        Value::String(type_name) => type_name,
        other => bail!(
            ErrorKind::SourceSchemaError,
            "Unexpected BigQuery field type",
            other
        ),
    };

    let sub_fields = field
        .fields
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|sub_field| -> ReplicateResult<(String, FieldDecoder)> {
            Ok((sub_field.name.clone(), field_decoder(sub_field)?))
        })
        .collect::<ReplicateResult<Vec<_>>>()?;

    Ok(FieldDecoder::from_bigquery(
        &type_name,
        field.mode.as_deref(),
        sub_fields,
    ))
}

fn convert_row(decoders: &[FieldDecoder], row: BigQueryRow) -> ReplicateResult<TableRow> {
    let cells = row.columns.unwrap_or_default();
    if cells.len() != decoders.len() {
        bail!(
            ErrorKind::InvalidData,
            "BigQuery row does not match the result schema",
            format!("expected {} cells, got {}", decoders.len(), cells.len())
        );
    }

    let values = decoders
        .iter()
        .zip(cells)
        .map(|(decoder, cell)| decoder.decode(cell.value.as_ref()))
        .collect::<ReplicateResult<Vec<_>>>()?;

    Ok(TableRow::new(values))
}

/// Converts BigQuery errors to [`ReplicateError`]s.
fn bq_error_to_replicate_error(err: BQError) -> ReplicateError {
    let (kind, description) = match &err {
        BQError::InvalidServiceAccountKey(_) => (
            ErrorKind::SourceAuthenticationFailed,
            "Invalid BigQuery service account key",
        ),
        BQError::InvalidServiceAccountAuthenticator(_) => (
            ErrorKind::SourceAuthenticationFailed,
            "Invalid BigQuery service account authenticator",
        ),
        BQError::AuthError(_) => (
            ErrorKind::SourceAuthenticationFailed,
            "BigQuery authentication error",
        ),
        BQError::YupAuthError(_) => (
            ErrorKind::SourceAuthenticationFailed,
            "BigQuery OAuth authentication error",
        ),
        BQError::NoToken => (
            ErrorKind::SourceAuthenticationFailed,
            "BigQuery authentication token missing",
        ),
        BQError::RequestError(_) => (ErrorKind::SourceConnectionFailed, "BigQuery request failed"),
        BQError::ResponseError { .. } => {
            (ErrorKind::SourceQueryFailed, "BigQuery response error")
        }
        BQError::SerializationError(_) => (
            ErrorKind::DeserializationError,
            "BigQuery JSON deserialization error",
        ),
        _ => (ErrorKind::Unknown, "BigQuery error"),
    };

    replicate_error!(kind, description, err)
}
