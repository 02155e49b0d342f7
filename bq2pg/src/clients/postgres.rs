use bq2pg_config::SerializableSecretString;
use bq2pg_config::shared::{DestinationConfig, IntoConnectOptions, PgConnectionConfig};
use sqlx::postgres::PgPoolOptions;
use sqlx::query_builder::Separated;
use sqlx::{Connection, Executor, PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::destination::{Destination, DestinationConnector};
use crate::bail;
use crate::error::{ErrorKind, ReplicateResult};
use crate::types::{Cell, ColumnSchema, ColumnType, TableRow, TableSnapshot};

/// Upper bound of bind parameters in one Postgres statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Longest identifier Postgres keeps without truncating it (`NAMEDATALEN - 1`).
const MAX_IDENTIFIER_BYTES: usize = 63;

/// Quotes an identifier so that it can be embedded in SQL as is.
pub fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Rejects database names Postgres would silently truncate, since the truncated database
/// could never be found again by its full name.
fn validate_database_name(database_name: &str) -> ReplicateResult<()> {
    if database_name.len() > MAX_IDENTIFIER_BYTES {
        bail!(
            ErrorKind::ConfigError,
            "Database name is too long",
            format!(
                "{} bytes, at most {MAX_IDENTIFIER_BYTES} are allowed",
                database_name.len()
            )
        );
    }

    Ok(())
}

/// Provisions and connects to databases on one Postgres server.
///
/// Every database of a request lives on the same server and is accessed with the same
/// credentials, only the database name changes.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    admin: PgConnectionConfig,
    max_connections: u32,
}

impl PostgresConnector {
    pub fn new(
        config: &DestinationConfig,
        host: &str,
        port: u16,
        username: &str,
        password: Option<SerializableSecretString>,
    ) -> Self {
        Self {
            admin: config.admin_connection(host, port, username, password),
            max_connections: config.max_connections,
        }
    }

    fn target(&self, database_name: &str) -> PgConnectionConfig {
        PgConnectionConfig {
            name: database_name.to_string(),
            ..self.admin.clone()
        }
    }

    async fn create_database_if_missing(
        connection: &mut PgConnection,
        database_name: &str,
    ) -> ReplicateResult<bool> {
        let exists: bool =
            sqlx::query_scalar("select exists(select 1 from pg_database where datname = $1)")
                .bind(database_name)
                .fetch_one(&mut *connection)
                .await?;
        if exists {
            return Ok(false);
        }

        connection
            .execute(&*format!(
                "create database {};",
                quote_identifier(database_name)
            ))
            .await?;

        Ok(true)
    }
}

impl DestinationConnector for PostgresConnector {
    type Destination = PostgresDestination;

    async fn ensure_database(&self, database_name: &str) -> ReplicateResult<bool> {
        validate_database_name(database_name)?;

        let mut connection = PgConnection::connect_with(&self.admin.with_db()).await?;

        let result = Self::create_database_if_missing(&mut connection, database_name).await;

        // The administrative connection never outlives the check.
        if let Err(err) = connection.close().await {
            warn!(error = %err, "failed to close the administrative connection");
        }

        if let Ok(true) = result {
            info!(database_name, "created destination database");
        }

        result
    }

    async fn connect(&self, database_name: &str) -> ReplicateResult<PostgresDestination> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(self.target(database_name).with_db())
            .await?;

        sqlx::query("select 1").execute(&pool).await?;
        debug!(database_name, "connected to destination database");

        Ok(PostgresDestination {
            database_name: database_name.to_string(),
            pool,
        })
    }
}

/// A pooled connection to one destination database.
#[derive(Debug, Clone)]
pub struct PostgresDestination {
    database_name: String,
    pool: PgPool,
}

impl Destination for PostgresDestination {
    async fn drop_table(&self, table_name: &str) -> ReplicateResult<()> {
        debug!(database_name = %self.database_name, table_name, "dropping table");
        self.pool
            .execute(&*drop_table_statement(table_name))
            .await?;

        Ok(())
    }

    async fn write_snapshot(&self, snapshot: &TableSnapshot) -> ReplicateResult<()> {
        let mut transaction = self.pool.begin().await?;

        (&mut *transaction)
            .execute(&*create_table_statement(
                &snapshot.name,
                &snapshot.column_schemas,
            ))
            .await?;

        for rows in snapshot.rows.chunks(rows_per_statement(snapshot.column_schemas.len())) {
            insert_statement(&snapshot.name, &snapshot.column_schemas, rows)
                .build()
                .execute(&mut *transaction)
                .await?;
        }

        transaction.commit().await?;

        Ok(())
    }

    async fn close(self) {
        self.pool.close().await;
    }
}

fn drop_table_statement(table_name: &str) -> String {
    format!("drop table if exists {};", quote_identifier(table_name))
}

fn create_table_statement(table_name: &str, column_schemas: &[ColumnSchema]) -> String {
    let columns = column_schemas
        .iter()
        .map(|column_schema| {
            let mut spec = format!(
                "{} {}",
                quote_identifier(&column_schema.name),
                column_schema.typ.postgres_type()
            );
            if !column_schema.nullable {
                spec.push_str(" not null");
            }
            spec
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("create table {} ({columns});", quote_identifier(table_name))
}

fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).max(1)
}

fn insert_statement<'a>(
    table_name: &str,
    column_schemas: &[ColumnSchema],
    rows: &'a [TableRow],
) -> QueryBuilder<'a, Postgres> {
    let columns = column_schemas
        .iter()
        .map(|column_schema| quote_identifier(&column_schema.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "insert into {} ({columns}) ",
        quote_identifier(table_name)
    ));
    builder.push_values(rows, |mut separated, row| {
        for (column_schema, cell) in column_schemas.iter().zip(&row.values) {
            push_cell(&mut separated, column_schema.typ, cell);
        }
    });

    builder
}

/// Binds one cell. Nulls are bound with the column's type so that the server does not have
/// to infer it.
fn push_cell<'qb, 'args>(
    separated: &mut Separated<'qb, 'args, Postgres, &'static str>,
    typ: ColumnType,
    cell: &'args Cell,
) {
    match cell {
        Cell::Null => push_null(separated, typ),
        Cell::Bool(value) => {
            separated.push_bind(*value);
        }
        Cell::I64(value) => {
            separated.push_bind(*value);
        }
        Cell::F64(value) => {
            separated.push_bind(*value);
        }
        Cell::Numeric(value) => {
            separated.push_bind(value.as_str());
            separated.push_unseparated("::numeric");
        }
        Cell::String(value) => {
            separated.push_bind(value.as_str());
        }
        Cell::Bytes(value) => {
            separated.push_bind(value.as_slice());
        }
        Cell::Date(value) => {
            separated.push_bind(*value);
        }
        Cell::Time(value) => {
            separated.push_bind(*value);
        }
        Cell::DateTime(value) => {
            separated.push_bind(*value);
        }
        Cell::Timestamp(value) => {
            separated.push_bind(*value);
        }
        Cell::Json(value) => {
            separated.push_bind(value);
        }
    }
}

fn push_null(separated: &mut Separated<'_, '_, Postgres, &'static str>, typ: ColumnType) {
    match typ {
        ColumnType::Bool => separated.push_bind(None::<bool>),
        ColumnType::Int64 => separated.push_bind(None::<i64>),
        ColumnType::Float64 => separated.push_bind(None::<f64>),
        ColumnType::Numeric => separated
            .push_bind(None::<String>)
            .push_unseparated("::numeric"),
        ColumnType::String => separated.push_bind(None::<String>),
        ColumnType::Bytes => separated.push_bind(None::<Vec<u8>>),
        ColumnType::Date => separated.push_bind(None::<chrono::NaiveDate>),
        ColumnType::Time => separated.push_bind(None::<chrono::NaiveTime>),
        ColumnType::DateTime => separated.push_bind(None::<chrono::NaiveDateTime>),
        ColumnType::Timestamp => {
            separated.push_bind(None::<chrono::DateTime<chrono::Utc>>)
        }
        ColumnType::Json => separated.push_bind(None::<serde_json::Value>),
    };
}
