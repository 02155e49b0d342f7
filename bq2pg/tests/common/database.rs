use bq2pg::clients::postgres::PostgresConnector;
use bq2pg_config::shared::{DestinationConfig, IntoConnectOptions, PgConnectionConfig, TlsConfig};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

/// Returns the [`PgConnectionConfig`] of the administrative database of the local Postgres
/// instance.
///
/// Connects to `postgres:postgres@localhost:5432` unless overridden with the
/// `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME` and
/// `TESTS_DATABASE_PASSWORD` environment variables.
pub fn local_pg_connection_config() -> PgConnectionConfig {
    let env = |name: &str, default: &str| std::env::var(name).unwrap_or_else(|_| default.to_owned());

    PgConnectionConfig {
        host: env("TESTS_DATABASE_HOST", "localhost"),
        port: env("TESTS_DATABASE_PORT", "5432")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a port number"),
        name: "postgres".to_owned(),
        username: env("TESTS_DATABASE_USERNAME", "postgres"),
        password: Some(env("TESTS_DATABASE_PASSWORD", "postgres").into()),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// Returns a random database name so that tests never share a database.
pub fn random_database_name() -> String {
    format!("bq2pg_test_{}", Uuid::new_v4().simple())
}

/// Builds a [`PostgresConnector`] for the local Postgres instance.
pub fn local_connector(config: &PgConnectionConfig) -> PostgresConnector {
    PostgresConnector::new(
        &DestinationConfig::default(),
        &config.host,
        config.port,
        &config.username,
        config.password.clone(),
    )
}

/// Opens a pool on `database_name` to inspect what was written.
///
/// # Panics
/// Panics if the connection fails.
pub async fn connect_to_database(config: &PgConnectionConfig, database_name: &str) -> PgPool {
    let config = PgConnectionConfig {
        name: database_name.to_owned(),
        ..config.clone()
    };

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres")
}

/// Drops a database after terminating the connections still open on it.
///
/// # Panics
/// Panics if any database operation fails.
pub async fn drop_pg_database(config: &PgConnectionConfig, database_name: &str) {
    let mut connection = PgConnection::connect_with(&config.with_db())
        .await
        .expect("Failed to connect to Postgres");

    connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{database_name}'
            and pid <> pg_backend_pid();"#
        ))
        .await
        .expect("Failed to terminate database connections");

    connection
        .execute(&*format!(r#"drop database if exists "{database_name}";"#))
        .await
        .expect("Failed to destroy database");
}
