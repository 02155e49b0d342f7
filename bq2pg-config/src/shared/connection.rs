use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Connection parameters for one Postgres database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port the Postgres server listens on.
    pub port: u16,
    /// Name of the database to connect to.
    pub name: String,
    /// User to authenticate as.
    pub username: String,
    /// Password of [`PgConnectionConfig::username`], redacted in debug output.
    pub password: Option<SerializableSecretString>,
    /// TLS settings for the connection.
    pub tls: TlsConfig,
}

/// TLS settings for Postgres connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    /// Whether TLS is required.
    #[serde(default)]
    pub enabled: bool,
}

impl TlsConfig {
    /// Fails with [`ValidationError::MissingTrustedRootCerts`] when TLS is enabled without
    /// any root certificates to verify the server against.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Conversion of [`PgConnectionConfig`] into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database, in which case the server falls
    /// back to the database named like the user.
    fn without_db(&self) -> Output;

    /// Options for the database named in the configuration.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username);

        let options = if self.tls.enabled {
            options
                .ssl_mode(PgSslMode::VerifyFull)
                .ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes())
        } else {
            options.ssl_mode(PgSslMode::Prefer)
        };

        match &self.password {
            Some(password) => options.password(password.expose_secret()),
            None => options,
        }
    }

    fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.name)
    }
}
