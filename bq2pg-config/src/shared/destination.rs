use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::{PgConnectionConfig, TlsConfig, ValidationError};

/// Default database used for the administrative connection.
const DEFAULT_ADMIN_DATABASE: &str = "postgres";

/// Default size of the pool opened against each target database.
const DEFAULT_MAX_CONNECTIONS: u32 = 1;

/// Server side settings applied to every destination database of a request.
///
/// Host, port and credentials come with each request, everything else is configured here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DestinationConfig {
    /// Database the administrative connection is opened against.
    #[serde(default = "default_admin_database")]
    pub admin_database: String,
    /// Maximum connections of the pool opened against the target database.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// TLS settings for both connection roles.
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_admin_database() -> String {
    DEFAULT_ADMIN_DATABASE.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            admin_database: default_admin_database(),
            max_connections: default_max_connections(),
            tls: TlsConfig::default(),
        }
    }
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_connections == 0 {
            return Err(ValidationError::ZeroMaxConnections);
        }

        self.tls.validate()
    }

    /// Builds the connection settings for the administrative database of a server.
    pub fn admin_connection(
        &self,
        host: &str,
        port: u16,
        username: &str,
        password: Option<SerializableSecretString>,
    ) -> PgConnectionConfig {
        PgConnectionConfig {
            host: host.to_string(),
            port,
            name: self.admin_database.clone(),
            username: username.to_string(),
            password,
            tls: self.tls.clone(),
        }
    }
}
