use bq2pg_config::shared::{DestinationConfig, SentryConfig, ValidationError};
use serde::Deserialize;
use std::fmt;

/// Complete configuration of the replication service.
///
/// Connection details of the destination server arrive with each request, only the settings
/// shared by all requests are configured here.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Application server settings.
    pub application: ApplicationSettings,
    /// Settings applied to every destination database.
    #[serde(default)]
    pub destination: DestinationConfig,
    /// Optional Sentry configuration for error tracking.
    pub sentry: Option<SentryConfig>,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.destination.validate()
    }
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Host address the API listens on.
    pub host: String,
    /// Port number the API listens on.
    pub port: u16,
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)
    }
}
