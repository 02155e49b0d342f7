use serde::{Deserialize, Serialize};

/// Sentry error tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryConfig {
    /// Sentry DSN errors are reported to.
    pub dsn: String,
}
