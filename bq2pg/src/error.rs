use std::error;
use std::fmt;

/// Result type of fallible replication operations.
pub type ReplicateResult<T> = Result<T, ReplicateError>;

/// Error raised by the source and destination clients and the conversions between them.
///
/// Every error carries an [`ErrorKind`] for classification, a static description and, when
/// available, the text of the underlying error as detail.
#[derive(Debug, Clone)]
pub struct ReplicateError {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
}

/// Categories of failures that can occur while replicating.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source (warehouse) errors
    SourceAuthenticationFailed,
    SourceConnectionFailed,
    SourceQueryFailed,
    SourceSchemaError,

    // Destination (database) errors
    DestinationConnectionFailed,
    DestinationQueryFailed,
    DestinationAuthenticationFailed,

    // Data errors
    ConversionError,
    InvalidData,

    // Local errors
    IoError,
    DeserializationError,
    ConfigError,

    Unknown,
}

impl ReplicateError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl PartialEq for ReplicateError {
    fn eq(&self, other: &ReplicateError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for ReplicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)?;
        f.write_str(": ")?;
        f.write_str(self.description)?;

        if let Some(detail) = &self.detail {
            f.write_str(" -> ")?;
            f.write_str(detail)?;
        }

        Ok(())
    }
}

impl error::Error for ReplicateError {}

impl From<(ErrorKind, &'static str)> for ReplicateError {
    fn from((kind, description): (ErrorKind, &'static str)) -> ReplicateError {
        ReplicateError {
            kind,
            description,
            detail: None,
        }
    }
}

impl From<(ErrorKind, &'static str, String)> for ReplicateError {
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> ReplicateError {
        ReplicateError {
            kind,
            description,
            detail: Some(detail),
        }
    }
}

impl From<std::io::Error> for ReplicateError {
    fn from(err: std::io::Error) -> ReplicateError {
        (ErrorKind::IoError, "I/O error occurred", err.to_string()).into()
    }
}

impl From<serde_json::Error> for ReplicateError {
    fn from(err: serde_json::Error) -> ReplicateError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        (kind, description, err.to_string()).into()
    }
}

/// Classifies [`sqlx::Error`]s raised while talking to the destination database.
///
/// Authentication failures are recognized by their SQLSTATE class (`28`), transport and
/// pool failures count as connection failures, everything else as a failed query.
impl From<sqlx::Error> for ReplicateError {
    fn from(err: sqlx::Error) -> ReplicateError {
        let (kind, description) = match &err {
            sqlx::Error::Database(db_err)
                if db_err.code().is_some_and(|code| code.starts_with("28")) =>
            {
                (
                    ErrorKind::DestinationAuthenticationFailed,
                    "PostgreSQL authentication failed",
                )
            }
            sqlx::Error::Database(_) => {
                (ErrorKind::DestinationQueryFailed, "PostgreSQL query failed")
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => (
                ErrorKind::DestinationConnectionFailed,
                "PostgreSQL connection error",
            ),
            sqlx::Error::Configuration(_) => {
                (ErrorKind::ConfigError, "PostgreSQL configuration error")
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                (ErrorKind::ConversionError, "PostgreSQL value decoding failed")
            }
            _ => (ErrorKind::DestinationQueryFailed, "PostgreSQL error"),
        };

        (kind, description, err.to_string()).into()
    }
}
