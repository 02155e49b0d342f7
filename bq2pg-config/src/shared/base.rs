use thiserror::Error;

/// Errors raised while validating loaded configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,

    /// The destination pool would never hand out a connection.
    #[error("Invalid destination config: `max_connections` must be greater than zero")]
    ZeroMaxConnections,
}
