mod base;
mod connection;
mod destination;
mod sentry;

pub use base::*;
pub use connection::*;
pub use destination::*;
pub use sentry::*;
