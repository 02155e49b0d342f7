//! Shorthands for building and returning [`crate::error::ReplicateError`]s.

/// Creates a [`crate::error::ReplicateError`] from a kind, a static description and an
/// optional detail.
#[macro_export]
macro_rules! replicate_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::ReplicateError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::ReplicateError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::ReplicateError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::replicate_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::replicate_error!($kind, $desc, $detail))
    };
}
