use thiserror::Error;

/// Errors returned by [`P2cPicker::pick`](crate::P2cPicker::pick).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PickError {
    /// The picker was built from an empty ready set.
    #[error("no ready connection available")]
    NoConnectionAvailable,
}
