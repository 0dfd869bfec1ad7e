use thiserror::Error;

/// Errors surfaced by tree operations.
///
/// Out-of-range indices are misuse and always reported. Absence of a value in
/// the ordered operations is *not* an error; those report it through an empty
/// [`Option`] instead.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum Error {
    /// An index lay outside the legal interval for the operation.
    #[error("index out of range")]
    OutOfRange,
    /// The node store could not provide storage for a new node.
    #[error("node allocation failed")]
    AllocationFailed,
}
