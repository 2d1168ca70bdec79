//! Domain-specific error types following panic-free policy.

use crate::VariableName;
use thiserror::Error;

/// Errors raised by the variable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Variable not present in the store
    #[error("Unknown variable: {name}")]
    UnknownVariable { name: VariableName },

    /// Value longer than the configured size limit
    #[error("Value for {name} too large: {length} characters (limit: {limit})")]
    ValueTooLarge {
        name: VariableName,
        length: usize,
        limit: usize,
    },
}

/// Result type for variable store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while building an access policy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// Both a project whitelist and a project blacklist were given
    #[error("Cannot use a project whitelist and a project blacklist together")]
    ConflictingProjectLists,
}
