//! cloudvar Core - Shared domain types for the cloud variable server
//!
//! This crate provides the domain types shared between the daemon
//! (cloudvard) and its wire protocol:
//! - `policy` - access policy and the handshake triple
//! - `guard` - authorization guard holding granted handshakes
//! - `variable` - canonical variable names and the variable store
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod guard;
pub mod policy;
pub mod variable;

// Re-exports for convenience
pub use error::{PolicyError, StoreError, StoreResult};
pub use guard::AuthorizationGuard;
pub use policy::{AccessPolicy, Handshake, ProjectPolicy};
pub use variable::{Variable, VariableName, VariableStore, CLOUD_PREFIX, DEFAULT_SIZE_LIMIT};
