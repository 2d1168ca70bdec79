//! Shared server state owned by the registry actor.

use std::sync::Arc;

use cloudvar_core::{AccessPolicy, AuthorizationGuard, VariableStore};

use crate::audit::PersistenceGateway;
use crate::registry::SessionRegistry;

/// Everything a command handler may read or mutate.
///
/// Only the registry actor holds this, so each command runs to completion
/// before the next one starts.
pub struct CloudState {
    pub guard: AuthorizationGuard,
    pub store: VariableStore,
    pub sessions: SessionRegistry,
    pub audit: Option<Arc<dyn PersistenceGateway>>,
}

impl CloudState {
    /// Creates empty state for the given policy and value size limit.
    pub fn new(policy: AccessPolicy, size_limit: usize) -> Self {
        Self {
            guard: AuthorizationGuard::new(policy),
            store: VariableStore::new(size_limit),
            sessions: SessionRegistry::new(),
            audit: None,
        }
    }

    /// Attaches the handshake audit gateway.
    #[must_use]
    pub fn with_audit(mut self, gateway: Arc<dyn PersistenceGateway>) -> Self {
        self.audit = Some(gateway);
        self
    }
}

impl Default for CloudState {
    fn default() -> Self {
        Self::new(AccessPolicy::default(), cloudvar_core::DEFAULT_SIZE_LIMIT)
    }
}
