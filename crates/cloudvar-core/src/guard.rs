//! Authorization guard: policy evaluation plus the granted handshake set.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::debug;

use crate::{AccessPolicy, Handshake};

/// Evaluates the access policy and remembers which triples were granted.
///
/// The guard only ever stores triples, never connections, so a client that
/// reconnects and presents the same triple is still authorized.
#[derive(Debug, Default)]
pub struct AuthorizationGuard {
    policy: AccessPolicy,
    granted: HashSet<Handshake>,
}

impl AuthorizationGuard {
    /// Creates a guard with no granted handshakes.
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            granted: HashSet::new(),
        }
    }

    /// Returns true if the triple passes the ban lists and project policy.
    pub fn authorize(&self, username: &str, address: &IpAddr, project_id: &str) -> bool {
        self.policy.authorize(username, address, project_id)
    }

    /// Records a handshake for the triple.
    ///
    /// Returns `false` if the triple was already granted (the set keeps a
    /// single record per triple).
    pub fn grant(&mut self, handshake: Handshake) -> bool {
        let inserted = self.granted.insert(handshake);
        if !inserted {
            debug!("Handshake already granted, keeping existing record");
        }
        inserted
    }

    /// Returns true if exactly this triple has been granted.
    pub fn is_granted(&self, handshake: &Handshake) -> bool {
        self.granted.contains(handshake)
    }

    /// Number of distinct granted triples.
    pub fn granted_count(&self) -> usize {
        self.granted.len()
    }

    /// The policy this guard evaluates.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}
