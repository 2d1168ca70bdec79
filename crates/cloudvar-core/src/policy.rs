//! Access policy and the handshake triple.
//!
//! The policy is process-wide and immutable after startup. It combines two
//! ban lists with exactly one project mode (allow-all, blacklist, whitelist).

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::PolicyError;

// ============================================================================
// Handshake
// ============================================================================

/// Authorization record for a (user, address, project) triple.
///
/// Equality is an exact match on all three fields. A handshake is never
/// mutated once recorded; several connections may present the same triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handshake {
    pub username: String,
    pub address: IpAddr,
    pub project_id: String,
}

impl Handshake {
    /// Creates a new handshake triple.
    pub fn new(username: impl Into<String>, address: IpAddr, project_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            address,
            project_id: project_id.into(),
        }
    }

    /// Key used for the audit record, `user/address/project`.
    pub fn audit_key(&self) -> String {
        format!("{}/{}/{}", self.username, self.address, self.project_id)
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.username, self.address, self.project_id)
    }
}

// ============================================================================
// Project Policy
// ============================================================================

/// Which projects the server is willing to serve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProjectPolicy {
    /// Every project is served.
    #[default]
    AllowAll,

    /// Every project except the listed ones.
    Blacklist(HashSet<String>),

    /// Only the listed projects.
    Whitelist(HashSet<String>),
}

impl ProjectPolicy {
    /// Returns true if `project_id` may be served under this policy.
    pub fn permits(&self, project_id: &str) -> bool {
        match self {
            Self::AllowAll => true,
            Self::Blacklist(projects) => !projects.contains(project_id),
            Self::Whitelist(projects) => projects.contains(project_id),
        }
    }

    /// Short mode name used in logs.
    pub fn mode(&self) -> &'static str {
        match self {
            Self::AllowAll => "allow-all",
            Self::Blacklist(_) => "blacklist",
            Self::Whitelist(_) => "whitelist",
        }
    }
}

// ============================================================================
// Access Policy
// ============================================================================

/// Ban lists plus the project policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    banned_usernames: HashSet<String>,
    banned_addresses: HashSet<IpAddr>,
    projects: ProjectPolicy,
}

impl AccessPolicy {
    /// Creates a policy from its parts.
    ///
    /// IPv4-mapped IPv6 addresses are stored in their IPv4 form.
    pub fn new(
        banned_usernames: impl IntoIterator<Item = String>,
        banned_addresses: impl IntoIterator<Item = IpAddr>,
        projects: ProjectPolicy,
    ) -> Self {
        Self {
            banned_usernames: banned_usernames.into_iter().collect(),
            banned_addresses: banned_addresses
                .into_iter()
                .map(|addr| addr.to_canonical())
                .collect(),
            projects,
        }
    }

    /// Builds the project policy from optional whitelist/blacklist lists.
    ///
    /// Empty lists count as absent, so neither list present means
    /// allow-all.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::ConflictingProjectLists` if both lists are
    /// non-empty.
    pub fn project_policy(
        whitelist: Vec<String>,
        blacklist: Vec<String>,
    ) -> Result<ProjectPolicy, PolicyError> {
        match (whitelist.is_empty(), blacklist.is_empty()) {
            (true, true) => Ok(ProjectPolicy::AllowAll),
            (false, true) => Ok(ProjectPolicy::Whitelist(whitelist.into_iter().collect())),
            (true, false) => Ok(ProjectPolicy::Blacklist(blacklist.into_iter().collect())),
            (false, false) => Err(PolicyError::ConflictingProjectLists),
        }
    }

    /// Returns true iff the triple passes both ban lists and the project policy.
    ///
    /// Pure predicate: the three conditions are combined with AND, so a
    /// banned user or address is denied regardless of the project.
    pub fn authorize(&self, username: &str, address: &IpAddr, project_id: &str) -> bool {
        !self.banned_addresses.contains(&address.to_canonical())
            && !self.banned_usernames.contains(username)
            && self.projects.permits(project_id)
    }

    /// The project policy in effect.
    pub fn projects(&self) -> &ProjectPolicy {
        &self.projects
    }

    /// Number of banned usernames.
    pub fn banned_username_count(&self) -> usize {
        self.banned_usernames.len()
    }

    /// Number of banned addresses.
    pub fn banned_address_count(&self) -> usize {
        self.banned_addresses.len()
    }
}
