//! Cloud variables and the variable store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{StoreError, StoreResult};

/// Marker prefix distinguishing cloud variables from local ones.
pub const CLOUD_PREFIX: &str = "☁ ";

/// Default maximum value length, in characters.
pub const DEFAULT_SIZE_LIMIT: usize = 256;

// ============================================================================
// Variable Name
// ============================================================================

/// Canonical cloud variable name (always carries [`CLOUD_PREFIX`] exactly once).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableName(String);

impl VariableName {
    /// Builds the canonical name from a client-supplied raw name.
    ///
    /// Leading cloud prefixes already present in `raw` are stripped first, so
    /// `"foo"` and `"☁ foo"` both canonicalize to `"☁ foo"`.
    pub fn canonical(raw: &str) -> Self {
        let bare = raw.trim_start_matches(CLOUD_PREFIX);
        Self(format!("{CLOUD_PREFIX}{bare}"))
    }

    /// Returns the canonical name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without the cloud prefix.
    pub fn bare(&self) -> &str {
        self.0.strip_prefix(CLOUD_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for VariableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Variable
// ============================================================================

/// A cloud variable: canonical name and string value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: VariableName,
    pub value: String,
}

impl Variable {
    pub fn new(name: VariableName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

// ============================================================================
// Variable Store
// ============================================================================

/// Mapping from canonical name to variable.
///
/// Keys always equal the stored variable's `name`. Values longer than the
/// size limit (counted in characters) are rejected by `create` and `set`.
#[derive(Debug, Clone)]
pub struct VariableStore {
    variables: BTreeMap<VariableName, Variable>,
    size_limit: usize,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_LIMIT)
    }
}

impl VariableStore {
    /// Creates an empty store with the given value size limit.
    pub fn new(size_limit: usize) -> Self {
        Self {
            variables: BTreeMap::new(),
            size_limit,
        }
    }

    /// Inserts the variable, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ValueTooLarge` if the value exceeds the limit.
    pub fn create(&mut self, raw_name: &str, value: String) -> StoreResult<&Variable> {
        let name = VariableName::canonical(raw_name);
        self.check_size(&name, &value)?;

        let variable = Variable::new(name.clone(), value);
        if self.variables.insert(name.clone(), variable).is_some() {
            debug!(name = %name, "Create overwrote existing variable");
        }
        self.lookup(&name)
    }

    /// Removes the variable and returns it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownVariable` if no such variable exists.
    pub fn delete(&mut self, raw_name: &str) -> StoreResult<Variable> {
        let name = VariableName::canonical(raw_name);
        self.variables
            .remove(&name)
            .ok_or(StoreError::UnknownVariable { name })
    }

    /// Re-keys the variable under the new name, keeping its value.
    ///
    /// A variable already stored under the new name is replaced.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnknownVariable` if the source does not exist.
    pub fn rename(&mut self, raw_name: &str, new_raw_name: &str) -> StoreResult<&Variable> {
        let name = VariableName::canonical(raw_name);
        let new_name = VariableName::canonical(new_raw_name);

        let mut variable = self
            .variables
            .remove(&name)
            .ok_or(StoreError::UnknownVariable { name })?;

        variable.name = new_name.clone();
        self.variables.insert(new_name.clone(), variable);
        self.lookup(&new_name)
    }

    /// Updates the value in place, creating the variable if absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ValueTooLarge` if the value exceeds the limit.
    pub fn set(&mut self, raw_name: &str, value: String) -> StoreResult<&Variable> {
        let name = VariableName::canonical(raw_name);
        self.check_size(&name, &value)?;

        let variable = self
            .variables
            .entry(name.clone())
            .or_insert_with(|| Variable::new(name, String::new()));
        variable.value = value;
        Ok(&*variable)
    }

    /// Looks up a variable by raw or canonical name.
    pub fn get(&self, raw_name: &str) -> Option<&Variable> {
        self.variables.get(&VariableName::canonical(raw_name))
    }

    /// All variables, ordered by canonical name.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Maximum value length in characters.
    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    fn check_size(&self, name: &VariableName, value: &str) -> StoreResult<()> {
        let length = value.chars().count();
        if length > self.size_limit {
            return Err(StoreError::ValueTooLarge {
                name: name.clone(),
                length,
                limit: self.size_limit,
            });
        }
        Ok(())
    }

    fn lookup(&self, name: &VariableName) -> StoreResult<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| StoreError::UnknownVariable { name: name.clone() })
    }
}
