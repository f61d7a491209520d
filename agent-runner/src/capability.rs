//! Capability allow-list for agent dispatch
//!
//! The agent is granted an explicit enumerated set of capabilities per
//! turn; anything outside the list is denied by the agent's own
//! permission layer. Order is preserved so the rendered flag value is
//! stable across runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Invalid capability list: {0}")]
    InvalidFormat(String),

    #[error("Capability list is empty")]
    Empty,
}

/// One grantable capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    /// Name the agent understands, e.g. "Bash"
    pub name: String,

    /// What granting it allows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Capability {
    fn named(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// Ordered, duplicate-free set of capabilities granted to the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet {
    entries: Vec<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default grant: read, search and shell execution
    pub fn with_default_capabilities() -> Self {
        let mut set = Self::new();
        for cap in [
            Capability::named("Bash", "Run shell commands"),
            Capability::named("Read", "Read file contents"),
            Capability::named("Write", "Create or overwrite files"),
            Capability::named("Edit", "Modify file contents"),
            Capability::named("Grep", "Search file contents"),
            Capability::named("Glob", "Find files by pattern"),
        ] {
            set.add(cap);
        }
        set
    }

    /// Add a capability; duplicates by name are ignored
    pub fn add(&mut self, capability: Capability) {
        if !self.contains(&capability.name) {
            self.entries.push(capability);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|c| c.name == name)
    }

    /// Restrict to the named subset, preserving this set's order.
    ///
    /// Requesting a capability outside the set is a configuration error,
    /// caught at startup rather than at dispatch time.
    pub fn subset(&self, names: &[String]) -> Result<CapabilitySet, CapabilityError> {
        for name in names {
            if !self.contains(name) {
                return Err(CapabilityError::UnknownCapability(name.clone()));
            }
        }

        let entries = self
            .entries
            .iter()
            .filter(|c| names.contains(&c.name))
            .cloned()
            .collect();

        Ok(CapabilitySet { entries })
    }

    /// Render the comma-joined enumeration passed to the agent
    pub fn to_flag_value(&self) -> Result<String, CapabilityError> {
        if self.entries.is_empty() {
            return Err(CapabilityError::Empty);
        }

        Ok(self
            .entries
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(","))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load from a YAML document (a list of entries)
    pub fn from_yaml(yaml: &str) -> Result<Self, CapabilityError> {
        let entries: Vec<Capability> = serde_yaml::from_str(yaml)
            .map_err(|e| CapabilityError::InvalidFormat(e.to_string()))?;
        Ok(Self { entries })
    }

    /// Load from a JSON document (a list of entries)
    pub fn from_json(json: &str) -> Result<Self, CapabilityError> {
        let entries: Vec<Capability> = serde_json::from_str(json)
            .map_err(|e| CapabilityError::InvalidFormat(e.to_string()))?;
        Ok(Self { entries })
    }

    /// Export to JSON
    pub fn to_json(&self) -> Result<String, CapabilityError> {
        serde_json::to_string_pretty(&self.entries)
            .map_err(|e| CapabilityError::InvalidFormat(e.to_string()))
    }
}
