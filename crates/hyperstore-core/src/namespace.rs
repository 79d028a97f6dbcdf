//! Namespaces: independently ordered key-spaces inside one database.
//!
//! A database always carries the well-known namespaces used by the
//! hypergraph layer. The list is append-only: new builds may add names at
//! the end, and a store written by an older build gains the missing names
//! the next time it is opened. Ids are positions in that list, so an id
//! never changes once assigned.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Maximum number of namespaces a single database can hold.
pub const MAX_NAMESPACES: usize = 16;

/// Names created in every database, in id order.
pub const WELL_KNOWN_NAMESPACES: [&str; 8] = [
    "default",
    "nodes",
    "links",
    "incoming",
    "outgoing",
    "attention",
    "truth_values",
    "metadata",
];

/// Index of a namespace within its database's registry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NamespaceId(pub u32);

impl NamespaceId {
    /// The default namespace, used when none is specified.
    pub const DEFAULT: NamespaceId = NamespaceId(0);
    /// Node records.
    pub const NODES: NamespaceId = NamespaceId(1);
    /// Link (hyperedge) records.
    pub const LINKS: NamespaceId = NamespaceId(2);
    /// Incoming adjacency.
    pub const INCOMING: NamespaceId = NamespaceId(3);
    /// Outgoing adjacency.
    pub const OUTGOING: NamespaceId = NamespaceId(4);
    /// Attention / priority values.
    pub const ATTENTION: NamespaceId = NamespaceId(5);
    /// Derived truth values.
    pub const TRUTH_VALUES: NamespaceId = NamespaceId(6);
    /// Store metadata.
    pub const METADATA: NamespaceId = NamespaceId(7);

    /// Position of this namespace in the registry.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for NamespaceId {
    fn from(id: u32) -> Self {
        NamespaceId(id)
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns#{}", self.0)
    }
}

/// Ordered list of namespace names owned by one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    names: Vec<String>,
    strict: bool,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::well_known()
    }
}

impl NamespaceRegistry {
    /// Registry holding only the well-known namespaces.
    pub fn well_known() -> Self {
        Self {
            names: WELL_KNOWN_NAMESPACES.iter().map(|n| n.to_string()).collect(),
            strict: false,
        }
    }

    /// Rebuild a registry from a persisted name list.
    pub fn from_names(names: Vec<String>) -> Result<Self> {
        if names.first().map(String::as_str) != Some(WELL_KNOWN_NAMESPACES[0]) {
            return Err(Error::Corruption(
                "namespace list must start with the default namespace".into(),
            ));
        }
        let mut registry = Self {
            names: Vec::with_capacity(names.len()),
            strict: false,
        };
        for name in names {
            if registry.id_of(&name).is_some() {
                return Err(Error::Corruption(format!("duplicate namespace '{}'", name)));
            }
            registry.push(name)?;
        }
        Ok(registry)
    }

    /// Reject out-of-range ids instead of falling back to the default namespace.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Whether out-of-range ids are rejected.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn push(&mut self, name: String) -> Result<NamespaceId> {
        if name.is_empty() {
            return Err(Error::Config("namespace name must not be empty".into()));
        }
        if self.names.len() >= MAX_NAMESPACES {
            return Err(Error::Config(format!(
                "cannot add namespace '{}': limit of {} reached",
                name, MAX_NAMESPACES
            )));
        }
        self.names.push(name);
        Ok(NamespaceId(self.names.len() as u32 - 1))
    }

    /// Look up `name`, appending it if it is not registered yet.
    ///
    /// Returns the id and whether the namespace was newly created.
    pub fn ensure(&mut self, name: &str) -> Result<(NamespaceId, bool)> {
        match self.id_of(name) {
            Some(id) => Ok((id, false)),
            None => self.push(name.to_string()).map(|id| (id, true)),
        }
    }

    /// Map a caller-supplied id onto a registered namespace.
    ///
    /// Ids outside the registry select the default namespace unless the
    /// registry is strict.
    pub fn resolve(&self, id: NamespaceId) -> Result<NamespaceId> {
        if self.contains(id) {
            return Ok(id);
        }
        if self.strict {
            return Err(Error::InvalidState(format!(
                "unknown namespace {} ({} registered)",
                id,
                self.names.len()
            )));
        }
        debug!(requested = id.0, "namespace out of range, using default");
        Ok(NamespaceId::DEFAULT)
    }

    /// Id registered for `name`.
    pub fn id_of(&self, name: &str) -> Option<NamespaceId> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| NamespaceId(i as u32))
    }

    /// Name registered for `id`.
    pub fn name_of(&self, id: NamespaceId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Whether `id` names a registered namespace.
    pub fn contains(&self, id: NamespaceId) -> bool {
        id.index() < self.names.len()
    }

    /// All names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Iterate over `(id, name)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NamespaceId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (NamespaceId(i as u32), n.as_str()))
    }

    /// Number of registered namespaces.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if no namespace is registered.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
