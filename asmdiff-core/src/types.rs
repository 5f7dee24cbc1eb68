//! Data models for extracted type information.
//!
//! These types are the process-agnostic representation of the public surface
//! of a module set. Nothing here refers back to the metadata image or the
//! context it was read from, so snapshots outlive the loader that built them.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A property of a type: its name and normalized type name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub type_name: String,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// Renders as `"<type_name> <name>"`, the form used in change items and fingerprints.
impl fmt::Display for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.type_name, self.name)
    }
}

/// A type and its properties in declaration order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub full_name: String,
    pub properties: Vec<PropertyDescriptor>,
}

impl TypeDescriptor {
    pub fn new(full_name: impl Into<String>, properties: Vec<PropertyDescriptor>) -> Self {
        Self {
            full_name: full_name.into(),
            properties,
        }
    }
}

/// The type inventory of one module root.
///
/// Built through [`SnapshotBuilder`]; once built it only offers read access.
/// Iteration is in ascending full-name order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    types: BTreeMap<String, TypeDescriptor>,
}

impl Snapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn get(&self, full_name: &str) -> Option<&TypeDescriptor> {
        self.types.get(full_name)
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.types.contains_key(full_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<TypeDescriptor> for Snapshot {
    fn from_iter<I: IntoIterator<Item = TypeDescriptor>>(iter: I) -> Self {
        let mut builder = SnapshotBuilder::default();
        for descriptor in iter {
            builder.insert(descriptor);
        }
        builder.build()
    }
}

/// Accumulates descriptors for a [`Snapshot`].
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    types: BTreeMap<String, TypeDescriptor>,
    duplicates: usize,
}

impl SnapshotBuilder {
    /// Insert a descriptor. The first descriptor for a full name wins; returns
    /// `false` when the name was already present and the new one was dropped.
    pub fn insert(&mut self, descriptor: TypeDescriptor) -> bool {
        match self.types.entry(descriptor.full_name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
                true
            }
            Entry::Occupied(_) => {
                tracing::debug!("Dropping duplicate type {}", descriptor.full_name);
                self.duplicates += 1;
                false
            }
        }
    }

    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = TypeDescriptor>) {
        for descriptor in descriptors {
            self.insert(descriptor);
        }
    }

    /// Number of descriptors dropped as duplicates so far.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn build(self) -> Snapshot {
        Snapshot { types: self.types }
    }
}

/// A module that could not be loaded or introspected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub path: String,
    pub reason: String,
}

/// Per-root record of which modules were introspected and which failed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleLoadOutcome {
    /// Root path as given (file or directory).
    pub root: String,

    /// Modules whose types made it into the snapshot.
    pub succeeded: Vec<String>,

    /// Modules skipped, with the reason.
    pub failed: Vec<ModuleFailure>,
}

impl ModuleLoadOutcome {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, path: impl Into<String>) {
        self.succeeded.push(path.into());
    }

    pub fn record_failure(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(ModuleFailure {
            path: path.into(),
            reason: reason.into(),
        });
    }

    /// True when modules were attempted and none of them succeeded.
    pub fn is_total_failure(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}
