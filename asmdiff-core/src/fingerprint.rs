//! Structural fingerprints for type descriptors.
//!
//! A fingerprint is xxHash32 (seed 0) over the full name followed by each
//! property's `"<type_name> <name>"` rendering in declaration order, with
//! no separators. Equal fingerprints are treated as equal shapes; a
//! collision makes a changed type look unchanged.

use std::collections::HashMap;

use xxhash_rust::xxh32::Xxh32;

use crate::types::{Snapshot, TypeDescriptor};

/// Fingerprint of one descriptor.
pub fn fingerprint(descriptor: &TypeDescriptor) -> u32 {
    let mut hasher = Xxh32::new(0);
    hasher.update(descriptor.full_name.as_bytes());
    for property in &descriptor.properties {
        hasher.update(property.type_name.as_bytes());
        hasher.update(b" ");
        hasher.update(property.name.as_bytes());
    }
    hasher.digest()
}

/// Fingerprints of every type of a snapshot, computed once.
#[derive(Debug, Default)]
pub struct FingerprintIndex {
    by_name: HashMap<String, u32>,
}

impl FingerprintIndex {
    pub fn build(snapshot: &Snapshot) -> Self {
        Self {
            by_name: snapshot
                .iter()
                .map(|t| (t.full_name.clone(), fingerprint(t)))
                .collect(),
        }
    }

    pub fn get(&self, full_name: &str) -> Option<u32> {
        self.by_name.get(full_name).copied()
    }

    /// Both indexes hold the type and the fingerprints agree.
    pub fn matches(&self, other: &FingerprintIndex, full_name: &str) -> bool {
        match (self.get(full_name), other.get(full_name)) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PropertyDescriptor;
    use xxhash_rust::xxh32::xxh32;

    fn ty(name: &str, props: &[(&str, &str)]) -> TypeDescriptor {
        TypeDescriptor::new(
            name,
            props
                .iter()
                .map(|(n, t)| PropertyDescriptor::new(*n, *t))
                .collect(),
        )
    }

    #[test]
    fn test_matches_one_shot_hash_of_concatenation() {
        let descriptor = ty("A", &[("x", "System.Int32"), ("y", "System.String")]);
        let expected = xxh32(b"ASystem.Int32 xSystem.String y", 0);
        assert_eq!(fingerprint(&descriptor), expected);
    }

    #[test]
    fn test_sensitive_to_type_and_order() {
        let base = ty("A", &[("x", "System.Int32"), ("y", "System.String")]);
        let retyped = ty("A", &[("x", "System.Int64"), ("y", "System.String")]);
        let reordered = ty("A", &[("y", "System.String"), ("x", "System.Int32")]);

        assert_ne!(fingerprint(&base), fingerprint(&retyped));
        assert_ne!(fingerprint(&base), fingerprint(&reordered));
        assert_eq!(fingerprint(&base), fingerprint(&base.clone()));
    }

    #[test]
    fn test_index_matches() {
        let source: Snapshot = vec![ty("A", &[("x", "int")]), ty("B", &[])].into_iter().collect();
        let target: Snapshot = vec![ty("A", &[("x", "int")]), ty("B", &[("z", "int")])]
            .into_iter()
            .collect();
        let source_index = FingerprintIndex::build(&source);
        let target_index = FingerprintIndex::build(&target);

        assert_eq!(source_index.len(), 2);
        assert!(source_index.matches(&target_index, "A"));
        assert!(!source_index.matches(&target_index, "B"));
        assert!(!source_index.matches(&target_index, "C"));
    }
}
