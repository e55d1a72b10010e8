//! Association entities: child (tree + secondary) edges and peer edges.

use serde::{Deserialize, Serialize};

use crate::types::{AssocId, NodeId, NodePair, QName, QNameId};

/// Case-insensitive uniqueness key for a child name, denormalized onto the
/// edge so collision checks never compare full strings.
///
/// The key is the lowercased name truncated to a fixed prefix plus a CRC32
/// over the whole lowercased name. Two names collide only when both parts
/// match, so the prefix bounds comparison cost and the CRC disambiguates
/// shared prefixes.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct ChildNameKey {
    pub short: String,
    pub crc: u32,
}

impl ChildNameKey {
    pub fn new(name: &str, key_len: usize) -> Self {
        let lower = name.to_lowercase();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(lower.as_bytes());
        let crc = hasher.finalize();
        let short = lower.chars().take(key_len).collect();
        Self { short, crc }
    }
}

/// One child-association row.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildAssocEntity {
    pub id: AssocId,
    pub parent_id: NodeId,
    pub child_id: NodeId,
    pub type_qname_id: QNameId,
    pub qname_id: QNameId,
    /// Display name of the child under this edge.
    pub child_name: String,
    pub name_key: ChildNameKey,
    /// Exactly one primary edge per non-root node; primary edges form the
    /// canonical tree.
    pub is_primary: bool,
    pub assoc_index: i32,
}

/// One peer (node-to-node) association row. No tree semantics.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeAssocEntity {
    pub id: AssocId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub type_qname_id: QNameId,
    pub assoc_index: i32,
}

/// Resolved child-association result row, with both endpoint references
/// materialized so consumers never need follow-up node fetches.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildAssocRef {
    pub id: AssocId,
    pub parent: NodePair,
    pub child: NodePair,
    pub type_qname: QName,
    pub qname: QName,
    pub child_name: String,
    pub is_primary: bool,
    pub index: i32,
}

/// Resolved peer-association result row.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeAssocRef {
    pub id: AssocId,
    pub source: NodePair,
    pub target: NodePair,
    pub type_qname: QName,
    pub index: i32,
}

/// Filter set for child-association scans.
///
/// Empty collections and `None` fields mean "no filtering on that axis".
/// Ordering is opt-in because it costs a sort; when requested, results are
/// ordered by `(assoc_index, assoc_id)` — the ID is the deterministic
/// tie-break for equal indices, keeping pagination stable.
#[derive(Clone, Debug, Default)]
pub struct ChildAssocFilter {
    pub child_id: Option<NodeId>,
    pub assoc_types: Vec<QName>,
    pub assoc_qname: Option<QName>,
    pub is_primary: Option<bool>,
    /// `Some(true)`: children in the parent's store only; `Some(false)`:
    /// children in a different store only.
    pub same_store: Option<bool>,
    pub child_node_types: Vec<QName>,
    /// Exact child-name matches, compared through the uniqueness key.
    pub child_names: Vec<String>,
    pub max_results: Option<usize>,
    pub ordered: bool,
}

impl ChildAssocFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(mut self, child_id: NodeId) -> Self {
        self.child_id = Some(child_id);
        self
    }

    pub fn assoc_type(mut self, assoc_type: QName) -> Self {
        self.assoc_types.push(assoc_type);
        self
    }

    pub fn assoc_qname(mut self, assoc_qname: QName) -> Self {
        self.assoc_qname = Some(assoc_qname);
        self
    }

    pub fn primary(mut self, is_primary: bool) -> Self {
        self.is_primary = Some(is_primary);
        self
    }

    pub fn same_store(mut self, same_store: bool) -> Self {
        self.same_store = Some(same_store);
        self
    }

    pub fn child_node_type(mut self, type_qname: QName) -> Self {
        self.child_node_types.push(type_qname);
        self
    }

    pub fn child_name(mut self, name: impl Into<String>) -> Self {
        self.child_names.push(name.into());
        self
    }

    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }
}

/// Filter set for parent-association scans of one child node.
#[derive(Clone, Debug, Default)]
pub struct ParentAssocFilter {
    pub assoc_type: Option<QName>,
    pub assoc_qname: Option<QName>,
    pub is_primary: Option<bool>,
}

impl ParentAssocFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assoc_type(mut self, assoc_type: QName) -> Self {
        self.assoc_type = Some(assoc_type);
        self
    }

    pub fn assoc_qname(mut self, assoc_qname: QName) -> Self {
        self.assoc_qname = Some(assoc_qname);
        self
    }

    pub fn primary(mut self, is_primary: bool) -> Self {
        self.is_primary = Some(is_primary);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_key_is_case_insensitive() {
        assert_eq!(ChildNameKey::new("Foo", 50), ChildNameKey::new("fOO", 50));
        assert_ne!(ChildNameKey::new("foo", 50), ChildNameKey::new("bar", 50));
    }

    #[test]
    fn name_key_truncates_prefix_but_hashes_whole_name() {
        let a = ChildNameKey::new("prefixprefix-alpha", 6);
        let b = ChildNameKey::new("prefixprefix-beta", 6);
        assert_eq!(a.short, b.short);
        assert_ne!(a.crc, b.crc);
        assert_ne!(a, b);
    }

    #[test]
    fn name_key_handles_multibyte_truncation() {
        // truncation counts chars, not bytes
        let key = ChildNameKey::new("äöüß-document", 4);
        assert_eq!(key.short, "äöüß");
    }
}
