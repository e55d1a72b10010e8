use thiserror::Error;

use crate::types::{NodeId, NodeVersion, QName, StoreRef};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Error taxonomy of the node-graph core.
///
/// Not-found conditions are deliberately absent: lookups for unknown or
/// purged entities return `None`/empty results, which are expected
/// steady-state outcomes rather than failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store reference is already taken.
    #[error("store {0} already exists")]
    StoreExists(StoreRef),

    /// The target UUID is already taken by a row in the store.
    #[error("node {uuid} already exists in store {store}")]
    NodeExists { store: StoreRef, uuid: uuid::Uuid },

    /// Case-insensitive child-name collision under one (parent, assoc type).
    #[error("duplicate child name '{name}' under parent {parent} for association type {assoc_type}")]
    DuplicateChildName {
        parent: NodeId,
        assoc_type: QName,
        name: String,
    },

    /// A peer association with the same source, target and type already
    /// exists.
    ///
    /// The endpoint field is named `source_node` because a field named
    /// `source` would be picked up as the error's cause by the derive.
    #[error("association {assoc_type} from {source_node} to {target} already exists")]
    AssocExists {
        source_node: NodeId,
        target: NodeId,
        assoc_type: QName,
    },

    /// A structural change would introduce a cycle in the primary tree.
    #[error("cyclic child relationship detected at node {0}")]
    CyclicRelationship(NodeId),

    /// Data corruption observed while walking the graph. Fatal to the
    /// current unit of work; never retried, never repaired in place.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// Optimistic concurrency conflict: the caller's node snapshot went
    /// stale. Retryable by an outer transaction helper.
    #[error("update conflict on node {node}: expected version {expected}, found {found}")]
    Conflict {
        node: NodeId,
        expected: NodeVersion,
        found: NodeVersion,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether an outer retry loop may safely re-attempt the operation.
    ///
    /// Only version conflicts qualify; constraint and integrity violations
    /// would reproduce themselves unless the caller re-derives its inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Whether this is a synchronous constraint violation (duplicate name,
    /// duplicate UUID, duplicate store).
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StoreError::StoreExists(_)
                | StoreError::NodeExists { .. }
                | StoreError::DuplicateChildName { .. }
                | StoreError::AssocExists { .. }
        )
    }
}
