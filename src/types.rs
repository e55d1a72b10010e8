use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Surrogate key for a node row. Stable for the life of the row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Surrogate key for a store partition.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct StoreId(pub u64);

/// Surrogate key for an interned qualified name.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct QNameId(pub u64);

/// Surrogate key for a child or peer association row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct AssocId(pub u64);

/// Ledger entry identifier. ID order is the authoritative commit order.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TxnId(pub u64);

/// Monotonic per-node update counter.
///
/// Unbounded: equality is the staleness signal for cached snapshots, and
/// ordering is additionally valid because the counter never wraps.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize)]
pub struct NodeVersion(pub u64);

impl NodeVersion {
    pub fn next(self) -> Self {
        NodeVersion(self.0 + 1)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for QNameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A namespaced qualified name identifying a type, aspect, property or
/// association path segment.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct QName {
    pub ns: String,
    pub local: String,
}

impl QName {
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ns, self.local)
    }
}

/// Well-known system QNames used by the engine itself.
pub mod sys {
    use super::QName;

    pub const NS: &str = "sys";

    /// Sentinel node type marking a soft-deleted row awaiting purge.
    pub fn deleted_type() -> QName {
        QName::new(NS, "deleted")
    }

    /// Node type of a store root.
    pub fn store_root_type() -> QName {
        QName::new(NS, "storeRoot")
    }

    /// Aspect carried by every root node of a store.
    pub fn root_aspect() -> QName {
        QName::new(NS, "root")
    }

    /// Association path segment used for store root children created
    /// without an explicit path QName.
    pub fn children_assoc() -> QName {
        QName::new(NS, "children")
    }
}

/// A named partition: protocol plus identifier, e.g. `workspace://SpacesStore`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct StoreRef {
    pub protocol: String,
    pub identifier: String,
}

impl StoreRef {
    pub fn new(protocol: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for StoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.identifier)
    }
}

/// User-facing node reference: store plus store-unique UUID.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    pub store: StoreRef,
    pub uuid: Uuid,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.uuid)
    }
}

/// Surrogate-ID plus reference pair, the common currency of query results.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct NodePair {
    pub id: NodeId,
    pub node_ref: NodeRef,
}

/// Uniquely scopes one property/aspect snapshot of a node for cache purposes.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct NodeVersionKey {
    pub node_id: NodeId,
    pub version: NodeVersion,
}

/// Current status of a node row, including soft-deleted rows.
///
/// Purged rows have no status; lookups return `None` for them.
#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: NodeId,
    pub node_ref: NodeRef,
    pub txn_id: TxnId,
    pub deleted: bool,
}

/// Stored representation ordinal of a property value.
///
/// Used by maintenance scans that select values by how they are actually
/// persisted rather than by their nominal model type.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum PropType {
    Null = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    Str = 4,
    Bytes = 5,
    Date = 6,
    DateTime = 7,
    List = 8,
}

/// Typed property value with owned data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Null,
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point number.
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Days since the Unix epoch.
    Date(i64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// Multi-valued property; replaces flat per-index rows.
    List(Vec<PropValue>),
}

impl PropValue {
    /// The stored-representation ordinal for this value.
    pub fn actual_type(&self) -> PropType {
        match self {
            PropValue::Null => PropType::Null,
            PropValue::Bool(_) => PropType::Bool,
            PropValue::Int(_) => PropType::Int,
            PropValue::Float(_) => PropType::Float,
            PropValue::Str(_) => PropType::Str,
            PropValue::Bytes(_) => PropType::Bytes,
            PropValue::Date(_) => PropType::Date,
            PropValue::DateTime(_) => PropType::DateTime,
            PropValue::List(_) => PropType::List,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Null => write!(f, "null"),
            PropValue::Bool(v) => write!(f, "{v}"),
            PropValue::Int(v) => write!(f, "{v}"),
            PropValue::Float(v) => write!(f, "{v}"),
            PropValue::Str(v) => write!(f, "{v}"),
            PropValue::Bytes(v) => write!(f, "bytes(len={})", v.len()),
            PropValue::Date(v) => write!(f, "date({v})"),
            PropValue::DateTime(v) => write!(f, "datetime({v})"),
            PropValue::List(v) => write!(f, "list(len={})", v.len()),
        }
    }
}

/// Node ID with its ACL reference, as returned by ACL propagation queries.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct NodeIdAndAclId {
    pub node_id: NodeId,
    pub acl_id: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_display() {
        let q = QName::new("cm", "name");
        assert_eq!(q.to_string(), "cm:name");
    }

    #[test]
    fn store_ref_display() {
        let s = StoreRef::new("workspace", "SpacesStore");
        assert_eq!(s.to_string(), "workspace://SpacesStore");
    }

    #[test]
    fn prop_value_actual_types() {
        assert_eq!(PropValue::Null.actual_type(), PropType::Null);
        assert_eq!(PropValue::Int(3).actual_type(), PropType::Int);
        assert_eq!(
            PropValue::List(vec![PropValue::Int(1)]).actual_type(),
            PropType::List
        );
    }

    #[test]
    fn prop_value_serde_round_trip() {
        let value = PropValue::List(vec![
            PropValue::Str("a".into()),
            PropValue::Int(-2),
            PropValue::Null,
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: PropValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn node_version_next_is_strictly_increasing() {
        let v = NodeVersion(7);
        assert!(v.next() > v);
        assert_eq!(v.next(), NodeVersion(8));
    }
}
