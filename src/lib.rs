//! Embeddable, versioned node-graph storage engine.
//!
//! Nodes live in named store partitions, carry typed properties and
//! aspects, and hang off each other through child associations (one
//! primary parent per node, any number of secondary parents) and peer
//! associations. Every node row carries a monotonically increasing
//! version; writes are attributed to entries in an append-only
//! transaction ledger and checked against the unit of work's observed
//! snapshots, surfacing stale writes as retryable conflicts.
//!
//! ```no_run
//! use arbor::{GraphStore, NewNodeSpec, StoreConfig};
//! use arbor::types::{PropValue, QName, StoreRef};
//!
//! # fn main() -> arbor::Result<()> {
//! let store = GraphStore::new(StoreConfig::default());
//! let workspace = StoreRef::new("workspace", "SpacesStore");
//!
//! let mut txn = store.begin();
//! let root = store.new_store(&mut txn, &workspace)?;
//! let assoc = store.new_node(
//!     &mut txn,
//!     NewNodeSpec {
//!         parent_id: root.id,
//!         assoc_type: &QName::new("cm", "contains"),
//!         assoc_qname: &QName::new("cm", "readme"),
//!         store_ref: &workspace,
//!         uuid: None,
//!         node_type: &QName::new("cm", "content"),
//!         locale: "en_US",
//!         child_name: Some("readme.md"),
//!         properties: vec![(QName::new("cm", "title"), PropValue::Str("Readme".into()))],
//!     },
//! )?;
//! txn.commit()?;
//! # let _ = assoc;
//! # Ok(())
//! # }
//! ```

pub mod assoc;
pub mod cache;
pub mod config;
pub mod error;
pub mod node;
pub mod qname;
pub mod store;
pub mod txn;
pub mod types;

pub use assoc::{ChildAssocFilter, ChildAssocRef, NodeAssocRef, ParentAssocFilter};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use node::NodeEntity;
pub use qname::QNameRegistry;
pub use store::{ChildAssocs, GraphStore, NewNodeSpec, Path, PathStep, StoreEntity, TxnQuery};
pub use txn::{Txn, TxnCommit};
