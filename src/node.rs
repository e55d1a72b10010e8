//! Node entity snapshot and its builder.
//!
//! Rows handed out by the engine (and held in caches) are immutable
//! `NodeEntity` values; all construction and modification goes through
//! `NodeBuilder`, so a shared snapshot can never be mutated by a holder
//! that wrongly assumes exclusive ownership.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{NodeId, NodeVersion, QNameId, StoreId, TxnId};

/// Immutable snapshot of one node row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeEntity {
    id: NodeId,
    store_id: StoreId,
    uuid: Uuid,
    version: NodeVersion,
    type_qname_id: QNameId,
    locale: String,
    acl_id: Option<u64>,
    shard_key: Option<u32>,
    explicit_shard_id: Option<u32>,
    txn_id: TxnId,
}

impl NodeEntity {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn version(&self) -> NodeVersion {
        self.version
    }

    pub fn type_qname_id(&self) -> QNameId {
        self.type_qname_id
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn acl_id(&self) -> Option<u64> {
        self.acl_id
    }

    pub fn shard_key(&self) -> Option<u32> {
        self.shard_key
    }

    pub fn explicit_shard_id(&self) -> Option<u32> {
        self.explicit_shard_id
    }

    /// Ledger entry the row was last written under.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Re-opens the snapshot for modification. The version is NOT bumped
    /// here; the store bumps it exactly once per successful mutation.
    pub fn to_builder(&self) -> NodeBuilder {
        NodeBuilder {
            entity: self.clone(),
        }
    }
}

/// Mutable construction handle for `NodeEntity`.
#[derive(Debug)]
pub struct NodeBuilder {
    entity: NodeEntity,
}

impl NodeBuilder {
    pub fn new(
        id: NodeId,
        store_id: StoreId,
        uuid: Uuid,
        type_qname_id: QNameId,
        txn_id: TxnId,
    ) -> Self {
        Self {
            entity: NodeEntity {
                id,
                store_id,
                uuid,
                version: NodeVersion(0),
                type_qname_id,
                locale: String::new(),
                acl_id: None,
                shard_key: None,
                explicit_shard_id: None,
                txn_id,
            },
        }
    }

    pub fn version(mut self, version: NodeVersion) -> Self {
        self.entity.version = version;
        self
    }

    pub fn type_qname_id(mut self, type_qname_id: QNameId) -> Self {
        self.entity.type_qname_id = type_qname_id;
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.entity.locale = locale.into();
        self
    }

    pub fn acl_id(mut self, acl_id: Option<u64>) -> Self {
        self.entity.acl_id = acl_id;
        self
    }

    pub fn shard_key(mut self, shard_key: Option<u32>) -> Self {
        self.entity.shard_key = shard_key;
        self
    }

    pub fn explicit_shard_id(mut self, explicit_shard_id: Option<u32>) -> Self {
        self.entity.explicit_shard_id = explicit_shard_id;
        self
    }

    pub fn txn_id(mut self, txn_id: TxnId) -> Self {
        self.entity.txn_id = txn_id;
        self
    }

    pub fn build(self) -> NodeEntity {
        self.entity
    }
}
