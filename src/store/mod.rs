//! The graph store: table set, shared services, and store-partition CRUD.
//!
//! Backend layout follows the conceptual schema of the persistence core:
//! node rows keyed by surrogate ID with a (store, uuid) unique index, child
//! and peer association rows with parent/child/source/target secondary
//! indexes, sparse property and aspect tables, and the append-only
//! transaction ledger. The tables live behind one `RwLock`; every operation
//! is a single lock scope, which is also what makes single-row version
//! increments atomic.

mod assocs;
mod nodes;
mod props;
mod query;
mod txns;

pub use assocs::ChildAssocs;
pub use nodes::NewNodeSpec;
pub use query::{Path, PathStep};
pub use txns::TxnQuery;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::assoc::{ChildAssocEntity, ChildAssocRef, NodeAssocEntity, NodeAssocRef};
use crate::cache::ParentAssocsCache;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::node::{NodeBuilder, NodeEntity};
use crate::qname::QNameRegistry;
use crate::txn::{now_ms, Txn, TxnEntity};
use crate::types::{
    sys, AssocId, NodeId, NodePair, NodeRef, PropValue, QName, QNameId, StoreId, StoreRef, TxnId,
};

/// One store partition row.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreEntity {
    pub id: StoreId,
    pub store_ref: StoreRef,
    pub root_node_id: NodeId,
}

/// Pre-interned system QName IDs.
#[derive(Copy, Clone, Debug)]
pub(crate) struct WellKnown {
    pub deleted_type: QNameId,
    pub store_root_type: QNameId,
    pub root_aspect: QNameId,
    pub children_assoc: QNameId,
}

/// The full backing table set. One instance per `GraphStore`, guarded by a
/// single reader-writer lock.
pub(crate) struct Tables {
    next_store_id: u64,
    next_node_id: u64,
    next_assoc_id: u64,
    next_txn_id: u64,
    pub stores: BTreeMap<StoreId, StoreEntity>,
    pub store_by_ref: FxHashMap<StoreRef, StoreId>,
    pub nodes: BTreeMap<NodeId, NodeEntity>,
    pub node_by_uuid: FxHashMap<(StoreId, Uuid), NodeId>,
    pub child_assocs: BTreeMap<AssocId, ChildAssocEntity>,
    pub child_by_parent: BTreeMap<NodeId, BTreeSet<AssocId>>,
    pub child_by_child: BTreeMap<NodeId, BTreeSet<AssocId>>,
    pub node_assocs: BTreeMap<AssocId, NodeAssocEntity>,
    pub peer_by_source: BTreeMap<NodeId, BTreeSet<AssocId>>,
    pub peer_by_target: BTreeMap<NodeId, BTreeSet<AssocId>>,
    pub props: BTreeMap<NodeId, BTreeMap<QNameId, PropValue>>,
    pub aspects: BTreeMap<NodeId, BTreeSet<QNameId>>,
    pub txns: BTreeMap<TxnId, TxnEntity>,
    last_commit_time_ms: u64,
    pub(crate) wk: WellKnown,
}

impl Tables {
    fn new(wk: WellKnown) -> Self {
        Self {
            next_store_id: 1,
            next_node_id: 1,
            next_assoc_id: 1,
            next_txn_id: 1,
            stores: BTreeMap::new(),
            store_by_ref: FxHashMap::default(),
            nodes: BTreeMap::new(),
            node_by_uuid: FxHashMap::default(),
            child_assocs: BTreeMap::new(),
            child_by_parent: BTreeMap::new(),
            child_by_child: BTreeMap::new(),
            node_assocs: BTreeMap::new(),
            peer_by_source: BTreeMap::new(),
            peer_by_target: BTreeMap::new(),
            props: BTreeMap::new(),
            aspects: BTreeMap::new(),
            txns: BTreeMap::new(),
            last_commit_time_ms: 0,
            wk,
        }
    }

    pub(crate) fn alloc_store_id(&mut self) -> StoreId {
        let id = StoreId(self.next_store_id);
        self.next_store_id += 1;
        id
    }

    pub(crate) fn alloc_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    pub(crate) fn alloc_assoc_id(&mut self) -> AssocId {
        let id = AssocId(self.next_assoc_id);
        self.next_assoc_id += 1;
        id
    }

    pub(crate) fn new_txn(&mut self, server: String, change_txn_id: String) -> TxnId {
        let id = TxnId(self.next_txn_id);
        self.next_txn_id += 1;
        self.txns.insert(
            id,
            TxnEntity {
                id,
                server,
                change_txn_id,
                commit_time_ms: None,
            },
        );
        id
    }

    pub(crate) fn is_deleted(&self, entity: &NodeEntity) -> bool {
        entity.type_qname_id() == self.wk.deleted_type
    }

    /// Node row lookup, soft-deleted rows included.
    pub(crate) fn node(&self, id: NodeId) -> Option<&NodeEntity> {
        self.nodes.get(&id)
    }

    /// Node row lookup, live rows only.
    pub(crate) fn live_node(&self, id: NodeId) -> Option<&NodeEntity> {
        self.nodes.get(&id).filter(|n| !self.is_deleted(n))
    }

    pub(crate) fn store_ref_of(&self, store_id: StoreId) -> Option<&StoreRef> {
        self.stores.get(&store_id).map(|s| &s.store_ref)
    }

    pub(crate) fn node_ref(&self, entity: &NodeEntity) -> Result<NodeRef> {
        let store = self
            .store_ref_of(entity.store_id())
            .ok_or_else(|| {
                StoreError::Integrity(format!(
                    "node {} references missing store {:?}",
                    entity.id(),
                    entity.store_id()
                ))
            })?
            .clone();
        Ok(NodeRef {
            store,
            uuid: entity.uuid(),
        })
    }

    pub(crate) fn node_pair(&self, id: NodeId) -> Result<Option<NodePair>> {
        match self.nodes.get(&id) {
            Some(entity) => Ok(Some(NodePair {
                id,
                node_ref: self.node_ref(entity)?,
            })),
            None => Ok(None),
        }
    }

    pub(crate) fn insert_node(&mut self, entity: NodeEntity) {
        self.node_by_uuid
            .insert((entity.store_id(), entity.uuid()), entity.id());
        self.nodes.insert(entity.id(), entity);
    }

    pub(crate) fn insert_child_assoc(&mut self, entity: ChildAssocEntity) {
        self.child_by_parent
            .entry(entity.parent_id)
            .or_default()
            .insert(entity.id);
        self.child_by_child
            .entry(entity.child_id)
            .or_default()
            .insert(entity.id);
        self.child_assocs.insert(entity.id, entity);
    }

    pub(crate) fn remove_child_assoc(&mut self, assoc_id: AssocId) -> Option<ChildAssocEntity> {
        let entity = self.child_assocs.remove(&assoc_id)?;
        if let Some(set) = self.child_by_parent.get_mut(&entity.parent_id) {
            set.remove(&assoc_id);
        }
        if let Some(set) = self.child_by_child.get_mut(&entity.child_id) {
            set.remove(&assoc_id);
        }
        Some(entity)
    }

    pub(crate) fn insert_node_assoc(&mut self, entity: NodeAssocEntity) {
        self.peer_by_source
            .entry(entity.source_id)
            .or_default()
            .insert(entity.id);
        self.peer_by_target
            .entry(entity.target_id)
            .or_default()
            .insert(entity.id);
        self.node_assocs.insert(entity.id, entity);
    }

    pub(crate) fn remove_node_assoc_row(&mut self, assoc_id: AssocId) -> Option<NodeAssocEntity> {
        let entity = self.node_assocs.remove(&assoc_id)?;
        if let Some(set) = self.peer_by_source.get_mut(&entity.source_id) {
            set.remove(&assoc_id);
        }
        if let Some(set) = self.peer_by_target.get_mut(&entity.target_id) {
            set.remove(&assoc_id);
        }
        Some(entity)
    }
}

/// An embeddable, versioned node-graph store.
///
/// Construct once, share by reference (or `Arc`) across threads. All
/// mutations run through a [`Txn`] obtained from [`GraphStore::begin`].
pub struct GraphStore {
    cfg: StoreConfig,
    qnames: Arc<QNameRegistry>,
    parent_assocs_cache: ParentAssocsCache,
    tables: RwLock<Tables>,
}

impl GraphStore {
    pub fn new(cfg: StoreConfig) -> Self {
        Self::with_registry(cfg, Arc::new(QNameRegistry::new()))
    }

    /// Constructs a store sharing an externally owned QName registry.
    pub fn with_registry(cfg: StoreConfig, qnames: Arc<QNameRegistry>) -> Self {
        let wk = WellKnown {
            deleted_type: qnames.intern(&sys::deleted_type()),
            store_root_type: qnames.intern(&sys::store_root_type()),
            root_aspect: qnames.intern(&sys::root_aspect()),
            children_assoc: qnames.intern(&sys::children_assoc()),
        };
        info!(server = %cfg.server, "graph store initialized");
        Self {
            parent_assocs_cache: ParentAssocsCache::new(cfg.parent_assocs_cache_weight),
            qnames,
            tables: RwLock::new(Tables::new(wk)),
            cfg,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.cfg
    }

    pub fn qnames(&self) -> &Arc<QNameRegistry> {
        &self.qnames
    }

    /// Opens a new unit of work.
    pub fn begin(&self) -> Txn<'_> {
        Txn::new(self)
    }

    pub(crate) fn tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read()
    }

    pub(crate) fn tables_mut(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write()
    }

    pub(crate) fn parent_cache(&self) -> &ParentAssocsCache {
        &self.parent_assocs_cache
    }

    /// Stamps the ledger entry's commit time, clamped monotonic
    /// non-decreasing across entries.
    pub(crate) fn stamp_commit(&self, txn_id: TxnId) -> Result<u64> {
        let mut tables = self.tables.write();
        let t = now_ms().max(tables.last_commit_time_ms);
        let entry = tables.txns.get_mut(&txn_id).ok_or_else(|| {
            StoreError::Integrity(format!("commit of unknown ledger entry {txn_id}"))
        })?;
        entry.commit_time_ms = Some(t);
        tables.last_commit_time_ms = t;
        Ok(t)
    }

    pub(crate) fn resolve_qname(&self, id: QNameId) -> Result<QName> {
        self.qnames
            .qname(id)
            .ok_or_else(|| StoreError::Integrity(format!("dangling qname id {id}")))
    }

    pub(crate) fn child_assoc_ref(
        &self,
        tables: &Tables,
        entity: &ChildAssocEntity,
    ) -> Result<ChildAssocRef> {
        let parent = tables.node_pair(entity.parent_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("assoc {} has dangling parent", entity.id))
        })?;
        let child = tables.node_pair(entity.child_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("assoc {} has dangling child", entity.id))
        })?;
        Ok(ChildAssocRef {
            id: entity.id,
            parent,
            child,
            type_qname: self.resolve_qname(entity.type_qname_id)?,
            qname: self.resolve_qname(entity.qname_id)?,
            child_name: entity.child_name.clone(),
            is_primary: entity.is_primary,
            index: entity.assoc_index,
        })
    }

    pub(crate) fn node_assoc_ref(
        &self,
        tables: &Tables,
        entity: &NodeAssocEntity,
    ) -> Result<NodeAssocRef> {
        let source = tables.node_pair(entity.source_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("assoc {} has dangling source", entity.id))
        })?;
        let target = tables.node_pair(entity.target_id)?.ok_or_else(|| {
            StoreError::Integrity(format!("assoc {} has dangling target", entity.id))
        })?;
        Ok(NodeAssocRef {
            id: entity.id,
            source,
            target,
            type_qname: self.resolve_qname(entity.type_qname_id)?,
            index: entity.assoc_index,
        })
    }

    /// Central node-row mutation path: conflict check against the unit of
    /// work's snapshot, version bump, ledger attribution, cache
    /// invalidation. Every write funnels through here.
    pub(crate) fn write_node_row<F>(
        &self,
        tables: &mut Tables,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        f: F,
    ) -> Result<NodeEntity>
    where
        F: FnOnce(NodeBuilder) -> NodeBuilder,
    {
        let entity = tables
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidArgument(format!("node {node_id} does not exist")))?;
        txn.check_conflict(node_id, entity.version())?;
        let ledger = txn.ensure_ledger(tables);
        let updated = f(entity
            .to_builder()
            .version(entity.version().next())
            .txn_id(ledger))
        .build();
        tables.nodes.insert(node_id, updated.clone());
        txn.observe(node_id, updated.version());
        self.parent_assocs_cache.invalidate(node_id);
        Ok(updated)
    }

    /*
     * Store partitions
     */

    /// Creates a store partition and its root node. The root carries the
    /// root aspect and needs no parent.
    pub fn new_store(&self, txn: &mut Txn<'_>, store_ref: &StoreRef) -> Result<NodePair> {
        let mut tables = self.tables.write();
        if tables.store_by_ref.contains_key(store_ref) {
            return Err(StoreError::StoreExists(store_ref.clone()));
        }
        let ledger = txn.ensure_ledger(&mut tables);
        let store_id = tables.alloc_store_id();
        let node_id = tables.alloc_node_id();
        let uuid = Uuid::new_v4();
        let wk = tables.wk;
        let root = NodeBuilder::new(node_id, store_id, uuid, wk.store_root_type, ledger).build();
        tables.insert_node(root);
        tables.aspects.entry(node_id).or_default().insert(wk.root_aspect);
        tables.stores.insert(
            store_id,
            StoreEntity {
                id: store_id,
                store_ref: store_ref.clone(),
                root_node_id: node_id,
            },
        );
        tables.store_by_ref.insert(store_ref.clone(), store_id);
        txn.observe(node_id, crate::types::NodeVersion(0));
        debug!(store = %store_ref, root = %node_id, "store created");
        tables.node_pair(node_id)?.ok_or_else(|| {
            StoreError::Integrity("root node vanished during store creation".into())
        })
    }

    /// The ID for a store reference, or `None` if it does not exist.
    pub fn store(&self, store_ref: &StoreRef) -> Option<StoreId> {
        self.tables.read().store_by_ref.get(store_ref).copied()
    }

    pub fn store_exists(&self, store_ref: &StoreRef) -> bool {
        self.store(store_ref).is_some()
    }

    pub fn stores(&self) -> Vec<(StoreId, StoreRef)> {
        self.tables
            .read()
            .stores
            .values()
            .map(|s| (s.id, s.store_ref.clone()))
            .collect()
    }

    /// Renames a store partition. Node identity is surrogate-ID based, so
    /// rows are untouched; only the root is touched so downstream caches
    /// and indexers see the change.
    pub fn move_store(
        &self,
        txn: &mut Txn<'_>,
        old_ref: &StoreRef,
        new_ref: &StoreRef,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.store_by_ref.contains_key(new_ref) {
            return Err(StoreError::StoreExists(new_ref.clone()));
        }
        let store_id = tables.store_by_ref.remove(old_ref).ok_or_else(|| {
            StoreError::InvalidArgument(format!("store {old_ref} does not exist"))
        })?;
        let root_node_id = {
            let entry = tables.stores.get_mut(&store_id).ok_or_else(|| {
                StoreError::Integrity(format!("store index points at missing store {old_ref}"))
            })?;
            entry.store_ref = new_ref.clone();
            entry.root_node_id
        };
        tables.store_by_ref.insert(new_ref.clone(), store_id);
        self.write_node_row(&mut tables, txn, root_node_id, |b| b)?;
        debug!(old = %old_ref, new = %new_ref, "store moved");
        Ok(())
    }

    /// The root node of a store, or `None` if the store does not exist.
    pub fn root_node(&self, store_ref: &StoreRef) -> Result<Option<NodePair>> {
        let tables = self.tables.read();
        let Some(&store_id) = tables.store_by_ref.get(store_ref) else {
            return Ok(None);
        };
        let root_id = tables.stores[&store_id].root_node_id;
        tables.node_pair(root_id)
    }

    /// All live nodes of a store carrying the root aspect.
    pub fn all_root_nodes(&self, store_ref: &StoreRef) -> Result<Vec<NodePair>> {
        let tables = self.tables.read();
        let Some(&store_id) = tables.store_by_ref.get(store_ref) else {
            return Ok(Vec::new());
        };
        let root_aspect = tables.wk.root_aspect;
        let mut out = Vec::new();
        for (node_id, aspects) in &tables.aspects {
            if !aspects.contains(&root_aspect) {
                continue;
            }
            let Some(entity) = tables.live_node(*node_id) else {
                continue;
            };
            if entity.store_id() != store_id {
                continue;
            }
            if let Some(pair) = tables.node_pair(*node_id)? {
                out.push(pair);
            }
        }
        Ok(out)
    }
}
