//! Node lifecycle: create, update, move, soft delete, purge, touch.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::assoc::{ChildAssocEntity, ChildAssocRef, ChildNameKey};
use crate::error::{Result, StoreError};
use crate::node::{NodeBuilder, NodeEntity};
use crate::store::GraphStore;
use crate::txn::Txn;
use crate::types::{
    NodeId, NodePair, NodeRef, NodeStatus, NodeVersion, PropValue, QName, StoreRef, TxnId,
};

/// Parameters for [`GraphStore::new_node`].
///
/// A node cannot exist parentless (store roots excepted), so the primary
/// child association is created in the same call. Passing no UUID is the
/// cheaper path: a fresh v4 UUID cannot collide, so no pre-check lookup is
/// wasted on it.
#[derive(Clone, Debug)]
pub struct NewNodeSpec<'a> {
    pub parent_id: NodeId,
    pub assoc_type: &'a QName,
    pub assoc_qname: &'a QName,
    pub store_ref: &'a StoreRef,
    pub uuid: Option<Uuid>,
    pub node_type: &'a QName,
    pub locale: &'a str,
    /// Display name for the primary edge; the UUID is used when absent.
    pub child_name: Option<&'a str>,
    pub properties: Vec<(QName, PropValue)>,
}

impl GraphStore {
    /// Creates a node and its primary child association atomically.
    pub fn new_node(&self, txn: &mut Txn<'_>, spec: NewNodeSpec<'_>) -> Result<ChildAssocRef> {
        let mut tables = self.tables_mut();
        let store_id = *tables.store_by_ref.get(spec.store_ref).ok_or_else(|| {
            StoreError::InvalidArgument(format!("store {} does not exist", spec.store_ref))
        })?;
        if tables.live_node(spec.parent_id).is_none() {
            return Err(StoreError::InvalidArgument(format!(
                "parent node {} does not exist or is deleted",
                spec.parent_id
            )));
        }
        let uuid = spec.uuid.unwrap_or_else(Uuid::new_v4);
        if tables.node_by_uuid.contains_key(&(store_id, uuid)) {
            return Err(StoreError::NodeExists {
                store: spec.store_ref.clone(),
                uuid,
            });
        }
        let type_id = self.qnames().intern(spec.node_type);
        let assoc_type_id = self.qnames().intern(spec.assoc_type);
        let assoc_qname_id = self.qnames().intern(spec.assoc_qname);

        let uuid_name;
        let name = match spec.child_name {
            Some(name) => name,
            None => {
                uuid_name = uuid.to_string();
                &uuid_name
            }
        };
        let name_key = ChildNameKey::new(name, self.config().child_name_key_len);
        self.check_unique_child_name(&tables, spec.parent_id, assoc_type_id, &name_key, None, name)?;

        let ledger = txn.ensure_ledger(&mut tables);
        let node_id = tables.alloc_node_id();
        let node = NodeBuilder::new(node_id, store_id, uuid, type_id, ledger)
            .locale(spec.locale)
            .build();
        tables.insert_node(node);
        txn.observe(node_id, NodeVersion(0));

        if !spec.properties.is_empty() {
            let row = tables.props.entry(node_id).or_default();
            for (qname, value) in &spec.properties {
                row.insert(self.qnames().intern(qname), value.clone());
            }
        }

        let assoc_id = tables.alloc_assoc_id();
        let assoc = ChildAssocEntity {
            id: assoc_id,
            parent_id: spec.parent_id,
            child_id: node_id,
            type_qname_id: assoc_type_id,
            qname_id: assoc_qname_id,
            child_name: name.to_string(),
            name_key,
            is_primary: true,
            assoc_index: 0,
        };
        tables.insert_child_assoc(assoc.clone());
        debug!(node = %node_id, parent = %spec.parent_id, uuid = %uuid, "node created");
        self.child_assoc_ref(&tables, &assoc)
    }

    /// Partial update: only non-`None` fields change. Returns whether
    /// anything actually changed; the version is bumped only then, so
    /// callers can skip downstream invalidation on logical no-ops.
    pub fn update_node(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        new_type: Option<&QName>,
        new_locale: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        let entity = tables
            .nodes
            .get(&node_id)
            .ok_or_else(|| StoreError::InvalidArgument(format!("node {node_id} does not exist")))?;
        let new_type_id = new_type.map(|q| self.qnames().intern(q));
        let type_changed = new_type_id.is_some_and(|t| t != entity.type_qname_id());
        let locale_changed = new_locale.is_some_and(|l| l != entity.locale());
        if !type_changed && !locale_changed {
            return Ok(false);
        }
        self.write_node_row(&mut tables, txn, node_id, |mut b| {
            if let Some(t) = new_type_id {
                b = b.type_qname_id(t);
            }
            if let Some(l) = new_locale {
                b = b.locale(l);
            }
            b
        })?;
        Ok(true)
    }

    /// Soft delete: the row is retyped to the deleted sentinel and stays
    /// inspectable until purged. Idempotent — deleting an already-deleted
    /// node is a no-op, not an error.
    pub fn delete_node(&self, txn: &mut Txn<'_>, node_id: NodeId) -> Result<bool> {
        let mut tables = self.tables_mut();
        let entity = tables
            .nodes
            .get(&node_id)
            .ok_or_else(|| StoreError::InvalidArgument(format!("node {node_id} does not exist")))?;
        if tables.is_deleted(entity) {
            return Ok(false);
        }
        let deleted_type = tables.wk.deleted_type;
        self.write_node_row(&mut tables, txn, node_id, |b| b.type_qname_id(deleted_type))?;
        debug!(node = %node_id, "node soft-deleted");
        Ok(true)
    }

    /// Physically removes already soft-deleted nodes whose owning
    /// transaction committed within `[from_commit_ms, to_commit_ms)`.
    /// Returns the number of nodes purged.
    pub fn purge_nodes(&self, from_commit_ms: u64, to_commit_ms: u64) -> Result<usize> {
        let mut tables = self.tables_mut();
        let victims: Vec<NodeId> = tables
            .nodes
            .values()
            .filter(|n| tables.is_deleted(n))
            .filter(|n| {
                tables
                    .txns
                    .get(&n.txn_id())
                    .and_then(|t| t.commit_time_ms)
                    .is_some_and(|t| t >= from_commit_ms && t < to_commit_ms)
            })
            .map(NodeEntity::id)
            .collect();
        for node_id in &victims {
            let node_id = *node_id;
            if let Some(entity) = tables.nodes.remove(&node_id) {
                tables.node_by_uuid.remove(&(entity.store_id(), entity.uuid()));
            }
            tables.props.remove(&node_id);
            tables.aspects.remove(&node_id);
            let edges: Vec<_> = tables
                .child_by_parent
                .get(&node_id)
                .into_iter()
                .flatten()
                .chain(tables.child_by_child.get(&node_id).into_iter().flatten())
                .copied()
                .collect();
            for assoc_id in edges {
                if let Some(edge) = tables.remove_child_assoc(assoc_id) {
                    // The surviving child's cached parent set still holds
                    // this edge; its version token never changes on a purge.
                    self.parent_cache().invalidate(edge.child_id);
                }
            }
            let peers: Vec<_> = tables
                .peer_by_source
                .get(&node_id)
                .into_iter()
                .flatten()
                .chain(tables.peer_by_target.get(&node_id).into_iter().flatten())
                .copied()
                .collect();
            for assoc_id in peers {
                tables.remove_node_assoc_row(assoc_id);
            }
            self.parent_cache().invalidate(node_id);
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), from_commit_ms, to_commit_ms, "purged deleted nodes");
        }
        Ok(victims.len())
    }

    /// Reassigns a batch of nodes to the unit of work's ledger entry
    /// without content change, forcing cache/index invalidation after
    /// out-of-band changes. Unknown nodes are skipped. Returns the number
    /// of nodes touched.
    pub fn touch_nodes(&self, txn: &mut Txn<'_>, node_ids: &[NodeId]) -> Result<usize> {
        let mut tables = self.tables_mut();
        let mut touched = 0;
        for &node_id in node_ids {
            if !tables.nodes.contains_key(&node_id) {
                warn!(node = %node_id, "touch skipped unknown node");
                continue;
            }
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
            touched += 1;
        }
        Ok(touched)
    }

    /*
     * Lookups
     */

    /// Whether a live (undeleted) node exists for the reference.
    pub fn exists(&self, node_ref: &NodeRef) -> bool {
        let tables = self.tables();
        let Some(&store_id) = tables.store_by_ref.get(&node_ref.store) else {
            return false;
        };
        tables
            .node_by_uuid
            .get(&(store_id, node_ref.uuid))
            .and_then(|id| tables.live_node(*id))
            .is_some()
    }

    /// Whether a live (undeleted) node exists for the ID.
    pub fn exists_id(&self, node_id: NodeId) -> bool {
        self.tables().live_node(node_id).is_some()
    }

    /// Current status by reference, deleted rows included. `None` only for
    /// rows that never existed or were purged.
    pub fn node_status(&self, node_ref: &NodeRef) -> Result<Option<NodeStatus>> {
        let tables = self.tables();
        let Some(&store_id) = tables.store_by_ref.get(&node_ref.store) else {
            return Ok(None);
        };
        let Some(&node_id) = tables.node_by_uuid.get(&(store_id, node_ref.uuid)) else {
            return Ok(None);
        };
        drop(tables);
        self.node_id_status(node_id)
    }

    /// Current status by ID, deleted rows included.
    pub fn node_id_status(&self, node_id: NodeId) -> Result<Option<NodeStatus>> {
        let tables = self.tables();
        let Some(entity) = tables.node(node_id) else {
            return Ok(None);
        };
        Ok(Some(NodeStatus {
            id: node_id,
            node_ref: tables.node_ref(entity)?,
            txn_id: entity.txn_id(),
            deleted: tables.is_deleted(entity),
        }))
    }

    /// ID-reference pair for a live node.
    pub fn node_pair(&self, node_ref: &NodeRef) -> Result<Option<NodePair>> {
        let tables = self.tables();
        let Some(&store_id) = tables.store_by_ref.get(&node_ref.store) else {
            return Ok(None);
        };
        let Some(&node_id) = tables.node_by_uuid.get(&(store_id, node_ref.uuid)) else {
            return Ok(None);
        };
        if tables.live_node(node_id).is_none() {
            return Ok(None);
        }
        tables.node_pair(node_id)
    }

    /// ID-reference pair for a live node, by ID.
    pub fn node_pair_by_id(&self, node_id: NodeId) -> Result<Option<NodePair>> {
        let tables = self.tables();
        if tables.live_node(node_id).is_none() {
            return Ok(None);
        }
        tables.node_pair(node_id)
    }

    /// Full row snapshot by ID, deleted rows included. The observed version
    /// is recorded on the unit of work for later stale-write detection.
    pub fn read_node(&self, txn: &mut Txn<'_>, node_id: NodeId) -> Option<NodeEntity> {
        let entity = self.tables().node(node_id).cloned()?;
        txn.observe(node_id, entity.version());
        Some(entity)
    }

    /// Row snapshot without snapshot tracking.
    pub fn node(&self, node_id: NodeId) -> Option<NodeEntity> {
        self.tables().node(node_id).cloned()
    }

    pub fn node_type(&self, node_id: NodeId) -> Result<Option<QName>> {
        match self.tables().node(node_id) {
            Some(entity) => self.resolve_qname(entity.type_qname_id()).map(Some),
            None => Ok(None),
        }
    }

    pub fn node_acl_id(&self, node_id: NodeId) -> Option<u64> {
        self.tables().node(node_id).and_then(NodeEntity::acl_id)
    }

    pub fn set_node_acl_id(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        acl_id: Option<u64>,
    ) -> Result<()> {
        let mut tables = self.tables_mut();
        self.write_node_row(&mut tables, txn, node_id, |b| b.acl_id(acl_id))?;
        Ok(())
    }

    /// ACL propagation: rewrites the ACL reference on all primary children
    /// of a parent whose current ACL matches `old_shared_acl_id` (or is
    /// unset). Returns the number of children updated.
    pub fn set_primary_children_shared_acl_id(
        &self,
        txn: &mut Txn<'_>,
        parent_id: NodeId,
        old_shared_acl_id: Option<u64>,
        new_shared_acl_id: Option<u64>,
    ) -> Result<usize> {
        let mut tables = self.tables_mut();
        let children: Vec<NodeId> = tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| a.is_primary)
            .map(|a| a.child_id)
            .collect();
        let mut updated = 0;
        for child_id in children {
            let Some(entity) = tables.nodes.get(&child_id) else {
                continue;
            };
            let acl = entity.acl_id();
            if acl != old_shared_acl_id && acl.is_some() {
                continue;
            }
            self.write_node_row(&mut tables, txn, child_id, |b| b.acl_id(new_shared_acl_id))?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Minimum node ID, or `None` when there are no nodes.
    pub fn min_node_id(&self) -> Option<NodeId> {
        self.tables().nodes.keys().next().copied()
    }

    /// Maximum node ID, or `None` when there are no nodes.
    pub fn max_node_id(&self) -> Option<NodeId> {
        self.tables().nodes.keys().next_back().copied()
    }

    /// The `[min, max]` node-ID interval for nodes of a type whose owning
    /// transaction committed within the given window. Either bound of the
    /// window may be open.
    pub fn node_ids_interval_for_type(
        &self,
        type_qname: &QName,
        start_commit_ms: Option<u64>,
        end_commit_ms: Option<u64>,
    ) -> Result<Option<(NodeId, NodeId)>> {
        let tables = self.tables();
        let Some(type_id) = self.qnames().id(type_qname) else {
            return Ok(None);
        };
        let mut interval: Option<(NodeId, NodeId)> = None;
        for entity in tables.nodes.values() {
            if entity.type_qname_id() != type_id {
                continue;
            }
            let Some(commit) = tables
                .txns
                .get(&entity.txn_id())
                .and_then(|t| t.commit_time_ms)
            else {
                continue;
            };
            if start_commit_ms.is_some_and(|s| commit < s)
                || end_commit_ms.is_some_and(|e| commit > e)
            {
                continue;
            }
            interval = Some(match interval {
                None => (entity.id(), entity.id()),
                Some((min, max)) => (min.min(entity.id()), max.max(entity.id())),
            });
        }
        Ok(interval)
    }

    /*
     * Move
     */

    /// Reparents a node, rewriting its primary association.
    ///
    /// A same-store move mutates the existing primary edge. A move across a
    /// store boundary instead creates a NEW node row in the destination
    /// store (node identity is store-scoped), re-homes properties, aspects
    /// and edges onto it, and soft-deletes the source row so the regular
    /// purge sweep collects it.
    ///
    /// The cycle check runs before any row is mutated.
    pub fn move_node(
        &self,
        txn: &mut Txn<'_>,
        child_id: NodeId,
        new_parent_id: NodeId,
        assoc_type: Option<&QName>,
        assoc_qname: Option<&QName>,
    ) -> Result<(ChildAssocRef, NodePair)> {
        let mut tables = self.tables_mut();
        let child = tables
            .live_node(child_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!("node {child_id} does not exist or is deleted"))
            })?;
        let parent = tables
            .live_node(new_parent_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "parent node {new_parent_id} does not exist or is deleted"
                ))
            })?;
        txn.check_conflict(child_id, child.version())?;

        // Reject before mutating anything.
        if self.would_create_cycle(&tables, child_id, new_parent_id) {
            return Err(StoreError::CyclicRelationship(child_id));
        }

        let old_primary = tables
            .child_by_child
            .get(&child_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .find(|a| a.is_primary)
            .cloned()
            .ok_or_else(|| {
                StoreError::Integrity(format!("non-root node {child_id} has no primary parent"))
            })?;

        let type_id = match assoc_type {
            Some(q) => self.qnames().intern(q),
            None => old_primary.type_qname_id,
        };
        let qname_id = match assoc_qname {
            Some(q) => self.qnames().intern(q),
            None => old_primary.qname_id,
        };

        self.check_unique_child_name(
            &tables,
            new_parent_id,
            type_id,
            &old_primary.name_key,
            Some(old_primary.id),
            &old_primary.child_name,
        )?;

        if child.store_id() == parent.store_id() {
            // Same-store: rewrite the primary edge in place.
            let mut assoc = old_primary.clone();
            tables.remove_child_assoc(assoc.id);
            assoc.parent_id = new_parent_id;
            assoc.type_qname_id = type_id;
            assoc.qname_id = qname_id;
            tables.insert_child_assoc(assoc.clone());
            self.write_node_row(&mut tables, txn, child_id, |b| b)?;
            debug!(child = %child_id, parent = %new_parent_id, "node moved (same store)");
            let assoc_ref = self.child_assoc_ref(&tables, &assoc)?;
            let pair = tables.node_pair(child_id)?.ok_or_else(|| {
                StoreError::Integrity("moved node vanished".into())
            })?;
            return Ok((assoc_ref, pair));
        }

        // Cross-store: a fresh row takes over the identity in the new store.
        if tables
            .node_by_uuid
            .contains_key(&(parent.store_id(), child.uuid()))
        {
            let store = tables
                .store_ref_of(parent.store_id())
                .cloned()
                .ok_or_else(|| {
                    StoreError::Integrity(format!(
                        "parent node {new_parent_id} references missing store"
                    ))
                })?;
            return Err(StoreError::NodeExists {
                store,
                uuid: child.uuid(),
            });
        }
        let ledger = txn.ensure_ledger(&mut tables);
        let new_id = tables.alloc_node_id();
        let new_node = NodeBuilder::new(
            new_id,
            parent.store_id(),
            child.uuid(),
            child.type_qname_id(),
            ledger,
        )
        .locale(child.locale())
        .acl_id(child.acl_id())
        .shard_key(child.shard_key())
        .explicit_shard_id(child.explicit_shard_id())
        .build();
        tables.insert_node(new_node);
        txn.observe(new_id, NodeVersion(0));

        // Re-home attributes and every edge except the old primary parent.
        if let Some(props) = tables.props.remove(&child_id) {
            tables.props.insert(new_id, props);
        }
        if let Some(aspects) = tables.aspects.remove(&child_id) {
            tables.aspects.insert(new_id, aspects);
        }
        let edges: Vec<_> = tables
            .child_by_parent
            .get(&child_id)
            .into_iter()
            .flatten()
            .chain(tables.child_by_child.get(&child_id).into_iter().flatten())
            .copied()
            .collect();
        for assoc_id in edges {
            if assoc_id == old_primary.id {
                continue;
            }
            if let Some(mut assoc) = tables.remove_child_assoc(assoc_id) {
                if assoc.parent_id == child_id {
                    assoc.parent_id = new_id;
                }
                if assoc.child_id == child_id {
                    assoc.child_id = new_id;
                }
                tables.insert_child_assoc(assoc);
            }
        }
        let peers: Vec<_> = tables
            .peer_by_source
            .get(&child_id)
            .into_iter()
            .flatten()
            .chain(tables.peer_by_target.get(&child_id).into_iter().flatten())
            .copied()
            .collect();
        for assoc_id in peers {
            if let Some(mut assoc) = tables.remove_node_assoc_row(assoc_id) {
                if assoc.source_id == child_id {
                    assoc.source_id = new_id;
                }
                if assoc.target_id == child_id {
                    assoc.target_id = new_id;
                }
                tables.insert_node_assoc(assoc);
            }
        }
        tables.remove_child_assoc(old_primary.id);

        let assoc_id = tables.alloc_assoc_id();
        let assoc = ChildAssocEntity {
            id: assoc_id,
            parent_id: new_parent_id,
            child_id: new_id,
            type_qname_id: type_id,
            qname_id,
            child_name: old_primary.child_name.clone(),
            name_key: old_primary.name_key.clone(),
            is_primary: true,
            assoc_index: 0,
        };
        tables.insert_child_assoc(assoc.clone());

        // The source row stays behind soft-deleted; the ledger/purge
        // interaction for this orphan is the same as for any deleted node.
        let deleted_type = tables.wk.deleted_type;
        self.write_node_row(&mut tables, txn, child_id, |b| b.type_qname_id(deleted_type))?;
        self.parent_cache().invalidate(child_id);
        self.parent_cache().invalidate(new_id);
        debug!(
            child = %child_id,
            new_node = %new_id,
            parent = %new_parent_id,
            "node moved across stores"
        );
        let assoc_ref = self.child_assoc_ref(&tables, &assoc)?;
        let pair = tables.node_pair(new_id)?.ok_or_else(|| {
            StoreError::Integrity("moved node vanished".into())
        })?;
        Ok((assoc_ref, pair))
    }

    /// Transaction ID a node row was last written under, or `None` for
    /// unknown/purged rows.
    pub fn node_txn_id(&self, node_id: NodeId) -> Option<TxnId> {
        self.tables().node(node_id).map(NodeEntity::txn_id)
    }
}
