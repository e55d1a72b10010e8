//! Child and peer association operations: creation with unique-name
//! enforcement, filtered scans, anti-joins, and index maintenance.

use std::collections::BTreeSet;

use tracing::debug;

use crate::assoc::{
    ChildAssocEntity, ChildAssocFilter, ChildAssocRef, ChildNameKey, NodeAssocEntity,
    NodeAssocRef, ParentAssocFilter,
};
use crate::cache::ParentAssocsInfo;
use crate::error::{Result, StoreError};
use crate::store::{GraphStore, Tables};
use crate::txn::Txn;
use crate::types::{AssocId, NodeId, NodePair, PropValue, QName, QNameId};

/// Snapshot sequence of child-association rows.
///
/// Lazy to the consumer — dropping it early terminates the scan — and
/// restartable by reissuing the query. Row order is arbitrary unless the
/// filter requested ordering.
pub struct ChildAssocs {
    inner: std::vec::IntoIter<ChildAssocRef>,
}

impl ChildAssocs {
    fn new(rows: Vec<ChildAssocRef>) -> Self {
        Self {
            inner: rows.into_iter(),
        }
    }
}

impl Iterator for ChildAssocs {
    type Item = ChildAssocRef;

    fn next(&mut self) -> Option<ChildAssocRef> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ChildAssocs {}

impl GraphStore {
    /// Fails when a live child of `parent_id` under `type_qname_id` already
    /// holds a case-insensitively equal name.
    pub(crate) fn check_unique_child_name(
        &self,
        tables: &Tables,
        parent_id: NodeId,
        type_qname_id: QNameId,
        name_key: &ChildNameKey,
        exclude: Option<AssocId>,
        name: &str,
    ) -> Result<()> {
        let collision = tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| a.type_qname_id == type_qname_id && &a.name_key == name_key)
            .any(|a| tables.live_node(a.child_id).is_some());
        if collision {
            return Err(StoreError::DuplicateChildName {
                parent: parent_id,
                assoc_type: self.resolve_qname(type_qname_id)?,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Creates a secondary child association. The unique-name constraint is
    /// enforced here, at creation — retrofitting uniqueness after a race
    /// would be unsafe.
    pub fn new_child_assoc(
        &self,
        txn: &mut Txn<'_>,
        parent_id: NodeId,
        child_id: NodeId,
        assoc_type: &QName,
        assoc_qname: &QName,
        child_name: Option<&str>,
    ) -> Result<ChildAssocRef> {
        let mut tables = self.tables_mut();
        if tables.live_node(parent_id).is_none() {
            return Err(StoreError::InvalidArgument(format!(
                "parent node {parent_id} does not exist or is deleted"
            )));
        }
        let child = tables.live_node(child_id).cloned().ok_or_else(|| {
            StoreError::InvalidArgument(format!("child node {child_id} does not exist or is deleted"))
        })?;
        let type_id = self.qnames().intern(assoc_type);
        let qname_id = self.qnames().intern(assoc_qname);
        let uuid_name;
        let name = match child_name {
            Some(name) => name,
            None => {
                uuid_name = child.uuid().to_string();
                &uuid_name
            }
        };
        let name_key = ChildNameKey::new(name, self.config().child_name_key_len);
        self.check_unique_child_name(&tables, parent_id, type_id, &name_key, None, name)?;

        txn.ensure_ledger(&mut tables);
        let assoc_id = tables.alloc_assoc_id();
        let assoc = ChildAssocEntity {
            id: assoc_id,
            parent_id,
            child_id,
            type_qname_id: type_id,
            qname_id,
            child_name: name.to_string(),
            name_key,
            is_primary: false,
            assoc_index: 0,
        };
        tables.insert_child_assoc(assoc.clone());
        self.write_node_row(&mut tables, txn, child_id, |b| b)?;
        debug!(assoc = %assoc_id, parent = %parent_id, child = %child_id, "child assoc created");
        self.child_assoc_ref(&tables, &assoc)
    }

    /// Deletes a secondary child association. Absent IDs are a no-op.
    /// Primary associations are structural and can only be rewritten
    /// through a move.
    pub fn delete_child_assoc(&self, txn: &mut Txn<'_>, assoc_id: AssocId) -> Result<bool> {
        let mut tables = self.tables_mut();
        let Some(assoc) = tables.child_assocs.get(&assoc_id).cloned() else {
            return Ok(false);
        };
        if assoc.is_primary {
            return Err(StoreError::InvalidArgument(format!(
                "assoc {assoc_id} is a primary association; move the node instead"
            )));
        }
        tables.remove_child_assoc(assoc_id);
        self.write_node_row(&mut tables, txn, assoc.child_id, |b| b)?;
        debug!(assoc = %assoc_id, "child assoc deleted");
        Ok(true)
    }

    /// Sets the ordering index on matching associations. Returns the number
    /// of rows modified.
    pub fn set_child_assoc_index(
        &self,
        txn: &mut Txn<'_>,
        parent_id: NodeId,
        child_id: NodeId,
        assoc_type: &QName,
        assoc_qname: &QName,
        index: i32,
    ) -> Result<usize> {
        if index < 0 {
            return Err(StoreError::InvalidArgument(
                "association index must not be negative".into(),
            ));
        }
        let mut tables = self.tables_mut();
        let (Some(type_id), Some(qname_id)) =
            (self.qnames().id(assoc_type), self.qnames().id(assoc_qname))
        else {
            return Ok(0);
        };
        let matches: Vec<AssocId> = tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| {
                a.child_id == child_id && a.type_qname_id == type_id && a.qname_id == qname_id
            })
            .map(|a| a.id)
            .collect();
        for assoc_id in &matches {
            if let Some(assoc) = tables.child_assocs.get_mut(assoc_id) {
                assoc.assoc_index = index;
            }
        }
        if !matches.is_empty() {
            self.write_node_row(&mut tables, txn, child_id, |b| b)?;
        }
        Ok(matches.len())
    }

    /// Bulk-updates the denormalized uniqueness key on every parent edge of
    /// a renamed child. All target parents are collision-checked before any
    /// edge is rewritten. Returns the number of edges updated.
    pub fn set_child_assocs_unique_name(
        &self,
        txn: &mut Txn<'_>,
        child_id: NodeId,
        child_name: &str,
    ) -> Result<usize> {
        let mut tables = self.tables_mut();
        let name_key = ChildNameKey::new(child_name, self.config().child_name_key_len);
        let edges: Vec<ChildAssocEntity> = tables
            .child_by_child
            .get(&child_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .cloned()
            .collect();
        for edge in &edges {
            self.check_unique_child_name(
                &tables,
                edge.parent_id,
                edge.type_qname_id,
                &name_key,
                Some(edge.id),
                child_name,
            )?;
        }
        for edge in &edges {
            if let Some(assoc) = tables.child_assocs.get_mut(&edge.id) {
                assoc.child_name = child_name.to_string();
                assoc.name_key = name_key.clone();
            }
        }
        if !edges.is_empty() {
            self.write_node_row(&mut tables, txn, child_id, |b| b)?;
        }
        Ok(edges.len())
    }

    /// A specific child association, or `None` if it does not exist.
    pub fn child_assoc_by_id(&self, assoc_id: AssocId) -> Result<Option<ChildAssocRef>> {
        let tables = self.tables();
        match tables.child_assocs.get(&assoc_id) {
            Some(assoc) => self.child_assoc_ref(&tables, assoc).map(Some),
            None => Ok(None),
        }
    }

    /// Exact-tuple lookup. Duplicates cannot normally exist thanks to the
    /// name constraint; the lowest-ID association wins if they do.
    pub fn child_assoc(
        &self,
        parent_id: NodeId,
        child_id: NodeId,
        assoc_type: &QName,
        assoc_qname: &QName,
    ) -> Result<Option<ChildAssocRef>> {
        let tables = self.tables();
        let (Some(type_id), Some(qname_id)) =
            (self.qnames().id(assoc_type), self.qnames().id(assoc_qname))
        else {
            return Ok(None);
        };
        let found = tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| {
                a.child_id == child_id && a.type_qname_id == type_id && a.qname_id == qname_id
            })
            .min_by_key(|a| a.id);
        match found {
            Some(assoc) => self.child_assoc_ref(&tables, assoc).map(Some),
            None => Ok(None),
        }
    }

    /// Lookup by (parent, association type, child name), through the
    /// uniqueness key — no full-string comparison on the scan.
    pub fn child_assoc_by_name(
        &self,
        parent_id: NodeId,
        assoc_type: &QName,
        child_name: &str,
    ) -> Result<Option<ChildAssocRef>> {
        let tables = self.tables();
        let Some(type_id) = self.qnames().id(assoc_type) else {
            return Ok(None);
        };
        let name_key = ChildNameKey::new(child_name, self.config().child_name_key_len);
        let found = tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| a.type_qname_id == type_id && a.name_key == name_key)
            .find(|a| tables.live_node(a.child_id).is_some());
        match found {
            Some(assoc) => self.child_assoc_ref(&tables, assoc).map(Some),
            None => Ok(None),
        }
    }

    /// Filtered scan over the child associations of one parent.
    ///
    /// Soft-deleted children are never returned. When `ordered` is set,
    /// rows come back sorted by `(assoc_index, assoc_id)`.
    pub fn child_assocs(&self, parent_id: NodeId, filter: &ChildAssocFilter) -> Result<ChildAssocs> {
        let tables = self.tables();
        let parent_store = tables.node(parent_id).map(|n| n.store_id());
        if parent_store.is_none() && filter.same_store.is_some() {
            // Unknown parent: nothing to compare the store against.
            return Ok(ChildAssocs::new(Vec::new()));
        }
        let type_ids: Option<BTreeSet<QNameId>> = if filter.assoc_types.is_empty() {
            None
        } else {
            Some(
                filter
                    .assoc_types
                    .iter()
                    .filter_map(|q| self.qnames().id(q))
                    .collect(),
            )
        };
        let qname_id = match &filter.assoc_qname {
            Some(q) => match self.qnames().id(q) {
                Some(id) => Some(id),
                // unknown qname can never match
                None => return Ok(ChildAssocs::new(Vec::new())),
            },
            None => None,
        };
        let child_type_ids: Option<BTreeSet<QNameId>> = if filter.child_node_types.is_empty() {
            None
        } else {
            Some(
                filter
                    .child_node_types
                    .iter()
                    .filter_map(|q| self.qnames().id(q))
                    .collect(),
            )
        };
        let name_keys: Option<Vec<ChildNameKey>> = if filter.child_names.is_empty() {
            None
        } else {
            Some(
                filter
                    .child_names
                    .iter()
                    .map(|n| ChildNameKey::new(n, self.config().child_name_key_len))
                    .collect(),
            )
        };

        let mut rows = Vec::new();
        for assoc_id in tables.child_by_parent.get(&parent_id).into_iter().flatten() {
            let Some(assoc) = tables.child_assocs.get(assoc_id) else {
                continue;
            };
            if filter.child_id.is_some_and(|c| c != assoc.child_id) {
                continue;
            }
            if type_ids
                .as_ref()
                .is_some_and(|set| !set.contains(&assoc.type_qname_id))
            {
                continue;
            }
            if qname_id.is_some_and(|q| q != assoc.qname_id) {
                continue;
            }
            if filter.is_primary.is_some_and(|p| p != assoc.is_primary) {
                continue;
            }
            if name_keys
                .as_ref()
                .is_some_and(|keys| !keys.contains(&assoc.name_key))
            {
                continue;
            }
            let Some(child) = tables.live_node(assoc.child_id) else {
                continue;
            };
            if child_type_ids
                .as_ref()
                .is_some_and(|set| !set.contains(&child.type_qname_id()))
            {
                continue;
            }
            if let (Some(same), Some(parent_store)) = (filter.same_store, parent_store) {
                if (child.store_id() == parent_store) != same {
                    continue;
                }
            }
            rows.push(self.child_assoc_ref(&tables, assoc)?);
            if !filter.ordered && filter.max_results.is_some_and(|m| rows.len() >= m) {
                break;
            }
        }
        if filter.ordered {
            rows.sort_by_key(|r| (r.index, r.id));
            if let Some(max) = filter.max_results {
                rows.truncate(max);
            }
        }
        Ok(ChildAssocs::new(rows))
    }

    /// Resolved parent-association set for a node, served from the
    /// weight-bounded cache.
    pub(crate) fn parent_assocs_cached(
        &self,
        node_id: NodeId,
    ) -> Result<std::sync::Arc<ParentAssocsInfo>> {
        // Lock order: tables before cache, everywhere.
        let tables = self.tables();
        let entity = tables.node(node_id).ok_or_else(|| {
            StoreError::InvalidArgument(format!("node {node_id} does not exist"))
        })?;
        let token = entity.txn_id();
        self.parent_cache()
            .get_or_load(node_id, token, || Self::load_parent_assocs(&tables, node_id))
    }

    fn load_parent_assocs(tables: &Tables, node_id: NodeId) -> Result<ParentAssocsInfo> {
        let entity = tables.node(node_id).ok_or_else(|| {
            StoreError::InvalidArgument(format!("node {node_id} does not exist"))
        })?;
        let is_store_root = entity.type_qname_id() == tables.wk.store_root_type;
        let is_root = is_store_root
            || tables
                .aspects
                .get(&node_id)
                .is_some_and(|set| set.contains(&tables.wk.root_aspect));
        let mut parent_assocs: Vec<ChildAssocEntity> = tables
            .child_by_child
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .cloned()
            .collect();
        parent_assocs.sort_by_key(|a| a.id);
        if parent_assocs.is_empty() && !is_root && !tables.is_deleted(entity) {
            return Err(StoreError::Integrity(format!(
                "live non-root node {node_id} has no parent associations"
            )));
        }
        Ok(ParentAssocsInfo {
            txn_id: entity.txn_id(),
            is_root,
            is_store_root,
            parent_assocs,
        })
    }

    /// Filtered view of a node's parent associations.
    pub fn parent_assocs(
        &self,
        child_id: NodeId,
        filter: &ParentAssocFilter,
    ) -> Result<Vec<ChildAssocRef>> {
        let info = self.parent_assocs_cached(child_id)?;
        let type_id = filter.assoc_type.as_ref().and_then(|q| self.qnames().id(q));
        if filter.assoc_type.is_some() && type_id.is_none() {
            return Ok(Vec::new());
        }
        let qname_id = filter.assoc_qname.as_ref().and_then(|q| self.qnames().id(q));
        if filter.assoc_qname.is_some() && qname_id.is_none() {
            return Ok(Vec::new());
        }
        let tables = self.tables();
        let mut out = Vec::new();
        for assoc in &info.parent_assocs {
            if type_id.is_some_and(|t| t != assoc.type_qname_id) {
                continue;
            }
            if qname_id.is_some_and(|q| q != assoc.qname_id) {
                continue;
            }
            if filter.is_primary.is_some_and(|p| p != assoc.is_primary) {
                continue;
            }
            out.push(self.child_assoc_ref(&tables, assoc)?);
        }
        Ok(out)
    }

    /// The defining (primary) parent association, or `None` for a root.
    pub fn primary_parent_assoc(&self, child_id: NodeId) -> Result<Option<ChildAssocRef>> {
        let info = self.parent_assocs_cached(child_id)?;
        let Some(assoc) = info.parent_assocs.iter().find(|a| a.is_primary) else {
            return Ok(None);
        };
        let tables = self.tables();
        self.child_assoc_ref(&tables, assoc).map(Some)
    }

    /// Counts child associations of a parent, optionally primary-only.
    pub fn count_child_assocs(&self, parent_id: NodeId, primary_only: bool) -> usize {
        let tables = self.tables();
        tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| !primary_only || a.is_primary)
            .filter(|a| tables.live_node(a.child_id).is_some())
            .count()
    }

    /// Primary children of a node with their ACL references.
    pub fn primary_children_acls(&self, parent_id: NodeId) -> Vec<crate::types::NodeIdAndAclId> {
        let tables = self.tables();
        tables
            .child_by_parent
            .get(&parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.child_assocs.get(id))
            .filter(|a| a.is_primary)
            .filter_map(|a| {
                tables.live_node(a.child_id).map(|n| crate::types::NodeIdAndAclId {
                    node_id: n.id(),
                    acl_id: n.acl_id(),
                })
            })
            .collect()
    }

    /// Anti-join: edges to children of `parent_id` that do NOT also have a
    /// parent edge of `assoc_type` from the same parent — the "orphans"
    /// with respect to that relationship type.
    pub fn child_assocs_without_parent_assocs_of_type(
        &self,
        parent_id: NodeId,
        assoc_type: &QName,
    ) -> Result<ChildAssocs> {
        let tables = self.tables();
        let type_id = self.qnames().id(assoc_type);
        let mut covered: BTreeSet<NodeId> = BTreeSet::new();
        if let Some(type_id) = type_id {
            covered = tables
                .child_by_parent
                .get(&parent_id)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.child_assocs.get(id))
                .filter(|a| a.type_qname_id == type_id)
                .map(|a| a.child_id)
                .collect();
        }
        let mut rows = Vec::new();
        for assoc_id in tables.child_by_parent.get(&parent_id).into_iter().flatten() {
            let Some(assoc) = tables.child_assocs.get(assoc_id) else {
                continue;
            };
            if covered.contains(&assoc.child_id) {
                continue;
            }
            if tables.live_node(assoc.child_id).is_none() {
                continue;
            }
            rows.push(self.child_assoc_ref(&tables, assoc)?);
        }
        Ok(ChildAssocs::new(rows))
    }

    /// Children of `parent_id` within the `[min_node_id, max_node_id)`
    /// window that participate in no peer association of the excluded
    /// types. Used by bounded-batch maintenance jobs.
    pub fn child_nodes_without_node_assocs_of_types(
        &self,
        parent_id: NodeId,
        min_node_id: Option<NodeId>,
        max_node_id: Option<NodeId>,
        exclude_types: &BTreeSet<QName>,
    ) -> Result<Vec<NodePair>> {
        let tables = self.tables();
        let exclude_ids: BTreeSet<QNameId> = exclude_types
            .iter()
            .filter_map(|q| self.qnames().id(q))
            .collect();
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for assoc_id in tables.child_by_parent.get(&parent_id).into_iter().flatten() {
            let Some(assoc) = tables.child_assocs.get(assoc_id) else {
                continue;
            };
            let child_id = assoc.child_id;
            if !seen.insert(child_id) {
                continue;
            }
            if min_node_id.is_some_and(|min| child_id < min)
                || max_node_id.is_some_and(|max| child_id >= max)
            {
                continue;
            }
            if tables.live_node(child_id).is_none() {
                continue;
            }
            let excluded = tables
                .peer_by_source
                .get(&child_id)
                .into_iter()
                .flatten()
                .chain(tables.peer_by_target.get(&child_id).into_iter().flatten())
                .filter_map(|id| tables.node_assocs.get(id))
                .any(|a| exclude_ids.contains(&a.type_qname_id));
            if excluded {
                continue;
            }
            if let Some(pair) = tables.node_pair(child_id)? {
                out.push(pair);
            }
        }
        Ok(out)
    }

    /// Children of a parent filtered by a property value.
    pub fn child_assocs_by_property_value(
        &self,
        parent_id: NodeId,
        property_qname: &QName,
        value: &PropValue,
    ) -> Result<ChildAssocs> {
        let tables = self.tables();
        let Some(prop_id) = self.qnames().id(property_qname) else {
            return Ok(ChildAssocs::new(Vec::new()));
        };
        let mut rows = Vec::new();
        for assoc_id in tables.child_by_parent.get(&parent_id).into_iter().flatten() {
            let Some(assoc) = tables.child_assocs.get(assoc_id) else {
                continue;
            };
            if tables.live_node(assoc.child_id).is_none() {
                continue;
            }
            let matches = tables
                .props
                .get(&assoc.child_id)
                .and_then(|row| row.get(&prop_id))
                .is_some_and(|v| v == value);
            if matches {
                rows.push(self.child_assoc_ref(&tables, assoc)?);
            }
        }
        Ok(ChildAssocs::new(rows))
    }

    /*
     * Peer associations
     */

    /// Creates a peer association. Duplicate (source, target, type) rows
    /// are a constraint violation. An `assoc_index` of `-1` assigns the
    /// next index among the source's associations of that type.
    pub fn new_node_assoc(
        &self,
        txn: &mut Txn<'_>,
        source_id: NodeId,
        target_id: NodeId,
        assoc_type: &QName,
        assoc_index: i32,
    ) -> Result<NodeAssocRef> {
        let mut tables = self.tables_mut();
        if tables.live_node(source_id).is_none() {
            return Err(StoreError::InvalidArgument(format!(
                "source node {source_id} does not exist or is deleted"
            )));
        }
        if tables.live_node(target_id).is_none() {
            return Err(StoreError::InvalidArgument(format!(
                "target node {target_id} does not exist or is deleted"
            )));
        }
        let type_id = self.qnames().intern(assoc_type);
        let duplicate = tables
            .peer_by_source
            .get(&source_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.node_assocs.get(id))
            .any(|a| a.target_id == target_id && a.type_qname_id == type_id);
        if duplicate {
            return Err(StoreError::AssocExists {
                source_node: source_id,
                target: target_id,
                assoc_type: assoc_type.clone(),
            });
        }
        let index = if assoc_index < 0 {
            tables
                .peer_by_source
                .get(&source_id)
                .into_iter()
                .flatten()
                .filter_map(|id| tables.node_assocs.get(id))
                .filter(|a| a.type_qname_id == type_id)
                .map(|a| a.assoc_index)
                .max()
                .map_or(1, |max| max + 1)
        } else {
            assoc_index
        };
        txn.ensure_ledger(&mut tables);
        let assoc_id = tables.alloc_assoc_id();
        let assoc = NodeAssocEntity {
            id: assoc_id,
            source_id,
            target_id,
            type_qname_id: type_id,
            assoc_index: index,
        };
        tables.insert_node_assoc(assoc.clone());
        self.write_node_row(&mut tables, txn, source_id, |b| b)?;
        debug!(assoc = %assoc_id, source = %source_id, target = %target_id, "node assoc created");
        self.node_assoc_ref(&tables, &assoc)
    }

    /// Updates a peer association's ordering index.
    pub fn set_node_assoc_index(
        &self,
        txn: &mut Txn<'_>,
        assoc_id: AssocId,
        assoc_index: i32,
    ) -> Result<()> {
        if assoc_index < 0 {
            return Err(StoreError::InvalidArgument(
                "association index must not be negative".into(),
            ));
        }
        let mut tables = self.tables_mut();
        let source_id = {
            let assoc = tables.node_assocs.get_mut(&assoc_id).ok_or_else(|| {
                StoreError::InvalidArgument(format!("node assoc {assoc_id} does not exist"))
            })?;
            assoc.assoc_index = assoc_index;
            assoc.source_id
        };
        self.write_node_row(&mut tables, txn, source_id, |b| b)?;
        Ok(())
    }

    /// Removes the peer association matching (source, target, type).
    /// Returns the number of rows removed.
    pub fn remove_node_assoc(
        &self,
        txn: &mut Txn<'_>,
        source_id: NodeId,
        target_id: NodeId,
        assoc_type: &QName,
    ) -> Result<usize> {
        let mut tables = self.tables_mut();
        let Some(type_id) = self.qnames().id(assoc_type) else {
            return Ok(0);
        };
        let victims: Vec<AssocId> = tables
            .peer_by_source
            .get(&source_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.node_assocs.get(id))
            .filter(|a| a.target_id == target_id && a.type_qname_id == type_id)
            .map(|a| a.id)
            .collect();
        for assoc_id in &victims {
            tables.remove_node_assoc_row(*assoc_id);
        }
        if !victims.is_empty() {
            self.write_node_row(&mut tables, txn, source_id, |b| b)?;
        }
        Ok(victims.len())
    }

    /// Removes peer associations by ID. Returns the number of rows removed.
    pub fn remove_node_assocs(&self, txn: &mut Txn<'_>, assoc_ids: &[AssocId]) -> Result<usize> {
        let mut tables = self.tables_mut();
        let mut removed = 0;
        let mut sources = BTreeSet::new();
        for assoc_id in assoc_ids {
            if let Some(assoc) = tables.remove_node_assoc_row(*assoc_id) {
                sources.insert(assoc.source_id);
                removed += 1;
            }
        }
        for source_id in sources {
            if tables.nodes.contains_key(&source_id) {
                self.write_node_row(&mut tables, txn, source_id, |b| b)?;
            }
        }
        Ok(removed)
    }

    /// All peer associations where the node is source or target.
    pub fn node_assocs_to_and_from(&self, node_id: NodeId) -> Result<Vec<NodeAssocRef>> {
        let tables = self.tables();
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for assoc_id in tables
            .peer_by_source
            .get(&node_id)
            .into_iter()
            .flatten()
            .chain(tables.peer_by_target.get(&node_id).into_iter().flatten())
        {
            if !seen.insert(*assoc_id) {
                continue;
            }
            if let Some(assoc) = tables.node_assocs.get(assoc_id) {
                out.push(self.node_assoc_ref(&tables, assoc)?);
            }
        }
        Ok(out)
    }

    /// Peer associations pointing at `target_id`, optionally filtered by
    /// type.
    pub fn source_node_assocs(
        &self,
        target_id: NodeId,
        assoc_type: Option<&QName>,
    ) -> Result<Vec<NodeAssocRef>> {
        let tables = self.tables();
        let type_id = match assoc_type {
            Some(q) => match self.qnames().id(q) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let mut out = Vec::new();
        for assoc_id in tables.peer_by_target.get(&target_id).into_iter().flatten() {
            let Some(assoc) = tables.node_assocs.get(assoc_id) else {
                continue;
            };
            if type_id.is_some_and(|t| t != assoc.type_qname_id) {
                continue;
            }
            out.push(self.node_assoc_ref(&tables, assoc)?);
        }
        Ok(out)
    }

    /// Peer associations originating at `source_id`, optionally filtered by
    /// type.
    pub fn target_node_assocs(
        &self,
        source_id: NodeId,
        assoc_type: Option<&QName>,
    ) -> Result<Vec<NodeAssocRef>> {
        let tables = self.tables();
        let type_id = match assoc_type {
            Some(q) => match self.qnames().id(q) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let mut out = Vec::new();
        for assoc_id in tables.peer_by_source.get(&source_id).into_iter().flatten() {
            let Some(assoc) = tables.node_assocs.get(assoc_id) else {
                continue;
            };
            if type_id.is_some_and(|t| t != assoc.type_qname_id) {
                continue;
            }
            out.push(self.node_assoc_ref(&tables, assoc)?);
        }
        Ok(out)
    }

    /// Peer associations from `source_id` whose target carries the given
    /// property value; a `None` property matches any target.
    pub fn target_assocs_by_property_value(
        &self,
        source_id: NodeId,
        assoc_type: Option<&QName>,
        property: Option<(&QName, &PropValue)>,
    ) -> Result<Vec<NodeAssocRef>> {
        let candidates = self.target_node_assocs(source_id, assoc_type)?;
        let Some((qname, value)) = property else {
            return Ok(candidates);
        };
        let Some(prop_id) = self.qnames().id(qname) else {
            return Ok(Vec::new());
        };
        let tables = self.tables();
        Ok(candidates
            .into_iter()
            .filter(|assoc| {
                tables
                    .props
                    .get(&assoc.target.id)
                    .and_then(|row| row.get(&prop_id))
                    .is_some_and(|v| v == value)
            })
            .collect())
    }

    /// A specific peer association, or `None` if it does not exist.
    pub fn node_assoc_by_id(&self, assoc_id: AssocId) -> Result<Option<NodeAssocRef>> {
        let tables = self.tables();
        match tables.node_assocs.get(&assoc_id) {
            Some(assoc) => self.node_assoc_ref(&tables, assoc).map(Some),
            None => Ok(None),
        }
    }
}
