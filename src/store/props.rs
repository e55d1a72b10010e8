//! Sparse per-node property storage and aspect (trait) membership.
//!
//! All mutators report whether a change actually occurred so callers can
//! skip change notifications on logical no-ops; the node version is bumped
//! only on real change.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::store::GraphStore;
use crate::txn::Txn;
use crate::types::{NodeId, NodePair, PropType, PropValue, QName, QNameId};

impl GraphStore {
    /// A single property of a node, or `None` if unset.
    pub fn node_property(&self, node_id: NodeId, qname: &QName) -> Option<PropValue> {
        let prop_id = self.qnames().id(qname)?;
        self.tables()
            .props
            .get(&node_id)
            .and_then(|row| row.get(&prop_id))
            .cloned()
    }

    /// The full property map of one node. Empty for unknown/purged nodes.
    pub fn node_properties(&self, node_id: NodeId) -> Result<BTreeMap<QName, PropValue>> {
        let tables = self.tables();
        let Some(row) = tables.props.get(&node_id) else {
            return Ok(BTreeMap::new());
        };
        self.resolve_prop_row(row)
    }

    /// A subset of one node's properties. Avoids over-fetching when the
    /// caller needs only specific keys.
    pub fn node_properties_subset(
        &self,
        node_id: NodeId,
        qnames: &BTreeSet<QName>,
    ) -> Result<BTreeMap<QName, PropValue>> {
        let tables = self.tables();
        let Some(row) = tables.props.get(&node_id) else {
            return Ok(BTreeMap::new());
        };
        let mut out = BTreeMap::new();
        for qname in qnames {
            let Some(prop_id) = self.qnames().id(qname) else {
                continue;
            };
            if let Some(value) = row.get(&prop_id) {
                out.insert(qname.clone(), value.clone());
            }
        }
        Ok(out)
    }

    /// Cross-node batch fetch: full property maps for a set of nodes in one
    /// pass. Nodes without properties map to empty entries.
    pub fn node_properties_bulk(
        &self,
        node_ids: &[NodeId],
    ) -> Result<FxHashMap<NodeId, BTreeMap<QName, PropValue>>> {
        let tables = self.tables();
        let mut out = FxHashMap::default();
        for &node_id in node_ids {
            let resolved = match tables.props.get(&node_id) {
                Some(row) => self.resolve_prop_row(row)?,
                None => BTreeMap::new(),
            };
            out.insert(node_id, resolved);
        }
        Ok(out)
    }

    fn resolve_prop_row(&self, row: &BTreeMap<QNameId, PropValue>) -> Result<BTreeMap<QName, PropValue>> {
        let mut out = BTreeMap::new();
        for (prop_id, value) in row {
            out.insert(self.resolve_qname(*prop_id)?, value.clone());
        }
        Ok(out)
    }

    /// Replaces the node's entire property set. Returns whether anything
    /// changed.
    pub fn set_node_properties(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        properties: &BTreeMap<QName, PropValue>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let new_row: BTreeMap<QNameId, PropValue> = properties
            .iter()
            .map(|(q, v)| (self.qnames().intern(q), v.clone()))
            .collect();
        let current = tables.props.get(&node_id);
        let changed = current.map_or(!new_row.is_empty(), |row| row != &new_row);
        if !changed {
            return Ok(false);
        }
        if new_row.is_empty() {
            tables.props.remove(&node_id);
        } else {
            tables.props.insert(node_id, new_row);
        }
        self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        Ok(true)
    }

    /// Merges properties into the node's set. Returns whether anything
    /// changed.
    pub fn add_node_properties(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        properties: &BTreeMap<QName, PropValue>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let mut changed = false;
        for (qname, value) in properties {
            let prop_id = self.qnames().intern(qname);
            let row = tables.props.entry(node_id).or_default();
            if row.get(&prop_id) != Some(value) {
                row.insert(prop_id, value.clone());
                changed = true;
            }
        }
        if changed {
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        }
        Ok(changed)
    }

    /// Sets a single property. Returns whether anything changed.
    pub fn add_node_property(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        qname: &QName,
        value: PropValue,
    ) -> Result<bool> {
        let mut map = BTreeMap::new();
        map.insert(qname.clone(), value);
        self.add_node_properties(txn, node_id, &map)
    }

    /// Removes the given properties. Returns whether anything changed.
    pub fn remove_node_properties(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        qnames: &BTreeSet<QName>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let mut changed = false;
        if let Some(row) = tables.props.get_mut(&node_id) {
            for qname in qnames {
                if let Some(prop_id) = self.qnames().id(qname) {
                    changed |= row.remove(&prop_id).is_some();
                }
            }
            if row.is_empty() {
                tables.props.remove(&node_id);
            }
        }
        if changed {
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        }
        Ok(changed)
    }

    /// All (node, property, value) rows whose property QName is in the
    /// given set. Maintenance surface, e.g. for re-encryption sweeps.
    pub fn node_properties_by_types(
        &self,
        qnames: &BTreeSet<QName>,
    ) -> Result<Vec<(NodeId, QName, PropValue)>> {
        let tables = self.tables();
        let ids: BTreeSet<QNameId> = qnames.iter().filter_map(|q| self.qnames().id(q)).collect();
        let mut out = Vec::new();
        for (node_id, row) in &tables.props {
            for (prop_id, value) in row {
                if ids.contains(prop_id) {
                    out.push((*node_id, self.resolve_qname(*prop_id)?, value.clone()));
                }
            }
        }
        Ok(out)
    }

    /// All property rows in `[min_node_id, max_node_id)` whose stored
    /// representation matches the given actual-type ordinal. Migration
    /// surface, not a hot path.
    pub fn node_properties_by_data_type(
        &self,
        data_type: PropType,
        min_node_id: NodeId,
        max_node_id: NodeId,
    ) -> Result<Vec<(NodeId, QName, PropValue)>> {
        let tables = self.tables();
        let mut out = Vec::new();
        for (node_id, row) in tables.props.range(min_node_id..max_node_id) {
            for (prop_id, value) in row {
                if value.actual_type() == data_type {
                    out.push((*node_id, self.resolve_qname(*prop_id)?, value.clone()));
                }
            }
        }
        Ok(out)
    }

    /*
     * Aspects
     */

    /// The aspect set of one node. Empty for unknown/purged nodes.
    pub fn node_aspects(&self, node_id: NodeId) -> Result<BTreeSet<QName>> {
        let tables = self.tables();
        let Some(set) = tables.aspects.get(&node_id) else {
            return Ok(BTreeSet::new());
        };
        set.iter().map(|id| self.resolve_qname(*id)).collect()
    }

    pub fn has_node_aspect(&self, node_id: NodeId, aspect: &QName) -> bool {
        let Some(aspect_id) = self.qnames().id(aspect) else {
            return false;
        };
        self.tables()
            .aspects
            .get(&node_id)
            .is_some_and(|set| set.contains(&aspect_id))
    }

    /// Adds aspects in bulk. Returns whether membership actually changed.
    pub fn add_node_aspects(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        aspects: &BTreeSet<QName>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let mut changed = false;
        for aspect in aspects {
            let aspect_id = self.qnames().intern(aspect);
            changed |= tables.aspects.entry(node_id).or_default().insert(aspect_id);
        }
        if changed {
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        }
        Ok(changed)
    }

    /// Removes aspects in bulk. Returns whether membership actually
    /// changed.
    pub fn remove_node_aspects(
        &self,
        txn: &mut Txn<'_>,
        node_id: NodeId,
        aspects: &BTreeSet<QName>,
    ) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let mut changed = false;
        if let Some(set) = tables.aspects.get_mut(&node_id) {
            for aspect in aspects {
                if let Some(aspect_id) = self.qnames().id(aspect) {
                    changed |= set.remove(&aspect_id);
                }
            }
            if set.is_empty() {
                tables.aspects.remove(&node_id);
            }
        }
        if changed {
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        }
        Ok(changed)
    }

    /// Strips every aspect from a node. Returns whether membership
    /// actually changed.
    pub fn remove_all_node_aspects(&self, txn: &mut Txn<'_>, node_id: NodeId) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.nodes.contains_key(&node_id) {
            return Err(StoreError::InvalidArgument(format!(
                "node {node_id} does not exist"
            )));
        }
        let changed = tables.aspects.remove(&node_id).is_some();
        if changed {
            self.write_node_row(&mut tables, txn, node_id, |b| b)?;
        }
        Ok(changed)
    }

    /// Live nodes in `[min_node_id, max_node_id)` carrying ALL of the given
    /// aspects. The unordered mode gives no ordering guarantee; `ordered`
    /// sorts by node ID for stable pagination.
    pub fn nodes_with_aspects(
        &self,
        aspects: &BTreeSet<QName>,
        min_node_id: NodeId,
        max_node_id: NodeId,
        ordered: bool,
    ) -> Result<Vec<NodePair>> {
        if aspects.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one aspect is required".into(),
            ));
        }
        let tables = self.tables();
        let mut aspect_ids = BTreeSet::new();
        for aspect in aspects {
            match self.qnames().id(aspect) {
                Some(id) => {
                    aspect_ids.insert(id);
                }
                // unknown aspect: nothing can carry it
                None => return Ok(Vec::new()),
            }
        }
        let mut out = Vec::new();
        for (node_id, node_aspects) in tables.aspects.range(min_node_id..max_node_id) {
            if !aspect_ids.iter().all(|id| node_aspects.contains(id)) {
                continue;
            }
            if tables.live_node(*node_id).is_none() {
                continue;
            }
            if let Some(pair) = tables.node_pair(*node_id)? {
                out.push(pair);
            }
        }
        if ordered {
            out.sort_by_key(|p| p.id);
        }
        Ok(out)
    }
}
