//! Transaction-ledger queries and maintenance.
//!
//! The ledger is append-only during normal operation; entries become
//! deletable only once no node row references them, which happens after
//! purge sweeps. Change-tracking consumers page through committed entries
//! by commit time.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{GraphStore, Tables};
use crate::txn::TxnEntity;
use crate::types::{NodeId, NodeStatus, StoreRef, TxnId};

/// Commit-time window query over the ledger.
#[derive(Clone, Debug, Default)]
pub struct TxnQuery {
    pub min_commit_ms: Option<u64>,
    pub max_commit_ms: Option<u64>,
    /// Entries to skip, typically the ones a consumer already processed at
    /// the boundary commit time.
    pub exclude_ids: Vec<TxnId>,
    /// Skip entries written by this server, for replication consumers that
    /// must not re-apply their own changes.
    pub exclude_server: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl TxnQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_commit_ms(mut self, t: u64) -> Self {
        self.min_commit_ms = Some(t);
        self
    }

    pub fn max_commit_ms(mut self, t: u64) -> Self {
        self.max_commit_ms = Some(t);
        self
    }

    pub fn exclude_ids(mut self, ids: Vec<TxnId>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn exclude_server(mut self, server: impl Into<String>) -> Self {
        self.exclude_server = Some(server.into());
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl GraphStore {
    /// A ledger entry by ID, committed or not.
    pub fn txn_by_id(&self, txn_id: TxnId) -> Option<TxnEntity> {
        self.tables().txns.get(&txn_id).cloned()
    }

    pub fn txn_count(&self) -> usize {
        self.tables().txns.len()
    }

    pub fn min_txn_id(&self) -> Option<TxnId> {
        self.tables().txns.keys().next().copied()
    }

    pub fn max_txn_id(&self) -> Option<TxnId> {
        self.tables().txns.keys().next_back().copied()
    }

    /// Earliest commit time in the ledger.
    pub fn min_txn_commit_time(&self) -> Option<u64> {
        self.tables()
            .txns
            .values()
            .filter_map(|t| t.commit_time_ms)
            .min()
    }

    /// Latest commit time in the ledger.
    pub fn max_txn_commit_time(&self) -> Option<u64> {
        self.tables()
            .txns
            .values()
            .filter_map(|t| t.commit_time_ms)
            .max()
    }

    /// Highest ledger ID among entries committed at or before the given
    /// time. The paging anchor for change-tracking consumers.
    pub fn max_txn_id_by_commit_time(&self, max_commit_ms: u64) -> Option<TxnId> {
        self.tables()
            .txns
            .values()
            .filter(|t| t.commit_time_ms.is_some_and(|c| c <= max_commit_ms))
            .map(|t| t.id)
            .max()
    }

    /// Earliest commit time among transactions that own a soft-deleted
    /// node. Lower bound for purge sweeps.
    pub fn min_deleted_node_commit_time(&self) -> Option<u64> {
        let tables = self.tables();
        tables
            .nodes
            .values()
            .filter(|n| tables.is_deleted(n))
            .filter_map(|n| tables.txns.get(&n.txn_id()))
            .filter_map(|t| t.commit_time_ms)
            .min()
    }

    /// The next commit time at or after `from_commit_ms`, or `None` when
    /// the consumer has caught up.
    pub fn next_txn_commit_time(&self, from_commit_ms: u64) -> Option<u64> {
        self.tables()
            .txns
            .values()
            .filter_map(|t| t.commit_time_ms)
            .filter(|&c| c >= from_commit_ms)
            .min()
    }

    /// Committed ledger entries matching a commit-time window query,
    /// ordered by (commit time, ID) ascending or descending.
    pub fn txns_by_commit_time(&self, query: &TxnQuery) -> Vec<TxnEntity> {
        let tables = self.tables();
        let mut out: Vec<TxnEntity> = tables
            .txns
            .values()
            .filter(|t| {
                let Some(commit) = t.commit_time_ms else {
                    return false;
                };
                if query.min_commit_ms.is_some_and(|min| commit < min) {
                    return false;
                }
                if query.max_commit_ms.is_some_and(|max| commit >= max) {
                    return false;
                }
                if query.exclude_ids.contains(&t.id) {
                    return false;
                }
                if query
                    .exclude_server
                    .as_deref()
                    .is_some_and(|s| s == t.server)
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| (t.commit_time_ms, t.id));
        if query.descending {
            out.reverse();
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        out
    }

    /// Status of every node row last written under the given transaction,
    /// deleted rows included.
    pub fn txn_changes(&self, txn_id: TxnId) -> Result<Vec<NodeStatus>> {
        let tables = self.tables();
        self.collect_txn_changes(&tables, txn_id, None)
    }

    /// [`GraphStore::txn_changes`] limited to one store partition.
    pub fn txn_changes_for_store(
        &self,
        txn_id: TxnId,
        store_ref: &StoreRef,
    ) -> Result<Vec<NodeStatus>> {
        let tables = self.tables();
        let Some(&store_id) = tables.store_by_ref.get(store_ref) else {
            return Ok(Vec::new());
        };
        self.collect_txn_changes(&tables, txn_id, Some(store_id))
    }

    fn collect_txn_changes(
        &self,
        tables: &Tables,
        txn_id: TxnId,
        store_id: Option<crate::types::StoreId>,
    ) -> Result<Vec<NodeStatus>> {
        let mut out = Vec::new();
        for entity in tables.nodes.values() {
            if entity.txn_id() != txn_id {
                continue;
            }
            if store_id.is_some_and(|s| s != entity.store_id()) {
                continue;
            }
            out.push(NodeStatus {
                id: entity.id(),
                node_ref: tables.node_ref(entity)?,
                txn_id,
                deleted: tables.is_deleted(entity),
            });
        }
        Ok(out)
    }

    fn referenced_txns(tables: &Tables) -> BTreeSet<TxnId> {
        tables.nodes.values().map(|n| n.txn_id()).collect()
    }

    /// Committed ledger entries no node row references any more, from
    /// `min_txn_id` up, committed strictly before `max_commit_ms`, capped
    /// at `count`. Candidates for [`GraphStore::purge_txn`].
    pub fn txns_unused(&self, min_txn_id: TxnId, max_commit_ms: u64, count: usize) -> Vec<TxnId> {
        let tables = self.tables();
        let referenced = Self::referenced_txns(&tables);
        tables
            .txns
            .range(min_txn_id..)
            .filter(|(id, t)| {
                !referenced.contains(id) && t.commit_time_ms.is_some_and(|c| c < max_commit_ms)
            })
            .map(|(id, _)| *id)
            .take(count)
            .collect()
    }

    /// Earliest commit time among unreferenced ledger entries.
    pub fn min_unused_txn_commit_time(&self) -> Option<u64> {
        let tables = self.tables();
        let referenced = Self::referenced_txns(&tables);
        tables
            .txns
            .values()
            .filter(|t| !referenced.contains(&t.id))
            .filter_map(|t| t.commit_time_ms)
            .min()
    }

    /// Deletes one unreferenced ledger entry. Entries still referenced by
    /// node rows are protected.
    pub fn purge_txn(&self, txn_id: TxnId) -> Result<bool> {
        let mut tables = self.tables_mut();
        if !tables.txns.contains_key(&txn_id) {
            return Ok(false);
        }
        let referenced = tables.nodes.values().any(|n| n.txn_id() == txn_id);
        if referenced {
            return Err(StoreError::InvalidArgument(format!(
                "ledger entry {txn_id} is still referenced by node rows"
            )));
        }
        tables.txns.remove(&txn_id);
        debug!(txn = %txn_id, "ledger entry purged");
        Ok(true)
    }

    /// Sweeps unreferenced ledger entries committed within
    /// `[from_commit_ms, to_commit_ms)`. Returns the number deleted.
    pub fn delete_txns_unused(&self, from_commit_ms: u64, to_commit_ms: u64) -> usize {
        let mut tables = self.tables_mut();
        let referenced = Self::referenced_txns(&tables);
        let victims: Vec<TxnId> = tables
            .txns
            .values()
            .filter(|t| !referenced.contains(&t.id))
            .filter(|t| {
                t.commit_time_ms
                    .is_some_and(|c| c >= from_commit_ms && c < to_commit_ms)
            })
            .map(|t| t.id)
            .collect();
        for txn_id in &victims {
            tables.txns.remove(txn_id);
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), from_commit_ms, to_commit_ms, "unused ledger entries swept");
        }
        victims.len()
    }

    /// Earliest commit time among transactions owning node rows in the
    /// `[min_node_id, max_node_id]` interval.
    pub fn min_txn_commit_time_in_node_range(
        &self,
        min_node_id: NodeId,
        max_node_id: NodeId,
    ) -> Option<u64> {
        let tables = self.tables();
        tables
            .nodes
            .range(min_node_id..=max_node_id)
            .filter_map(|(_, n)| tables.txns.get(&n.txn_id()))
            .filter_map(|t| t.commit_time_ms)
            .min()
    }

    /// Latest commit time among transactions owning node rows in the
    /// `[min_node_id, max_node_id]` interval.
    pub fn max_txn_commit_time_in_node_range(
        &self,
        min_node_id: NodeId,
        max_node_id: NodeId,
    ) -> Option<u64> {
        let tables = self.tables();
        tables
            .nodes
            .range(min_node_id..=max_node_id)
            .filter_map(|(_, n)| tables.txns.get(&n.txn_id()))
            .filter_map(|t| t.commit_time_ms)
            .max()
    }
}
