//! Weight-bounded LRU cache of resolved parent-association sets.
//!
//! "All parents of node X" is the hottest traversal in path building, so the
//! resolved set is cached per node. Entries are weighted by the number of
//! parent edges they hold (minimum 1, so absent/empty sets still cost
//! something); eviction pops least-recently-used entries until the global
//! weight budget is honored. A node with unusually large parent fan-in
//! therefore pays its true share of the budget.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::assoc::ChildAssocEntity;
use crate::error::Result;
use crate::types::{NodeId, TxnId};

/// Resolved parent-association set for one node, tagged with the ledger
/// token of the node row it was computed from. A token mismatch means the
/// node has been touched since and the entry is stale.
#[derive(Clone, Debug, PartialEq)]
pub struct ParentAssocsInfo {
    pub txn_id: TxnId,
    pub is_root: bool,
    pub is_store_root: bool,
    /// Parent edges pointing at the node, in assoc-ID order.
    pub parent_assocs: Vec<ChildAssocEntity>,
}

impl ParentAssocsInfo {
    fn weight(&self) -> usize {
        self.parent_assocs.len().max(1)
    }
}

struct Inner {
    entries: LruCache<NodeId, Arc<ParentAssocsInfo>>,
    total_weight: usize,
}

pub struct ParentAssocsCache {
    inner: Mutex<Inner>,
    max_weight: usize,
}

impl ParentAssocsCache {
    pub fn new(max_weight: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                total_weight: 0,
            }),
            max_weight: max_weight.max(1),
        }
    }

    /// Returns the cached parent set for `node_id`, loading it with
    /// `loader` on miss or on ledger-token mismatch.
    ///
    /// The cache lock is held across the load, so at most one computation
    /// of a given node's parent set runs at a time. Loader failures
    /// propagate to the caller and are never cached.
    pub fn get_or_load<F>(
        &self,
        node_id: NodeId,
        token: TxnId,
        loader: F,
    ) -> Result<Arc<ParentAssocsInfo>>
    where
        F: FnOnce() -> Result<ParentAssocsInfo>,
    {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(&node_id) {
            if entry.txn_id == token {
                trace!(node = %node_id, "parent assocs cache hit");
                return Ok(Arc::clone(entry));
            }
            trace!(node = %node_id, "parent assocs cache entry stale");
            let weight = entry.weight();
            inner.entries.pop(&node_id);
            inner.total_weight -= weight;
        }
        let info = Arc::new(loader()?);
        inner.total_weight += info.weight();
        if let Some(old) = inner.entries.put(node_id, Arc::clone(&info)) {
            inner.total_weight -= old.weight();
        }
        while inner.total_weight > self.max_weight {
            match inner.entries.pop_lru() {
                Some((evicted, old)) => {
                    inner.total_weight -= old.weight();
                    debug!(node = %evicted, "evicted parent assocs cache entry");
                }
                None => break,
            }
        }
        Ok(info)
    }

    /// Peek without loading; stale entries count as absent.
    pub fn get(&self, node_id: NodeId, token: TxnId) -> Option<Arc<ParentAssocsInfo>> {
        let mut inner = self.inner.lock();
        match inner.entries.get(&node_id) {
            Some(entry) if entry.txn_id == token => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    pub fn invalidate(&self, node_id: NodeId) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(&node_id) {
            inner.total_weight -= old.weight();
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_weight = 0;
    }

    pub fn total_weight(&self) -> usize {
        self.inner.lock().total_weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assoc::ChildNameKey;
    use crate::types::{AssocId, QNameId};

    fn info(txn: u64, parents: usize) -> ParentAssocsInfo {
        let parent_assocs = (0..parents)
            .map(|i| ChildAssocEntity {
                id: AssocId(i as u64),
                parent_id: NodeId(1000 + i as u64),
                child_id: NodeId(1),
                type_qname_id: QNameId(0),
                qname_id: QNameId(0),
                child_name: format!("c{i}"),
                name_key: ChildNameKey::new(&format!("c{i}"), 50),
                is_primary: i == 0,
                assoc_index: 0,
            })
            .collect();
        ParentAssocsInfo {
            txn_id: TxnId(txn),
            is_root: false,
            is_store_root: false,
            parent_assocs,
        }
    }

    #[test]
    fn load_once_then_hit() {
        let cache = ParentAssocsCache::new(100);
        let mut loads = 0;
        for _ in 0..3 {
            let got = cache
                .get_or_load(NodeId(1), TxnId(5), || {
                    loads += 1;
                    Ok(info(5, 2))
                })
                .unwrap();
            assert_eq!(got.parent_assocs.len(), 2);
        }
        assert_eq!(loads, 1);
    }

    #[test]
    fn stale_token_reloads() {
        let cache = ParentAssocsCache::new(100);
        cache.get_or_load(NodeId(1), TxnId(1), || Ok(info(1, 1))).unwrap();
        let got = cache
            .get_or_load(NodeId(1), TxnId(2), || Ok(info(2, 3)))
            .unwrap();
        assert_eq!(got.txn_id, TxnId(2));
        assert_eq!(got.parent_assocs.len(), 3);
    }

    #[test]
    fn weight_budget_evicts_lru() {
        let cache = ParentAssocsCache::new(5);
        cache.get_or_load(NodeId(1), TxnId(0), || Ok(info(0, 3))).unwrap();
        cache.get_or_load(NodeId(2), TxnId(0), || Ok(info(0, 3))).unwrap();
        // budget 5 < 3 + 3: node 1 must have been evicted
        assert!(cache.get(NodeId(1), TxnId(0)).is_none());
        assert!(cache.get(NodeId(2), TxnId(0)).is_some());
        assert!(cache.total_weight() <= 5);
    }

    #[test]
    fn empty_parent_set_weighs_one() {
        let cache = ParentAssocsCache::new(10);
        cache.get_or_load(NodeId(1), TxnId(0), || Ok(info(0, 0))).unwrap();
        assert_eq!(cache.total_weight(), 1);
    }

    #[test]
    fn load_failure_is_not_cached() {
        let cache = ParentAssocsCache::new(10);
        let err = cache.get_or_load(NodeId(1), TxnId(0), || {
            Err(crate::StoreError::Integrity("boom".into()))
        });
        assert!(err.is_err());
        let mut loads = 0;
        cache
            .get_or_load(NodeId(1), TxnId(0), || {
                loads += 1;
                Ok(info(0, 1))
            })
            .unwrap();
        assert_eq!(loads, 1);
    }
}
