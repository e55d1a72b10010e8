//! QName interning registry.
//!
//! Every node, association, property and aspect row stores a small surrogate
//! ID rather than the namespace/local-name pair. The registry is
//! read-dominant and append-only: QNames are interned once and never
//! deleted. It is an explicitly constructed shared service; consumers hold
//! an `Arc` handle rather than reaching for ambient static state.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::{QName, QNameId};

#[derive(Default)]
struct Inner {
    by_qname: FxHashMap<QName, QNameId>,
    by_id: FxHashMap<QNameId, QName>,
    next_id: u64,
}

#[derive(Default)]
pub struct RegistryMetrics {
    resolve_calls: AtomicU64,
    resolve_hits: AtomicU64,
    intern_misses: AtomicU64,
}

/// Point-in-time view of registry counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct RegistryMetricsSnapshot {
    pub resolve_calls: u64,
    pub resolve_hits: u64,
    pub intern_misses: u64,
}

impl RegistryMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        if self.resolve_calls == 0 {
            return 0.0;
        }
        self.resolve_hits as f64 / self.resolve_calls as f64
    }
}

/// Bidirectional QName ⇄ surrogate-ID mapping, safe for concurrent use.
#[derive(Default)]
pub struct QNameRegistry {
    inner: RwLock<Inner>,
    metrics: RegistryMetrics,
}

impl QNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the ID for a QName without creating it.
    pub fn id(&self, qname: &QName) -> Option<QNameId> {
        self.metrics.resolve_calls.fetch_add(1, Ordering::Relaxed);
        let found = self.inner.read().by_qname.get(qname).copied();
        if found.is_some() {
            self.metrics.resolve_hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Returns the ID for a QName, interning it if absent.
    ///
    /// At-most-once under concurrency: the write lock is re-checked so two
    /// racing interns of the same QName observe a single ID.
    pub fn intern(&self, qname: &QName) -> QNameId {
        self.metrics.resolve_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(id) = self.inner.read().by_qname.get(qname).copied() {
            self.metrics.resolve_hits.fetch_add(1, Ordering::Relaxed);
            return id;
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_qname.get(qname).copied() {
            return id;
        }
        let id = QNameId(inner.next_id);
        inner.next_id += 1;
        inner.by_qname.insert(qname.clone(), id);
        inner.by_id.insert(id, qname.clone());
        self.metrics.intern_misses.fetch_add(1, Ordering::Relaxed);
        trace!(qname = %qname, id = %id, "interned qname");
        id
    }

    /// Inverse lookup.
    pub fn qname(&self, id: QNameId) -> Option<QName> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Resolves a set of QNames to IDs.
    ///
    /// Unknown QNames are absent from the result unless `create_missing` is
    /// set, in which case they are interned.
    pub fn convert_qnames_to_ids(
        &self,
        qnames: &BTreeSet<QName>,
        create_missing: bool,
    ) -> FxHashMap<QName, QNameId> {
        let mut out = FxHashMap::default();
        for qname in qnames {
            let id = if create_missing {
                Some(self.intern(qname))
            } else {
                self.id(qname)
            };
            if let Some(id) = id {
                out.insert(qname.clone(), id);
            }
        }
        out
    }

    /// Resolves a set of IDs back to QNames; unknown IDs are skipped.
    pub fn convert_ids_to_qnames(&self, ids: &BTreeSet<QNameId>) -> BTreeSet<QName> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.by_id.get(id).cloned())
            .collect()
    }

    pub fn metrics(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            resolve_calls: self.metrics.resolve_calls.load(Ordering::Relaxed),
            resolve_hits: self.metrics.resolve_hits.load(Ordering::Relaxed),
            intern_misses: self.metrics.intern_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_idempotent() {
        let reg = QNameRegistry::new();
        let q = QName::new("cm", "name");
        let a = reg.intern(&q);
        let b = reg.intern(&q);
        assert_eq!(a, b);
        assert_eq!(reg.qname(a), Some(q));
    }

    #[test]
    fn unknown_qname_is_absent_without_create() {
        let reg = QNameRegistry::new();
        let mut set = BTreeSet::new();
        set.insert(QName::new("cm", "ghost"));
        assert!(reg.convert_qnames_to_ids(&set, false).is_empty());
        assert_eq!(reg.convert_qnames_to_ids(&set, true).len(), 1);
    }

    #[test]
    fn round_trip_sets() {
        let reg = QNameRegistry::new();
        let mut qnames = BTreeSet::new();
        for local in ["a", "b", "c"] {
            qnames.insert(QName::new("cm", local));
        }
        let ids: BTreeSet<QNameId> = reg
            .convert_qnames_to_ids(&qnames, true)
            .values()
            .copied()
            .collect();
        assert_eq!(reg.convert_ids_to_qnames(&ids), qnames);
    }

    #[test]
    fn concurrent_intern_yields_one_id() {
        use std::sync::Arc;
        let reg = Arc::new(QNameRegistry::new());
        let q = QName::new("cm", "contended");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                let q = q.clone();
                std::thread::spawn(move || reg.intern(&q))
            })
            .collect();
        let ids: Vec<QNameId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
