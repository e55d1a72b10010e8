//! Unit-of-work handle and ledger entry.
//!
//! Every node mutation is attributed to exactly one ledger entry. The entry
//! is allocated lazily on the first mutation so read-only units of work
//! never pollute the ledger. Commit stamps a wall-clock time that is kept
//! monotonic non-decreasing, but entry ID order — not commit time — is the
//! authoritative cross-transaction order.

use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::{GraphStore, Tables};
use crate::types::{NodeId, NodeVersion, TxnId};

/// One append-only ledger row.
#[derive(Clone, Debug, PartialEq)]
pub struct TxnEntity {
    pub id: TxnId,
    /// Server instance that authored the change; replication consumers
    /// filter on this to see only "changes made elsewhere".
    pub server: String,
    /// Opaque change identifier, deduplicating replayed changes from
    /// clustered peers.
    pub change_txn_id: String,
    /// `None` while the unit of work is still in flight.
    pub commit_time_ms: Option<u64>,
}

/// Outcome of a committed unit of work that performed at least one mutation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TxnCommit {
    pub txn_id: TxnId,
    pub commit_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
}

/// A unit of work against a [`GraphStore`].
///
/// Obtained from [`GraphStore::begin`]; passed to every mutating operation.
/// Node snapshots observed through this handle are version-checked on
/// subsequent writes, surfacing optimistic-concurrency conflicts
/// deterministically (the retry loop itself is the caller's concern).
pub struct Txn<'s> {
    store: &'s GraphStore,
    ledger_id: Option<TxnId>,
    change_txn_id: String,
    state: TxnState,
    /// Versions observed through this unit of work, for stale-write checks.
    snapshots: FxHashMap<NodeId, NodeVersion>,
}

impl<'s> Txn<'s> {
    pub(crate) fn new(store: &'s GraphStore) -> Self {
        Self {
            store,
            ledger_id: None,
            change_txn_id: Uuid::new_v4().to_string(),
            state: TxnState::Active,
            snapshots: FxHashMap::default(),
        }
    }

    /// The ledger entry bound to this unit of work.
    ///
    /// Returns `None` when no mutation has occurred yet and `ensure_new` is
    /// false. With `ensure_new` set, an entry is allocated on the spot.
    pub fn current_txn_id(&mut self, ensure_new: bool) -> Option<TxnId> {
        if self.ledger_id.is_none() && ensure_new {
            let mut tables = self.store.tables_mut();
            let id = self.ensure_ledger(&mut tables);
            return Some(id);
        }
        self.ledger_id
    }

    /// The opaque change identifier this unit of work will commit under.
    pub fn change_txn_id(&self) -> &str {
        &self.change_txn_id
    }

    /// Allocates the ledger row if this is the first mutation.
    pub(crate) fn ensure_ledger(&mut self, tables: &mut Tables) -> TxnId {
        if let Some(id) = self.ledger_id {
            return id;
        }
        let id = tables.new_txn(self.store.config().server.clone(), self.change_txn_id.clone());
        debug!(txn = %id, change = %self.change_txn_id, "ledger entry allocated");
        self.ledger_id = Some(id);
        id
    }

    /// Records the version a node row had when this unit of work read it.
    pub(crate) fn observe(&mut self, node_id: NodeId, version: NodeVersion) {
        self.snapshots.insert(node_id, version);
    }

    /// Fails with a retryable conflict when the row moved on since this
    /// unit of work last observed it.
    pub(crate) fn check_conflict(&self, node_id: NodeId, current: NodeVersion) -> Result<()> {
        match self.snapshots.get(&node_id) {
            Some(&expected) if expected != current => Err(StoreError::Conflict {
                node: node_id,
                expected,
                found: current,
            }),
            _ => Ok(()),
        }
    }

    /// Whether the given node was last written by this unit of work.
    pub fn wrote(&self, txn_id_of_node: TxnId) -> bool {
        self.ledger_id == Some(txn_id_of_node)
    }

    /// Commits the unit of work, stamping the ledger entry.
    ///
    /// Returns `None` when no mutation occurred (no ledger row was ever
    /// allocated — there is nothing to commit).
    pub fn commit(mut self) -> Result<Option<TxnCommit>> {
        self.state = TxnState::Committed;
        match self.ledger_id {
            Some(id) => {
                let commit_time_ms = self.store.stamp_commit(id)?;
                debug!(txn = %id, commit_time_ms, "transaction committed");
                Ok(Some(TxnCommit {
                    txn_id: id,
                    commit_time_ms,
                }))
            }
            None => Ok(None),
        }
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            if let Some(id) = self.ledger_id {
                // Mutations were applied directly; the ledger row must still
                // receive a commit time or change-feed consumers would never
                // see the touched nodes.
                warn!(txn = %id, "transaction dropped without commit; stamping anyway");
                let _ = self.store.stamp_commit(id);
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
