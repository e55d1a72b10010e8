use arbor::types::{NodeId, QName, StoreRef, TxnId};
use arbor::{GraphStore, NewNodeSpec, Result, StoreConfig, StoreError, Txn, TxnQuery};

fn workspace() -> StoreRef {
    StoreRef::new("workspace", "SpacesStore")
}

fn add_node(
    store: &GraphStore,
    txn: &mut Txn<'_>,
    parent_id: NodeId,
    name: &str,
) -> Result<NodeId> {
    let assoc = store.new_node(
        txn,
        NewNodeSpec {
            parent_id,
            assoc_type: &QName::new("cm", "contains"),
            assoc_qname: &QName::new("cm", name),
            store_ref: &workspace(),
            uuid: None,
            node_type: &QName::new("cm", "content"),
            locale: "en_US",
            child_name: Some(name),
            properties: vec![],
        },
    )?;
    Ok(assoc.child.id)
}

#[test]
fn read_only_transaction_allocates_no_ledger_entry() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    store.new_store(&mut setup, &workspace())?;
    setup.commit()?;
    let before = store.txn_count();

    let mut txn = store.begin();
    assert!(store.root_node(&workspace())?.is_some());
    assert_eq!(txn.current_txn_id(false), None);
    assert_eq!(txn.commit()?, None);
    assert_eq!(store.txn_count(), before);
    Ok(())
}

#[test]
fn first_mutation_allocates_ledger_entry_lazily() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    setup.commit()?;

    let mut txn = store.begin();
    assert_eq!(txn.current_txn_id(false), None);
    let node = add_node(&store, &mut txn, root.id, "doc")?;
    let ledger = txn.current_txn_id(false).expect("ledger after mutation");
    assert_eq!(store.node_txn_id(node), Some(ledger));
    let commit = txn.commit()?.expect("mutating txn commits");
    assert_eq!(commit.txn_id, ledger);
    Ok(())
}

#[test]
fn commit_times_are_monotonic_non_decreasing() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    let first = setup.commit()?.expect("committed");

    let mut last = first.commit_time_ms;
    for i in 0..5 {
        let mut txn = store.begin();
        add_node(&store, &mut txn, root.id, &format!("n{i}"))?;
        let commit = txn.commit()?.expect("committed");
        assert!(commit.commit_time_ms >= last);
        assert!(commit.txn_id > first.txn_id);
        last = commit.commit_time_ms;
    }
    assert_eq!(store.max_txn_commit_time(), Some(last));
    Ok(())
}

#[test]
fn stale_snapshot_write_is_a_retryable_conflict() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    let node = add_node(&store, &mut setup, root.id, "doc")?;
    setup.commit()?;

    let mut t1 = store.begin();
    let mut t2 = store.begin();
    assert!(store.read_node(&mut t1, node).is_some());
    assert!(store.read_node(&mut t2, node).is_some());

    store.set_node_acl_id(&mut t2, node, Some(7))?;
    t2.commit()?;

    let err = store
        .set_node_acl_id(&mut t1, node, Some(8))
        .expect_err("stale write must conflict");
    assert!(err.is_retryable());
    assert!(matches!(err, StoreError::Conflict { node: n, .. } if n == node));
    Ok(())
}

#[test]
fn retry_with_fresh_snapshot_succeeds() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    let node = add_node(&store, &mut setup, root.id, "doc")?;
    setup.commit()?;

    let mut t1 = store.begin();
    assert!(store.read_node(&mut t1, node).is_some());
    let mut t2 = store.begin();
    store.set_node_acl_id(&mut t2, node, Some(7))?;
    t2.commit()?;
    assert!(store.set_node_acl_id(&mut t1, node, Some(8)).is_err());
    drop(t1);

    // A fresh unit of work re-reads and wins.
    let mut t3 = store.begin();
    assert!(store.read_node(&mut t3, node).is_some());
    store.set_node_acl_id(&mut t3, node, Some(8))?;
    t3.commit()?;
    assert_eq!(store.node_acl_id(node), Some(8));
    Ok(())
}

#[test]
fn dropped_transaction_still_stamps_its_ledger_entry() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let ledger;
    {
        let mut txn = store.begin();
        store.new_store(&mut txn, &workspace())?;
        ledger = txn.current_txn_id(false).expect("ledger allocated");
        // no commit
    }
    let entry = store.txn_by_id(ledger).expect("entry survives drop");
    assert!(entry.commit_time_ms.is_some());
    Ok(())
}

#[test]
fn txn_changes_report_exactly_the_touched_nodes() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    let a = add_node(&store, &mut setup, root.id, "a")?;
    setup.commit()?;

    let mut txn = store.begin();
    let b = add_node(&store, &mut txn, root.id, "b")?;
    store.delete_node(&mut txn, a)?;
    let commit = txn.commit()?.expect("committed");

    let changes = store.txn_changes(commit.txn_id)?;
    let ids: Vec<NodeId> = changes.iter().map(|s| s.id).collect();
    assert!(ids.contains(&a));
    assert!(ids.contains(&b));
    assert!(!ids.contains(&root.id));
    let a_status = changes.iter().find(|s| s.id == a).unwrap();
    assert!(a_status.deleted);
    let b_status = changes.iter().find(|s| s.id == b).unwrap();
    assert!(!b_status.deleted);
    Ok(())
}

#[test]
fn commit_time_window_query_pages_and_filters() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default().with_server("node-a"));
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    setup.commit()?;

    let mut commits = Vec::new();
    for i in 0..4 {
        let mut txn = store.begin();
        add_node(&store, &mut txn, root.id, &format!("n{i}"))?;
        commits.push(txn.commit()?.expect("committed"));
    }

    let all = store.txns_by_commit_time(&TxnQuery::new());
    assert_eq!(all.len(), 5); // setup + 4
    for window in all.windows(2) {
        assert!(window[0].commit_time_ms <= window[1].commit_time_ms);
        assert!(window[0].id < window[1].id);
    }

    let limited = store.txns_by_commit_time(&TxnQuery::new().descending().limit(2));
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, commits[3].txn_id);

    let excluded =
        store.txns_by_commit_time(&TxnQuery::new().exclude_ids(vec![commits[0].txn_id]));
    assert!(excluded.iter().all(|t| t.id != commits[0].txn_id));

    // Everything here was written by this server.
    let foreign = store.txns_by_commit_time(&TxnQuery::new().exclude_server("node-a"));
    assert!(foreign.is_empty());
    Ok(())
}

#[test]
fn unused_ledger_entries_become_sweepable() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    setup.commit()?;

    let mut t1 = store.begin();
    let node = add_node(&store, &mut t1, root.id, "doc")?;
    let c1 = t1.commit()?.expect("committed");

    // Re-attributing the node orphans the creating ledger entry.
    let mut t2 = store.begin();
    store.touch_nodes(&mut t2, &[node])?;
    let c2 = t2.commit()?.expect("committed");

    let unused = store.txns_unused(TxnId(0), c2.commit_time_ms + 1, 10);
    assert!(unused.contains(&c1.txn_id));
    assert!(!unused.contains(&c2.txn_id));

    assert!(store.purge_txn(c1.txn_id)?);
    assert_eq!(store.txn_by_id(c1.txn_id), None);
    assert!(!store.purge_txn(c1.txn_id)?);

    // Still referenced by the node row, so protected.
    let err = store.purge_txn(c2.txn_id).expect_err("referenced entry");
    assert!(matches!(err, StoreError::InvalidArgument(_)));
    Ok(())
}

#[test]
fn delete_txns_unused_sweeps_only_the_window() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    setup.commit()?;

    let mut t1 = store.begin();
    let node = add_node(&store, &mut t1, root.id, "doc")?;
    let c1 = t1.commit()?.expect("committed");
    let mut t2 = store.begin();
    store.touch_nodes(&mut t2, &[node])?;
    let c2 = t2.commit()?.expect("committed");

    // Window entirely before the unused entry committed: nothing swept.
    assert_eq!(store.delete_txns_unused(0, c1.commit_time_ms), 0);
    assert!(store.txn_by_id(c1.txn_id).is_some());

    // Window covering it: swept; referenced entries stay.
    assert_eq!(
        store.delete_txns_unused(c1.commit_time_ms, c2.commit_time_ms + 1),
        1
    );
    assert!(store.txn_by_id(c1.txn_id).is_none());
    assert!(store.txn_by_id(c2.txn_id).is_some());
    Ok(())
}

#[test]
fn ledger_id_extremes_and_commit_anchors() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    assert_eq!(store.min_txn_id(), None);
    assert_eq!(store.max_txn_commit_time(), None);

    let mut setup = store.begin();
    let root = store.new_store(&mut setup, &workspace())?;
    let c0 = setup.commit()?.expect("committed");
    let mut txn = store.begin();
    add_node(&store, &mut txn, root.id, "doc")?;
    let c1 = txn.commit()?.expect("committed");

    assert_eq!(store.min_txn_id(), Some(c0.txn_id));
    assert_eq!(store.max_txn_id(), Some(c1.txn_id));
    assert_eq!(store.min_txn_commit_time(), Some(c0.commit_time_ms));
    assert_eq!(
        store.max_txn_id_by_commit_time(c1.commit_time_ms),
        Some(c1.txn_id)
    );
    assert_eq!(store.next_txn_commit_time(c1.commit_time_ms + 1), None);
    Ok(())
}
