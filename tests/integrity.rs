use arbor::types::{NodeId, QName, StoreRef};
use arbor::{GraphStore, NewNodeSpec, ParentAssocFilter, Result, StoreConfig, StoreError, Txn};

fn workspace() -> StoreRef {
    StoreRef::new("workspace", "SpacesStore")
}

fn contains() -> QName {
    QName::new("cm", "contains")
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
            assoc_type: &contains(),
            assoc_qname: &QName::new("cm", name),
            store_ref: &workspace(),
            uuid: None,
            node_type: &QName::new("cm", "folder"),
            locale: "en_US",
            child_name: Some(name),
            properties: vec![],
        },
    )?;
    Ok(assoc.child.id)
}

#[test]
fn duplicate_child_names_differ_only_by_case_are_rejected() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    add_node(&store, &mut txn, root.id, "foo")?;

    let err = add_node(&store, &mut txn, root.id, "FOO").expect_err("case-insensitive clash");
    assert!(err.is_constraint());
    assert!(matches!(err, StoreError::DuplicateChildName { .. }));

    // Same name under a different association type is allowed.
    let doc = add_node(&store, &mut txn, root.id, "bar")?;
    store.new_child_assoc(
        &mut txn,
        root.id,
        doc,
        &QName::new("cm", "references"),
        &QName::new("cm", "foo-link"),
        Some("foo"),
    )?;
    txn.commit()?;
    Ok(())
}

#[test]
fn deleted_children_release_their_names() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let doc = add_node(&store, &mut txn, root.id, "doc")?;

    assert!(add_node(&store, &mut txn, root.id, "doc").is_err());
    store.delete_node(&mut txn, doc)?;
    // Soft-deleted child no longer holds the name.
    let replacement = add_node(&store, &mut txn, root.id, "doc")?;
    assert_ne!(replacement, doc);
    txn.commit()?;
    Ok(())
}

#[test]
fn rename_collision_checks_run_before_any_edge_changes() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    add_node(&store, &mut txn, root.id, "taken")?;
    let doc = add_node(&store, &mut txn, root.id, "doc")?;
    txn.commit()?;

    let mut txn = store.begin();
    let err = store
        .set_child_assocs_unique_name(&mut txn, doc, "Taken")
        .expect_err("rename into occupied name");
    assert!(matches!(err, StoreError::DuplicateChildName { .. }));
    txn.commit()?;

    // The original name is untouched.
    let found = store.child_assoc_by_name(root.id, &contains(), "doc")?;
    assert_eq!(found.map(|a| a.child.id), Some(doc));
    Ok(())
}

#[test]
fn move_into_own_subtree_is_rejected_before_mutation() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let a = add_node(&store, &mut txn, root.id, "a")?;
    let b = add_node(&store, &mut txn, a, "b")?;
    let c = add_node(&store, &mut txn, b, "c")?;
    txn.commit()?;

    let mut txn = store.begin();
    let err = store
        .move_node(&mut txn, a, c, None, None)
        .expect_err("descendant as new parent");
    assert!(matches!(err, StoreError::CyclicRelationship(_)));
    let self_err = store
        .move_node(&mut txn, a, a, None, None)
        .expect_err("self as new parent");
    assert!(matches!(self_err, StoreError::CyclicRelationship(_)));
    txn.commit()?;

    // Nothing moved.
    assert_eq!(
        store.primary_parent_assoc(a)?.map(|p| p.parent.id),
        Some(root.id)
    );
    store.cycle_check(root.id)?;
    Ok(())
}

#[test]
fn soft_delete_is_idempotent_and_inspectable() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let doc = add_node(&store, &mut txn, root.id, "doc")?;
    txn.commit()?;

    let node_ref = store.node_pair_by_id(doc)?.expect("live").node_ref;
    let mut txn = store.begin();
    assert!(store.delete_node(&mut txn, doc)?);
    assert!(!store.delete_node(&mut txn, doc)?);
    txn.commit()?;

    assert!(!store.exists(&node_ref));
    assert!(!store.exists_id(doc));
    assert_eq!(store.node_pair_by_id(doc)?, None);
    let status = store.node_status(&node_ref)?.expect("status until purge");
    assert!(status.deleted);
    Ok(())
}

#[test]
fn purge_sweeps_only_the_commit_window() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let doc = add_node(&store, &mut txn, root.id, "doc")?;
    let keep = add_node(&store, &mut txn, root.id, "keep")?;
    txn.commit()?;

    let mut txn = store.begin();
    store.delete_node(&mut txn, doc)?;
    let commit = txn.commit()?.expect("committed");
    let t = commit.commit_time_ms;
    assert_eq!(store.min_deleted_node_commit_time(), Some(t));

    // Window excludes the delete: nothing happens.
    assert_eq!(store.purge_nodes(t + 1, t + 2)?, 0);
    assert!(store.node_id_status(doc)?.is_some());

    // Window covers it: the row and its edges disappear for good.
    assert_eq!(store.purge_nodes(t, t + 1)?, 1);
    assert_eq!(store.node_id_status(doc)?, None);
    assert!(store.exists_id(keep));
    assert_eq!(store.count_child_assocs(root.id, false), 1);
    Ok(())
}

#[test]
fn purging_a_parent_drops_its_edges_from_cached_parent_sets() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let a = add_node(&store, &mut txn, root.id, "a")?;
    let b = add_node(&store, &mut txn, root.id, "b")?;
    let doc = add_node(&store, &mut txn, a, "doc")?;
    store.new_child_assoc(
        &mut txn,
        b,
        doc,
        &QName::new("cm", "references"),
        &QName::new("cm", "doc-link"),
        Some("doc"),
    )?;
    txn.commit()?;

    let mut txn = store.begin();
    store.delete_node(&mut txn, b)?;
    let commit = txn.commit()?.expect("committed");

    // Warm the cache with both edges, then sweep the secondary parent away.
    assert_eq!(store.parent_assocs(doc, &ParentAssocFilter::new())?.len(), 2);
    assert_eq!(store.purge_nodes(commit.commit_time_ms, commit.commit_time_ms + 1)?, 1);

    let parents = store.parent_assocs(doc, &ParentAssocFilter::new())?;
    assert_eq!(parents.len(), 1);
    assert!(parents[0].is_primary);
    assert_eq!(parents[0].parent.id, a);
    assert_eq!(store.primary_path(doc)?.to_string(), "/cm:a/cm:doc");
    Ok(())
}

#[test]
fn purged_source_row_of_a_cross_store_move_leaves_no_trace() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let archive = StoreRef::new("archive", "SpacesStore");
    let mut txn = store.begin();
    let ws_root = store.new_store(&mut txn, &workspace())?;
    let ar_root = store.new_store(&mut txn, &archive)?;
    let doc = add_node(&store, &mut txn, ws_root.id, "doc")?;
    txn.commit()?;

    let mut txn = store.begin();
    let (_, moved) = store.move_node(&mut txn, doc, ar_root.id, None, None)?;
    let commit = txn.commit()?.expect("committed");

    assert_eq!(store.purge_nodes(commit.commit_time_ms, commit.commit_time_ms + 1)?, 1);
    assert_eq!(store.node_id_status(doc)?, None);
    // The destination row is untouched by the sweep.
    assert!(store.exists_id(moved.id));
    store.cycle_check(ar_root.id)?;
    Ok(())
}

#[test]
fn duplicate_uuid_within_a_store_is_a_constraint_violation() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let uuid = uuid::Uuid::new_v4();
    let spec = NewNodeSpec {
        parent_id: root.id,
        assoc_type: &contains(),
        assoc_qname: &QName::new("cm", "one"),
        store_ref: &workspace(),
        uuid: Some(uuid),
        node_type: &QName::new("cm", "content"),
        locale: "en_US",
        child_name: Some("one"),
        properties: vec![],
    };
    store.new_node(&mut txn, spec.clone())?;

    let err = store
        .new_node(
            &mut txn,
            NewNodeSpec {
                assoc_qname: &QName::new("cm", "two"),
                child_name: Some("two"),
                ..spec
            },
        )
        .expect_err("uuid reuse");
    assert!(matches!(err, StoreError::NodeExists { .. }));
    assert!(err.is_constraint());
    txn.commit()?;
    Ok(())
}

#[test]
fn duplicate_store_refs_are_rejected() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    store.new_store(&mut txn, &workspace())?;
    let err = store
        .new_store(&mut txn, &workspace())
        .expect_err("store ref reuse");
    assert!(matches!(err, StoreError::StoreExists(_)));
    txn.commit()?;
    Ok(())
}

#[test]
fn node_id_interval_selects_by_type_and_commit_window() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    txn.commit()?;

    let mut txn = store.begin();
    let a = add_node(&store, &mut txn, root.id, "a")?;
    let b = add_node(&store, &mut txn, root.id, "b")?;
    let commit = txn.commit()?.expect("committed");

    let folder = QName::new("cm", "folder");
    let interval = store.node_ids_interval_for_type(&folder, None, Some(commit.commit_time_ms))?;
    assert_eq!(interval, Some((a, b)));
    assert_eq!(
        store.node_ids_interval_for_type(&folder, Some(commit.commit_time_ms + 1), None)?,
        None
    );
    assert_eq!(
        store.node_ids_interval_for_type(&QName::new("cm", "missing"), None, None)?,
        None
    );
    Ok(())
}

#[test]
fn commit_time_range_over_node_ids() -> Result<()> {
    let store = GraphStore::new(StoreConfig::default());
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    txn.commit()?;
    let mut txn = store.begin();
    let a = add_node(&store, &mut txn, root.id, "a")?;
    let commit = txn.commit()?.expect("committed");

    let min = store.min_node_id().expect("nodes exist");
    let max = store.max_node_id().expect("nodes exist");
    assert!(min <= a && a <= max);
    assert_eq!(
        store.max_txn_commit_time_in_node_range(a, a),
        Some(commit.commit_time_ms)
    );
    assert!(store.min_txn_commit_time_in_node_range(min, max).is_some());
    Ok(())
}
