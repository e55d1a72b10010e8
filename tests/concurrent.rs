use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use arbor::types::{QName, StoreRef};
use arbor::{GraphStore, NewNodeSpec, ParentAssocFilter, Result, StoreConfig};

fn workspace() -> StoreRef {
    StoreRef::new("workspace", "SpacesStore")
}

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn readers_see_consistent_parent_assocs_under_writes() -> Result<()> {
    init_logs();
    let store = Arc::new(GraphStore::new(StoreConfig::compact()));
    let mut txn = store.begin();
    let root = store.new_store(&mut txn, &workspace())?;
    let mut nodes = Vec::new();
    for i in 0..16 {
        let name = format!("n{i}");
        let assoc = store.new_node(
            &mut txn,
            NewNodeSpec {
                parent_id: root.id,
                assoc_type: &QName::new("cm", "contains"),
                assoc_qname: &QName::new("cm", name.clone()),
                store_ref: &workspace(),
                uuid: None,
                node_type: &QName::new("cm", "content"),
                locale: "en_US",
                child_name: Some(name.as_str()),
                properties: vec![],
            },
        )?;
        nodes.push(assoc.child.id);
    }
    txn.commit()?;

    let mut handles = Vec::new();
    for t in 0..4 {
        let store = Arc::clone(&store);
        let nodes = nodes.clone();
        handles.push(thread::spawn(move || -> Result<()> {
            for round in 0..50 {
                for &node in &nodes {
                    let parents = store.parent_assocs(node, &ParentAssocFilter::new())?;
                    // Always at least the primary edge; secondary edges may
                    // appear mid-run.
                    assert!(!parents.is_empty(), "round {round} thread {t}");
                    assert!(parents.iter().any(|p| p.is_primary));
                }
            }
            Ok(())
        }));
    }

    // Concurrent writer adds secondary parents while readers scan.
    let writer = {
        let store = Arc::clone(&store);
        let nodes = nodes.clone();
        thread::spawn(move || -> Result<()> {
            for (i, &node) in nodes.iter().enumerate().skip(1) {
                let mut txn = store.begin();
                let link = format!("link{i}");
                store.new_child_assoc(
                    &mut txn,
                    nodes[0],
                    node,
                    &QName::new("cm", "references"),
                    &QName::new("cm", link.clone()),
                    Some(link.as_str()),
                )?;
                txn.commit()?;
            }
            Ok(())
        })
    };

    for handle in handles {
        handle.join().expect("reader thread panicked")?;
    }
    writer.join().expect("writer thread panicked")?;

    // Final state: every node except the first has two parents.
    for &node in nodes.iter().skip(1) {
        assert_eq!(store.parent_assocs(node, &ParentAssocFilter::new())?.len(), 2);
    }
    Ok(())
}

#[test]
fn shared_registry_interns_each_qname_once_across_threads() -> Result<()> {
    let store = Arc::new(GraphStore::new(StoreConfig::default()));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let mut ids = BTreeSet::new();
            for i in 0..32 {
                ids.insert(store.qnames().intern(&QName::new("cm", format!("q{i}"))));
            }
            ids
        }));
    }
    let sets: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("intern thread panicked"))
        .collect();
    for set in &sets {
        assert_eq!(set, &sets[0]);
        assert_eq!(set.len(), 32);
    }
    Ok(())
}
