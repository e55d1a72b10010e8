use std::collections::HashSet;

use proptest::prelude::*;

use arbor::types::{NodeVersion, PropValue, QName, StoreRef};
use arbor::{GraphStore, NewNodeSpec, StoreConfig};

fn workspace() -> StoreRef {
    StoreRef::new("workspace", "SpacesStore")
}

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 _.-]{1,80}"
}

proptest! {
    #[test]
    fn child_names_are_case_insensitively_unique(names in prop::collection::vec(name_strategy(), 1..20)) {
        let store = GraphStore::new(StoreConfig::default());
        let mut txn = store.begin();
        let root = store.new_store(&mut txn, &workspace()).unwrap();

        let mut seen: HashSet<String> = HashSet::new();
        for name in &names {
            let result = store.new_node(
                &mut txn,
                NewNodeSpec {
                    parent_id: root.id,
                    assoc_type: &QName::new("cm", "contains"),
                    assoc_qname: &QName::new("cm", "child"),
                    store_ref: &workspace(),
                    uuid: None,
                    node_type: &QName::new("cm", "content"),
                    locale: "en_US",
                    child_name: Some(name),
                    properties: vec![],
                },
            );
            let clash = !seen.insert(name.to_lowercase());
            prop_assert_eq!(result.is_err(), clash, "name {:?}", name);
        }
        txn.commit().unwrap();
    }

    #[test]
    fn node_version_counts_effective_writes(acls in prop::collection::vec(proptest::option::of(0u64..4), 0..16)) {
        let store = GraphStore::new(StoreConfig::default());
        let mut txn = store.begin();
        let root = store.new_store(&mut txn, &workspace()).unwrap();
        let assoc = store.new_node(
            &mut txn,
            NewNodeSpec {
                parent_id: root.id,
                assoc_type: &QName::new("cm", "contains"),
                assoc_qname: &QName::new("cm", "doc"),
                store_ref: &workspace(),
                uuid: None,
                node_type: &QName::new("cm", "content"),
                locale: "en_US",
                child_name: Some("doc"),
                properties: vec![],
            },
        ).unwrap();
        let node = assoc.child.id;

        // Every ACL write goes through the central row-write path, so the
        // version advances by exactly one per call.
        for acl in &acls {
            store.set_node_acl_id(&mut txn, node, *acl).unwrap();
        }
        txn.commit().unwrap();
        let entity = store.node(node).unwrap();
        prop_assert_eq!(entity.version(), NodeVersion(acls.len() as u64));
    }

    #[test]
    fn property_writes_round_trip(values in prop::collection::vec(any::<i64>(), 0..10)) {
        let store = GraphStore::new(StoreConfig::default());
        let mut txn = store.begin();
        let root = store.new_store(&mut txn, &workspace()).unwrap();
        let assoc = store.new_node(
            &mut txn,
            NewNodeSpec {
                parent_id: root.id,
                assoc_type: &QName::new("cm", "contains"),
                assoc_qname: &QName::new("cm", "doc"),
                store_ref: &workspace(),
                uuid: None,
                node_type: &QName::new("cm", "content"),
                locale: "en_US",
                child_name: Some("doc"),
                properties: vec![],
            },
        ).unwrap();
        let node = assoc.child.id;

        for (i, v) in values.iter().enumerate() {
            store
                .add_node_property(&mut txn, node, &QName::new("t", format!("p{i}")), PropValue::Int(*v))
                .unwrap();
        }
        txn.commit().unwrap();

        let props = store.node_properties(node).unwrap();
        prop_assert_eq!(props.len(), values.len());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(props.get(&QName::new("t", format!("p{i}"))), Some(&PropValue::Int(*v)));
        }
    }
}
