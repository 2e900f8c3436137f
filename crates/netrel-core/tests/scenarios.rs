//! # End-to-End Scenarios
//!
//! Schema → fixtures → network → queries through the public API only.
//!
//! ## Groups
//! - schema: drop-and-recreate semantics
//! - fixtures: labelled rows feeding a network
//! - network: the three-generation walkthrough on both indexes
//! - persistence: committed state survives reopening a file database

#![allow(clippy::unwrap_used, clippy::panic)]

use netrel_core::{
    AncestryIndex, CascadePolicy, Connection, EntityId, FixtureLoader, FixtureSource, NetrelError,
    NetworkStore, NodeState, ReadAccess, Row, Schema, SchemaLoader,
};

const SCHEMA: &str = r#"
[[tables]]
name = "people"
columns = [
    { name = "name", type = "text", nullable = false },
    { name = "parent_id", type = "reference", references = "people" },
    { name = "position", type = "integer" },
]

[[tables]]
name = "invites"
columns = [
    { name = "inviter_id", type = "reference", references = "people", nullable = false },
    { name = "invitee_id", type = "reference", references = "people", nullable = false },
    { name = "kind", type = "text" },
]

[[networks]]
name = "family"
table = "people"
ordering_column = "position"
edges = { storage = "parent_column", column = "parent_id" }

[[networks]]
name = "contacts"
table = "people"
edges = { storage = "join_table", table = "invites", parent_column = "inviter_id", child_column = "invitee_id", kind_column = "kind", multiplicity = "dag" }
"#;

fn setup() -> (Connection, Schema) {
    let conn = Connection::open_in_memory().expect("open");
    let schema = Schema::from_toml_str(SCHEMA).expect("schema");
    SchemaLoader::apply(&conn, &schema).expect("apply");
    (conn, schema)
}

// =============================================================================
// SCHEMA
// =============================================================================

mod schema {
    use super::*;

    /// Reapplying the same schema leaves the same, empty structure.
    #[test]
    fn reapplication_is_idempotent() {
        let (conn, schema) = setup();
        {
            let mut tx = conn.begin().expect("begin");
            tx.insert("people", Row::new().with("name", "Ann"))
                .expect("insert");
            tx.commit().expect("commit");
        }
        let before = conn.snapshot().expect("snapshot").table_specs().expect("specs");

        SchemaLoader::apply(&conn, &schema).expect("reapply");
        let snapshot = conn.snapshot().expect("snapshot");
        assert_eq!(snapshot.table_specs().expect("specs"), before);
        assert_eq!(snapshot.count("people").expect("count"), 0);

        // Sequences were dropped too.
        let mut tx = conn.begin().expect("begin");
        let id = tx
            .insert("people", Row::new().with("name", "Ann"))
            .expect("insert");
        assert_eq!(id, EntityId(1));
    }

    #[test]
    fn unsupported_type_is_rejected() {
        let err = Schema::from_toml_str(
            "[[tables]]\nname = \"t\"\ncolumns = [{ name = \"at\", type = \"datetime\" }]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("datetime"));
    }
}

// =============================================================================
// FIXTURES
// =============================================================================

mod fixtures {
    use super::*;

    const PEOPLE: &str = r#"
        [grandma]
        name = "Grandma"

        [mum]
        name = "Mum"
        parent_id = "grandma"

        [kid]
        name = "Kid"
        parent_id = "mum"

        [cousin]
        name = "Cousin"
        parent_id = "grandma"
    "#;

    const INVITES: &str = r#"
        [kid_invites_cousin]
        inviter_id = "kid"
        invitee_id = "cousin"
        kind = "friend"
    "#;

    /// Fixture rows are indexed when the network is opened.
    #[test]
    fn networks_open_over_fixture_rows() {
        let (conn, schema) = setup();
        let set = FixtureLoader::load_sources(
            &conn,
            &[
                FixtureSource::new("people.toml", PEOPLE),
                FixtureSource::new("invites.toml", INVITES),
            ],
        )
        .expect("fixtures");
        let family = NetworkStore::open(&conn, schema.network("family").cloned().expect("family"))
            .expect("open family");
        let contacts =
            NetworkStore::open(&conn, schema.network("contacts").cloned().expect("contacts"))
                .expect("open contacts");

        let key = |label| set.key("people", label).expect("label");
        let snapshot = conn.snapshot().expect("snapshot");
        assert_eq!(
            family.ancestors(&snapshot, key("kid")).expect("ancestors"),
            vec![key("grandma"), key("mum")]
        );
        assert_eq!(
            family.children(&snapshot, key("grandma")).expect("children"),
            vec![key("mum"), key("cousin")]
        );
        assert_eq!(
            contacts
                .connections(&snapshot, key("cousin"), Some("friend"))
                .expect("connections"),
            vec![key("kid")]
        );
    }

    /// Fixture rows that form a loop fail the open.
    #[test]
    fn open_rejects_fixture_cycles() {
        let (conn, schema) = setup();
        FixtureLoader::load_sources(
            &conn,
            &[FixtureSource::new(
                "people.toml",
                "[a]\nname = \"A\"\nparent_id = \"b\"\n[b]\nname = \"B\"\nparent_id = \"a\"\n",
            )],
        )
        .expect("fixtures");
        let err = NetworkStore::open(&conn, schema.network("family").cloned().expect("family"))
            .unwrap_err();
        assert!(matches!(err, NetrelError::Cycle { .. }));
    }
}

// =============================================================================
// NETWORK
// =============================================================================

mod network {
    use super::*;

    /// A, B, C: link A→B and B→C, reject C→A, remove B→C, re-add it.
    #[test]
    fn three_generation_walkthrough() {
        for index in [AncestryIndex::ParentPointer, AncestryIndex::Closure] {
            let (conn, schema) = setup();
            let mut config = schema.network("family").cloned().expect("family");
            config.index = index;
            let mut tx = conn.begin().expect("begin");
            let store = NetworkStore::attach(&tx, config).expect("attach");
            let mut person = |name: &str| {
                tx.insert("people", Row::new().with("name", name))
                    .expect("insert")
            };
            let (a, b, c) = (person("A"), person("B"), person("C"));

            store.add_child(&mut tx, a, b, None).expect("a->b");
            let bc = store.add_child(&mut tx, b, c, None).expect("b->c");
            assert_eq!(store.ancestors(&tx, c).expect("ancestors"), vec![a, b]);
            assert_eq!(store.descendants(&tx, a).expect("descendants"), vec![b, c]);
            assert!(store.is_ancestor_of(&tx, a, c).expect("query"));

            assert!(matches!(
                store.add_child(&mut tx, c, a, None),
                Err(NetrelError::Cycle { .. })
            ));
            assert_eq!(store.ancestors(&tx, c).expect("ancestors"), vec![a, b]);

            store.remove_edge(&mut tx, bc).expect("remove");
            assert_eq!(store.state(&tx, c).expect("state"), NodeState::Detached);
            assert_eq!(store.descendants(&tx, a).expect("descendants"), vec![b]);

            store.add_child(&mut tx, b, c, None).expect("re-add");
            assert_eq!(store.ancestors(&tx, c).expect("ancestors"), vec![a, b]);
        }
    }

    /// Reparenting a middle node keeps grandchildren reachable from the root.
    #[test]
    fn reparent_cascade_on_join_table() {
        let (conn, schema) = setup();
        let config = schema
            .network("contacts")
            .cloned()
            .expect("contacts")
            .with_cascade(CascadePolicy::Reparent);
        let mut tx = conn.begin().expect("begin");
        let store = NetworkStore::attach(&tx, config).expect("attach");
        let ids: Vec<EntityId> = ["root", "mid", "leaf1", "leaf2"]
            .into_iter()
            .map(|name| {
                tx.insert("people", Row::new().with("name", name))
                    .expect("insert")
            })
            .collect();
        let (root, mid, leaf1, leaf2) = (ids[0], ids[1], ids[2], ids[3]);
        let edge = store.add_child(&mut tx, root, mid, Some("team")).expect("edge");
        store.add_child(&mut tx, mid, leaf1, Some("team")).expect("edge");
        store.add_child(&mut tx, mid, leaf2, Some("mentor")).expect("edge");
        store.add_child(&mut tx, root, leaf2, Some("mentor")).expect("edge");

        store.remove_edge(&mut tx, edge).expect("remove");
        assert_eq!(store.children(&tx, root).expect("children"), vec![leaf2, leaf1]);
        assert_eq!(store.state(&tx, mid).expect("state"), NodeState::Detached);
        assert_eq!(
            store.connections(&tx, root, Some("team")).expect("connections"),
            vec![leaf1]
        );
        // One join row per remaining edge.
        assert_eq!(tx.count("invites").expect("count"), 2);
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

mod persistence {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn committed_edges_survive_reopen() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("net.redb");
        let schema = Schema::from_toml_str(SCHEMA).expect("schema");
        let config = schema.network("family").cloned().expect("family");

        let (a, b) = {
            let conn = Connection::open_file(&path).expect("open");
            SchemaLoader::apply(&conn, &schema).expect("apply");
            let mut tx = conn.begin().expect("begin");
            let store = NetworkStore::attach(&tx, config.clone()).expect("attach");
            let a = tx.insert("people", Row::new().with("name", "A")).expect("a");
            let b = tx.insert("people", Row::new().with("name", "B")).expect("b");
            store.add_child(&mut tx, a, b, None).expect("link");
            tx.commit().expect("commit");
            (a, b)
        };

        let conn = Connection::open_file(&path).expect("reopen");
        let snapshot = conn.snapshot().expect("snapshot");
        let store = NetworkStore::attach(&snapshot, config).expect("attach");
        assert_eq!(store.parent(&snapshot, b).expect("parent"), Some(a));
        assert_eq!(store.roots(&snapshot).expect("roots"), vec![a]);
    }
}
