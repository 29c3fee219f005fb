use super::*;
use cumulus_core::fs::NodeKind;
use cumulus_core::paths::NameCmp;

fn folder(name: &str) -> SyncNode {
    SyncNode::new(NodeKind::Folder, name, None)
}

fn file(name: &str) -> SyncNode {
    SyncNode::new(NodeKind::File, name, None)
}

#[test]
fn tree_action_only_raises() {
    let mut action = TreeAction::Resolved;
    action.raise(TreeAction::HereAndBelow);
    assert_eq!(action, TreeAction::HereAndBelow);
    action.raise(TreeAction::HereOnly);
    assert_eq!(action, TreeAction::HereAndBelow);
    action.raise(TreeAction::Resolved);
    assert_eq!(action, TreeAction::HereAndBelow);
}

#[test]
fn attach_links_child_and_parent_consistently() {
    let cmp = NameCmp::new(false);
    let mut nodes = Nodes::new();
    let root = nodes.insert(folder("root"));
    let child = nodes.insert(file("a.txt"));
    nodes.attach(&cmp, root, child);

    assert_eq!(nodes[child].parent, Some(root));
    assert_eq!(nodes.child_by_name(&cmp, root, "a.txt"), Some(child));
    // reachable node invariant: parent's children map points back
    let key = cmp.key(&nodes[child].local_name);
    assert_eq!(nodes[root].children.get(&key), Some(&child));
}

#[test]
fn short_names_get_a_secondary_lookup() {
    let cmp = NameCmp::new(true);
    let mut nodes = Nodes::new();
    let root = nodes.insert(folder("root"));
    let child = nodes.insert(SyncNode::new(
        NodeKind::File,
        "Long Name.txt",
        Some("LONGNA~1.TXT".to_string()),
    ));
    nodes.attach(&cmp, root, child);

    assert_eq!(nodes.child_by_name(&cmp, root, "longna~1.txt"), Some(child));
    nodes.detach(&cmp, child);
    assert_eq!(nodes.child_by_name(&cmp, root, "longna~1.txt"), None);
}

#[test]
fn set_name_parent_moves_the_node() {
    let cmp = NameCmp::new(false);
    let mut nodes = Nodes::new();
    let root = nodes.insert(folder("root"));
    let a = nodes.insert(folder("A"));
    let b = nodes.insert(folder("B"));
    let x = nodes.insert(file("x"));
    nodes.attach(&cmp, root, a);
    nodes.attach(&cmp, root, b);
    nodes.attach(&cmp, a, x);

    nodes.set_name_parent(&cmp, x, b, "y", None);

    assert_eq!(nodes.child_by_name(&cmp, a, "x"), None);
    assert_eq!(nodes.child_by_name(&cmp, b, "y"), Some(x));
    assert_eq!(nodes[x].parent, Some(b));
    assert_eq!(nodes[x].local_name, "y");
    assert_eq!(nodes.relative_path(root, x), "B/y");
}

#[test]
fn fsid_index_tracks_rebinding() {
    let mut nodes = Nodes::new();
    let mut index = FsidIndex::new();
    let a = nodes.insert(file("a"));
    let b = nodes.insert(file("b"));

    set_fsid(&mut nodes, &mut index, 7, a, 100);
    assert_eq!(index.get(100), Some((7, a)));

    // rebinding the node replaces its old entry
    set_fsid(&mut nodes, &mut index, 7, a, 200);
    assert_eq!(index.get(100), None);
    assert_eq!(index.get(200), Some((7, a)));

    set_fsid(&mut nodes, &mut index, 7, b, 300);
    clear_fsid(&mut nodes, &mut index, 7, b);
    assert_eq!(index.get(300), None);
    assert_eq!(nodes[b].fs_id, cumulus_core::remote::UNDEF);

    index.purge_sync(7);
    assert!(index.is_empty());
}

#[test]
fn serialize_round_trips_every_persisted_field() {
    let mut node = SyncNode::new(
        NodeKind::File,
        "Report Final.pdf",
        Some("REPORT~1.PDF".to_string()),
    );
    node.parent_db_id = 42;
    node.fs_id = 0xdead_beef_0000_0001;
    node.remote_handle = 55;
    node.synced_remote_handle = 55;
    node.size = 123_456;
    node.mtime = 1_700_000_000;
    node.fingerprint = cumulus_core::fingerprint::FileFingerprint::remote(
        123_456,
        1_700_000_000,
        0xcafe_f00d,
    );
    node.short_name_in_db = true;

    let data = node.serialize();
    let cached = CachedNode::deserialize(&data).unwrap();

    assert_eq!(cached.kind, NodeKind::File);
    assert_eq!(cached.parent_db_id, 42);
    assert_eq!(cached.fs_id, 0xdead_beef_0000_0001);
    assert_eq!(cached.remote_handle, 55);
    assert_eq!(cached.synced_remote_handle, 55);
    assert_eq!(cached.size, 123_456);
    assert_eq!(cached.mtime, 1_700_000_000);
    assert_eq!(cached.local_name, "Report Final.pdf");
    assert_eq!(cached.short_name.as_deref(), Some("REPORT~1.PDF"));
    assert!(cached.short_name_in_db);
    assert_eq!(cached.crc, 0xcafe_f00d);

    let rebuilt = cached.into_node();
    assert!(rebuilt.fingerprint.valid);
    assert_eq!(rebuilt.fingerprint.crc, 0xcafe_f00d);
}

#[test]
fn serialized_layout_is_bit_exact() {
    let mut node = SyncNode::new(NodeKind::Folder, "ab", None);
    node.parent_db_id = 3;
    let data = node.serialize();

    assert_eq!(data[0], CACHE_VERSION);
    assert_eq!(data[1], 1); // folder
    assert_eq!(&data[2..6], &3u32.to_le_bytes());
    // fs_id, remote, synced, size, mtime all zero
    assert!(data[6..46].iter().all(|&b| b == 0));
    assert_eq!(&data[46..48], &2u16.to_le_bytes());
    assert_eq!(&data[48..50], b"ab");
    assert_eq!(&data[50..52], &0u16.to_le_bytes());
    assert_eq!(data[52], 1); // flags: short name present in db
    assert_eq!(&data[53..57], &0u32.to_le_bytes());
    assert_eq!(data.len(), 57);
}

#[test]
fn deserialize_rejects_unknown_version_and_truncation() {
    let node = SyncNode::new(NodeKind::File, "x", None);
    let mut data = node.serialize();
    assert!(CachedNode::deserialize(&data[..data.len() - 1]).is_none());
    data[0] = 99;
    assert!(CachedNode::deserialize(&data).is_none());
}
