#[tokio::test]
async fn local_edit_with_history_uploads_the_new_bytes() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("note.txt"), b"v1").unwrap();
    rig.settle(4).await;

    std::fs::write(rig.path("note.txt"), b"v2 is longer").unwrap();
    rig.notify("");
    let history = rig.settle(5).await;

    let uploads = history
        .iter()
        .filter(|c| matches!(c, CloudCommand::StartUpload { .. }))
        .count();
    assert_eq!(uploads, 1);
    let node = rig.node_at("note.txt");
    let cloud = rig.remote.get(node.synced_remote_handle).unwrap();
    assert_eq!(cloud.size, 12);
    assert!(node.fingerprint.matches(&cloud.fingerprint()));
}

#[tokio::test]
async fn cloud_edit_with_history_downloads_and_parks_the_loser() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("shared.txt"), b"local old").unwrap();
    rig.settle(4).await;
    let handle = rig.node_at("shared.txt").synced_remote_handle;

    // the server now has different bytes for the same node
    let parent = rig.remote.get(handle).unwrap().parent;
    let mtime = rig.remote.get(handle).unwrap().mtime + 500;
    rig.remote.remove(handle);
    rig.remote.upsert(RemoteNode {
        handle,
        parent,
        name: Some("shared.txt".to_string()),
        kind: NodeKind::File,
        size: 9,
        mtime,
        crc: body_crc(b"cloud new"),
        decrypted: true,
        alive: true,
    });
    rig.bodies.insert(handle, b"cloud new".to_vec());

    rig.notify("");
    let history = rig.settle(5).await;

    let downloads = history
        .iter()
        .filter(|c| matches!(c, CloudCommand::StartDownload { .. }))
        .count();
    assert_eq!(downloads, 1);
    assert_eq!(std::fs::read(rig.path("shared.txt")).unwrap(), b"cloud new");
    assert_eq!(
        std::fs::read(rig.path(".debris/2026-08-02/shared.txt")).unwrap(),
        b"local old"
    );
}

#[tokio::test]
async fn matching_unsynced_sides_bind_without_transfers() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("same.txt"), b"identical").unwrap();
    let mtime = disk_mtime(&rig.path("same.txt"));
    let handle = rig.remote_file(ROOT_HANDLE, "same.txt", b"identical", mtime);

    let history = rig.settle(4).await;

    assert!(history.is_empty(), "identical sides need no transfers");
    let node = rig.node_at("same.txt");
    assert_eq!(node.synced_remote_handle, handle);
}

#[tokio::test]
async fn conflicting_unsynced_sides_resolve_by_newer_mtime() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("clash.txt"), b"local version").unwrap();
    set_mtime(&rig.path("clash.txt"), 1_700_000_000);
    // the cloud copy is newer and must win
    rig.remote_file(ROOT_HANDLE, "clash.txt", b"cloud version!", 1_700_009_999);

    let history = rig.settle(6).await;

    assert!(history.iter().any(|c| matches!(c, CloudCommand::StartDownload { .. })));
    assert!(!history.iter().any(|c| matches!(c, CloudCommand::StartUpload { .. })));
    assert_eq!(
        std::fs::read(rig.path("clash.txt")).unwrap(),
        b"cloud version!"
    );
    assert_eq!(
        std::fs::read(rig.path(".debris/2026-08-02/clash.txt")).unwrap(),
        b"local version"
    );
}

#[tokio::test]
async fn copy_with_live_origin_waits_then_uploads_as_new_file() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("orig.bin"), b"settled content").unwrap();
    rig.settle(4).await;

    // same fsid shows up under a second name while the origin stays put
    std::fs::hard_link(rig.path("orig.bin"), rig.path("copy.bin")).unwrap();
    rig.notify("");
    let history = rig.settle(8).await;

    assert_eq!(count_moves(&history), 0);
    let uploads: Vec<_> = history
        .iter()
        .filter_map(|c| match c {
            CloudCommand::StartUpload { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec!["copy.bin"]);
    // both files are bound; the fsid stays with the original
    assert!(rig.path("orig.bin").exists());
    assert_ne!(rig.node_at("copy.bin").synced_remote_handle, UNDEF);
    assert_ne!(rig.node_at("orig.bin").fs_id, UNDEF);
    assert_eq!(rig.node_at("copy.bin").fs_id, UNDEF);
}

#[tokio::test]
async fn never_stable_file_is_abandoned_with_a_telemetry_event() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("churn.bin"), b"0").unwrap();
    rig.settle(4).await;

    std::fs::hard_link(rig.path("churn.bin"), rig.path("churn-copy.bin")).unwrap();
    rig.notify("");

    // keep the origin changing for more than sixty seconds of engine time;
    // the dirty flags persist, so no further notifications are needed
    let mut grew = std::vec::Vec::from(b"0".as_slice());
    for round in 0..32 {
        grew.push(b'x');
        std::fs::write(rig.path("churn.bin"), &grew).unwrap();
        set_mtime(&rig.path("churn.bin"), 1_700_000_000 + round);
        rig.step().await;
        rig.drain();
        if rig.events().contains(&EVENT_FILE_NEVER_STABLE) {
            break;
        }
    }

    assert!(rig.events().contains(&EVENT_FILE_NEVER_STABLE));
}

#[tokio::test]
async fn restart_preserves_an_offline_rename() {
    let mut rig = Rig::new().await;
    std::fs::create_dir(rig.path("A")).unwrap();
    std::fs::write(rig.path("A/x"), b"ten bytes!").unwrap();
    std::fs::write(rig.path("A/y"), b"twenty bytes exactly").unwrap();
    rig.settle(8).await;

    let x_db = rig.node_at("A/x").db_id;
    let x_handle = rig.node_at("A/x").synced_remote_handle;
    let a_handle = rig.node_at("A").synced_remote_handle;
    assert_ne!(x_handle, UNDEF);

    // offline rename, then a fresh process
    std::fs::rename(rig.path("A/x"), rig.path("A/z")).unwrap();
    rig.restart().await;

    let history = rig.settle(8).await;

    assert_eq!(count_moves(&history), 1);
    assert!(matches!(
        history.iter().find(|c| matches!(c, CloudCommand::MoveNode { .. })),
        Some(CloudCommand::MoveNode { handle, new_parent, new_name })
            if *handle == x_handle && *new_parent == a_handle && new_name == "z"
    ));
    assert!(
        !history
            .iter()
            .any(|c| matches!(c, CloudCommand::DeleteNode { .. } | CloudCommand::StartUpload { .. })),
        "a rename must not become delete+create: {history:?}"
    );
    // same row, new name
    assert_eq!(rig.node_at("A/z").db_id, x_db);
    assert_eq!(rig.engine.node_by_rel_path("A/x"), None);
    // the untouched sibling kept its binding
    assert_ne!(rig.node_at("A/y").synced_remote_handle, UNDEF);
}

#[tokio::test]
async fn state_cache_rows_always_have_committed_parents() {
    let mut rig = Rig::new().await;
    std::fs::create_dir_all(rig.path("p/q/r")).unwrap();
    std::fs::write(rig.path("p/q/r/leaf.txt"), b"leaf").unwrap();
    rig.settle(10).await;

    let peek = StateStore::open(rig.pool.clone(), 11, ROOT_HANDLE, 42)
        .await
        .unwrap();
    let rows = peek.load_all().await.unwrap();
    assert_eq!(rows.len(), 4);

    let ids: std::collections::HashSet<u32> = rows.iter().map(|(id, _)| *id).collect();
    for (id, data) in &rows {
        let cached = CachedNode::deserialize(data).unwrap();
        assert!(
            cached.parent_db_id == 0 || ids.contains(&cached.parent_db_id),
            "row {id} references missing parent {}",
            cached.parent_db_id
        );
    }

    // a restart rebuilds the exact shape
    rig.restart().await;
    assert!(rig.engine.node_by_rel_path("p/q/r/leaf.txt").is_some());
    assert_ne!(rig.node_at("p/q/r/leaf.txt").db_id, 0);
}

#[tokio::test]
async fn shutdown_keeps_the_cache_while_disable_purges_it() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("keep.txt"), b"keep").unwrap();
    rig.settle(4).await;

    rig.engine.shutdown(&mut rig.index).await;
    assert_eq!(rig.engine.state(), SyncState::Canceled);
    assert!(rig.index.is_empty());

    let peek = StateStore::open(rig.pool.clone(), 11, ROOT_HANDLE, 42)
        .await
        .unwrap();
    assert!(!peek.load_all().await.unwrap().is_empty(), "cancel keeps rows");

    // a fresh engine rehydrates, then gets disabled: rows are torn down
    rig.restart().await;
    assert!(rig.engine.node_by_rel_path("keep.txt").is_some());
    rig.engine.disable(&mut rig.index).await;
    assert_eq!(rig.engine.state(), SyncState::Disabled);
    assert!(rig.index.is_empty());
    assert!(peek.load_all().await.unwrap().is_empty(), "disable purges rows");
}
