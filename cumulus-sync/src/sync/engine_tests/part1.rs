#[tokio::test]
async fn empty_root_goes_active_without_store_rows() {
    let mut rig = Rig::new().await;
    rig.step().await;

    assert_eq!(rig.engine.state(), SyncState::Active);
    assert_eq!(
        rig.states(),
        vec![(SyncState::Active, SyncErrorCode::NoError)]
    );

    let peek = StateStore::open(rig.pool.clone(), 11, ROOT_HANDLE, 42)
        .await
        .unwrap();
    assert!(peek.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_root_fails_the_sync() {
    let dir = tempdir().unwrap();
    let config = SyncConfig::new(
        TEST_TAG,
        dir.path().join("does-not-exist"),
        ROOT_HANDLE,
        42,
    );
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let mut index = FsidIndex::new();
    let mut engine = SyncEngine::new(
        config,
        None,
        Box::new(TestMonitor(recorded.clone())),
        &mut index,
    )
    .await
    .unwrap();

    let remote = RemoteTree::new();
    engine
        .step(&mut index, &remote, 1000, datetime!(2026-08-02 12:00:00 UTC))
        .await
        .unwrap();

    assert_eq!(engine.state(), SyncState::Failed);
    assert_eq!(engine.error_code(), SyncErrorCode::RootMissing);
    assert_eq!(
        recorded.lock().unwrap().states,
        vec![(SyncState::Failed, SyncErrorCode::RootMissing)]
    );
}

#[tokio::test]
async fn file_root_and_symlink_root_fail_with_their_own_codes() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("plain"), b"x").unwrap();
    std::os::unix::fs::symlink(dir.path().join("plain"), dir.path().join("link")).unwrap();

    for (rel, expected) in [
        ("plain", SyncErrorCode::RootNotAFolder),
        ("link", SyncErrorCode::RootIsSymlink),
    ] {
        let config = SyncConfig::new(TEST_TAG, dir.path().join(rel), ROOT_HANDLE, 42);
        let mut index = FsidIndex::new();
        let mut engine = SyncEngine::new(config, None, Box::new(NullMonitor), &mut index)
            .await
            .unwrap();
        engine
            .step(
                &mut index,
                &RemoteTree::new(),
                1000,
                datetime!(2026-08-02 12:00:00 UTC),
            )
            .await
            .unwrap();
        assert_eq!(engine.state(), SyncState::Failed);
        assert_eq!(engine.error_code(), expected);
    }
}

#[tokio::test]
async fn new_local_file_is_uploaded_and_bound() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("a.txt"), b"hello upload").unwrap();

    let history = rig.settle(4).await;

    let uploads: Vec<_> = history
        .iter()
        .filter_map(|c| match c {
            CloudCommand::StartUpload { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, vec!["a.txt".to_string()]);

    let node = rig.node_at("a.txt");
    assert_ne!(node.synced_remote_handle, UNDEF);
    assert_eq!(node.remote_handle, node.synced_remote_handle);
    assert!(node.fingerprint.valid);
    assert_eq!(rig.engine.local_bytes(), 12);
}

#[tokio::test]
async fn cloud_only_file_is_downloaded_and_marked_synced() {
    let mut rig = Rig::new().await;
    let folder = rig.remote_folder(ROOT_HANDLE, "A");
    let handle = rig.remote_file(folder, "new.txt", b"cloud body", 1_700_000_000);

    rig.settle(5).await;

    assert_eq!(std::fs::read(rig.path("A/new.txt")).unwrap(), b"cloud body");
    let node = rig.node_at("A/new.txt");
    assert_eq!(node.synced_remote_handle, handle);
    assert_eq!(node.scan_again, TreeAction::Resolved);
    assert!(node.fingerprint.valid);
    // the folder came down first and is synced too
    assert_eq!(rig.node_at("A").synced_remote_handle, folder);
}

#[tokio::test]
async fn settled_tree_is_idempotent() {
    let mut rig = Rig::new().await;
    std::fs::create_dir(rig.path("docs")).unwrap();
    std::fs::write(rig.path("docs/a.txt"), b"payload").unwrap();
    rig.settle(6).await;

    let peek = StateStore::open(rig.pool.clone(), 11, ROOT_HANDLE, 42)
        .await
        .unwrap();
    let rows_before = peek.load_all().await.unwrap();
    assert!(!rows_before.is_empty());

    // no external changes: no commands, no store writes
    let history = rig.settle(3).await;
    assert!(history.is_empty(), "unexpected commands: {history:?}");
    assert_eq!(peek.load_all().await.unwrap(), rows_before);
}

#[tokio::test]
async fn local_tree_with_nested_folders_is_pushed_up() {
    let mut rig = Rig::new().await;
    std::fs::create_dir_all(rig.path("a/b")).unwrap();
    std::fs::write(rig.path("a/b/deep.txt"), b"deep").unwrap();

    let history = rig.settle(8).await;

    let folders = history
        .iter()
        .filter(|c| matches!(c, CloudCommand::NewFolder { .. }))
        .count();
    assert_eq!(folders, 2);
    assert_ne!(rig.node_at("a/b/deep.txt").synced_remote_handle, UNDEF);

    // cloud tree mirrors the nesting
    let a = rig.node_at("a").synced_remote_handle;
    let b = rig.node_at("a/b").synced_remote_handle;
    assert_eq!(rig.remote.get(b).unwrap().parent, a);
    assert_eq!(
        rig.remote.path_of(ROOT_HANDLE, rig.node_at("a/b/deep.txt").synced_remote_handle),
        Some(vec!["a".to_string(), "b".to_string(), "deep.txt".to_string()])
    );
}
