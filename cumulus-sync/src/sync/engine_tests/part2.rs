#[tokio::test]
async fn local_move_becomes_a_single_cloud_move() {
    let mut rig = Rig::new().await;
    std::fs::create_dir(rig.path("A")).unwrap();
    std::fs::create_dir(rig.path("B")).unwrap();
    std::fs::write(rig.path("A/x"), b"move me").unwrap();
    rig.settle(8).await;

    let node_id = rig.engine.node_by_rel_path("A/x").unwrap();
    let db_id = rig.node_at("A/x").db_id;
    let x_handle = rig.node_at("A/x").synced_remote_handle;
    let b_handle = rig.node_at("B").synced_remote_handle;
    assert_ne!(x_handle, UNDEF);

    std::fs::rename(rig.path("A/x"), rig.path("B/x")).unwrap();
    rig.notify("A");
    rig.notify("B");

    let history = rig.settle(6).await;

    assert_eq!(count_moves(&history), 1);
    assert!(matches!(
        history.iter().find(|c| matches!(c, CloudCommand::MoveNode { .. })),
        Some(CloudCommand::MoveNode { handle, new_parent, new_name })
            if *handle == x_handle && *new_parent == b_handle && new_name == "x"
    ));
    // a move is not a delete+create and nothing lands in debris
    assert!(
        !history
            .iter()
            .any(|c| matches!(c, CloudCommand::DeleteNode { .. } | CloudCommand::StartUpload { .. }))
    );
    assert!(!rig.path(".debris").exists());

    assert_eq!(rig.engine.node_by_rel_path("A/x"), None);
    let moved = rig.engine.node_by_rel_path("B/x").unwrap();
    assert_eq!(moved, node_id);
    assert_eq!(rig.node_at("B/x").db_id, db_id);
    assert_eq!(rig.remote.get(x_handle).unwrap().parent, b_handle);
}

#[tokio::test]
async fn case_collision_parks_the_row_and_touches_nothing() {
    let mut rig = Rig::with_case_insensitive(true).await;
    std::fs::write(rig.path("README"), b"upper").unwrap();
    std::fs::write(rig.path("Readme"), b"mixed").unwrap();

    let history = rig.settle(4).await;

    assert!(history.is_empty(), "conflicting names must not reach the cloud");
    let conflicts = rig.conflicts();
    assert!(!conflicts.is_empty());
    assert!(conflicts[0].ends_with("README") || conflicts[0].ends_with("Readme"));
    // the parent stays dirty so resolving the clash retriggers a visit
    let root = rig.engine.node(rig.engine.root()).unwrap();
    assert_eq!(root.sync_again, TreeAction::HereOnly);
}

#[tokio::test]
async fn cloud_deletion_parks_local_bytes_in_debris() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("doomed.txt"), b"precious bytes").unwrap();
    rig.settle(4).await;
    let handle = rig.node_at("doomed.txt").synced_remote_handle;

    rig.remote.remove(handle);
    rig.notify("");
    let history = rig.settle(4).await;

    assert!(history.is_empty(), "cloud deletion needs no cloud commands");
    assert!(!rig.path("doomed.txt").exists());
    let parked = rig.path(".debris/2026-08-02/doomed.txt");
    assert_eq!(std::fs::read(parked).unwrap(), b"precious bytes");
    assert_eq!(rig.engine.node_by_rel_path("doomed.txt"), None);
}

#[tokio::test]
async fn local_deletion_deletes_the_cloud_node_after_a_grace_pass() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("gone.txt"), b"bye").unwrap();
    rig.settle(4).await;
    let handle = rig.node_at("gone.txt").synced_remote_handle;
    let db_id = rig.node_at("gone.txt").db_id;

    std::fs::remove_file(rig.path("gone.txt")).unwrap();
    rig.notify("");
    let history = rig.settle(5).await;

    let deletes: Vec<_> = history
        .iter()
        .filter(|c| matches!(c, CloudCommand::DeleteNode { handle: h } if *h == handle))
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(rig.engine.node_by_rel_path("gone.txt"), None);
    assert!(rig.remote.get(handle).is_none());

    // the state-cache row went with it
    let peek = StateStore::open(rig.pool.clone(), 11, ROOT_HANDLE, 42)
        .await
        .unwrap();
    assert!(
        peek.load_all()
            .await
            .unwrap()
            .iter()
            .all(|(id, _)| *id != db_id)
    );
}

#[tokio::test]
async fn node_gone_on_both_sides_is_removed_after_two_passes() {
    let mut rig = Rig::new().await;
    std::fs::write(rig.path("fleeting.txt"), b"x").unwrap();
    rig.settle(4).await;
    let handle = rig.node_at("fleeting.txt").synced_remote_handle;

    std::fs::remove_file(rig.path("fleeting.txt")).unwrap();
    rig.remote.remove(handle);
    rig.notify("");

    // first pass only marks the node not-seen
    rig.step().await;
    rig.step().await;
    assert!(rig.engine.node_by_rel_path("fleeting.txt").is_some());

    let history = rig.settle(3).await;
    assert!(history.is_empty());
    assert_eq!(rig.engine.node_by_rel_path("fleeting.txt"), None);
}

#[tokio::test]
async fn cloud_side_move_is_followed_locally() {
    let mut rig = Rig::new().await;
    std::fs::create_dir(rig.path("A")).unwrap();
    std::fs::create_dir(rig.path("B")).unwrap();
    std::fs::write(rig.path("A/w.txt"), b"wander").unwrap();
    rig.settle(8).await;

    let w_handle = rig.node_at("A/w.txt").synced_remote_handle;
    let b_handle = rig.node_at("B").synced_remote_handle;

    // the server reports the node under B now
    rig.remote.set_parent(w_handle, b_handle, "w.txt".to_string());
    rig.notify("A");
    let history = rig.settle(5).await;

    assert!(history.is_empty(), "a cloud move needs no commands from us");
    assert_eq!(std::fs::read(rig.path("B/w.txt")).unwrap(), b"wander");
    assert!(!rig.path("A/w.txt").exists());
    assert_eq!(rig.engine.node_by_rel_path("A/w.txt"), None);
    assert_eq!(
        rig.node_at("B/w.txt").synced_remote_handle,
        w_handle
    );
}
