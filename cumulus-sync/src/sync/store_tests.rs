use super::*;

async fn make_store() -> StateStore {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    StateStore::open(pool, 1, 2, 3).await.unwrap()
}

#[test]
fn table_name_is_stable_and_identifier_safe() {
    let a = state_table_name(0x1122, 0x3344, 0x5566);
    let b = state_table_name(0x1122, 0x3344, 0x5566);
    let c = state_table_name(0x1122, 0x3344, 0x5567);
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.starts_with("syncstate_"));
    assert!(a.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-'));
}

#[tokio::test]
async fn commit_then_load_round_trips_rows() {
    let mut store = make_store().await;
    let first = store.allocate_id();
    let second = store.allocate_id();
    assert_ne!(first, second);

    store
        .commit(
            &[(first, b"alpha".to_vec()), (second, b"beta".to_vec())],
            &[],
        )
        .await
        .unwrap();

    let rows = store.load_all().await.unwrap();
    assert_eq!(
        rows,
        vec![(first, b"alpha".to_vec()), (second, b"beta".to_vec())]
    );
}

#[tokio::test]
async fn commit_applies_deletions_and_upserts_together() {
    let mut store = make_store().await;
    let a = store.allocate_id();
    let b = store.allocate_id();
    store
        .commit(&[(a, b"a".to_vec()), (b, b"b".to_vec())], &[])
        .await
        .unwrap();

    store
        .commit(&[(b, b"b2".to_vec())], &[a])
        .await
        .unwrap();

    let rows = store.load_all().await.unwrap();
    assert_eq!(rows, vec![(b, b"b2".to_vec())]);
}

#[tokio::test]
async fn reopen_resumes_id_allocation_past_existing_rows() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let mut store = StateStore::open(pool.clone(), 9, 9, 9).await.unwrap();
    let a = store.allocate_id();
    store.commit(&[(a, b"x".to_vec())], &[]).await.unwrap();

    let mut reopened = StateStore::open(pool, 9, 9, 9).await.unwrap();
    assert!(reopened.allocate_id() > a);
}

#[tokio::test]
async fn truncate_clears_the_table() {
    let mut store = make_store().await;
    let a = store.allocate_id();
    store.commit(&[(a, b"x".to_vec())], &[]).await.unwrap();
    store.truncate().await.unwrap();
    assert!(store.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn config_bag_round_trips_configs() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let mut bag = ConfigBag::open(pool.clone()).await.unwrap();

    let mut config = SyncConfig::new(4, PathBuf::from("/home/u/Cloud"), 77, 1001);
    config.is_network = true;
    bag.insert(config.clone()).await.unwrap();

    let reloaded = ConfigBag::open(pool.clone()).await.unwrap();
    assert_eq!(reloaded.get(4), Some(&config));

    let mut bag = reloaded;
    config.fs_fingerprint = 0xfeed;
    bag.insert(config.clone()).await.unwrap();
    assert_eq!(bag.get(4).unwrap().fs_fingerprint, 0xfeed);

    assert!(bag.remove_by_tag(4).await.unwrap());
    assert!(ConfigBag::open(pool).await.unwrap().get(4).is_none());
}
