use cumulus_core::fingerprint::{FileFingerprint, LightFingerprint};

#[test]
fn folder_aggregate_ignores_child_order() {
    let children = [
        LightFingerprint::of_file(10, 1000),
        LightFingerprint::of_file(20, 2000),
        LightFingerprint::of_file(20, 2000),
        LightFingerprint::of_file(5, 999),
    ];

    let mut forward = LightFingerprint::default();
    for child in &children {
        forward.combine(child);
    }

    let mut reverse = LightFingerprint::default();
    for child in children.iter().rev() {
        reverse.combine(child);
    }

    assert_eq!(forward, reverse);
}

#[test]
fn duplicate_children_still_contribute() {
    let child = LightFingerprint::of_file(10, 1000);

    let mut once = LightFingerprint::default();
    once.combine(&child);

    let mut twice = LightFingerprint::default();
    twice.combine(&child);
    twice.combine(&child);

    assert_ne!(once, twice);
}

#[test]
fn generate_is_deterministic_and_content_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.bin");

    std::fs::write(&path, vec![7u8; 1024]).unwrap();
    let a = FileFingerprint::generate(&path, 1024, 5000).unwrap();
    let b = FileFingerprint::generate(&path, 1024, 5000).unwrap();
    assert!(a.valid);
    assert_eq!(a, b);

    std::fs::write(&path, vec![8u8; 1024]).unwrap();
    let c = FileFingerprint::generate(&path, 1024, 5000).unwrap();
    assert!(!a.matches(&c));
    assert_eq!(a.light(), c.light());
}

#[test]
fn large_file_sampling_sees_tail_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.bin");

    let mut body = vec![0u8; 256 * 1024];
    std::fs::write(&path, &body).unwrap();
    let before = FileFingerprint::generate(&path, body.len() as i64, 1).unwrap();

    let len = body.len();
    body[len - 1] = 0xff;
    std::fs::write(&path, &body).unwrap();
    let after = FileFingerprint::generate(&path, body.len() as i64, 1).unwrap();

    assert_ne!(before.crc, after.crc);
}

#[test]
fn metadata_only_fingerprint_never_matches() {
    let cached = FileFingerprint::metadata_only(10, 100);
    let remote = FileFingerprint::remote(10, 100, 0);
    assert!(!cached.matches(&remote));
    assert!(remote.matches(&remote));
}
