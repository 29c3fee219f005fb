use std::cmp::Ordering;

use cumulus_core::paths::{
    NameCmp, containing_path_of, leaf_name, next_component, reverse_match_score,
};

#[test]
fn containing_path_respects_component_boundaries() {
    assert_eq!(containing_path_of("a/b", "a/b/c"), Some(4));
    assert_eq!(containing_path_of("a/b", "a/b"), Some(3));
    assert_eq!(containing_path_of("a/b", "a/bc/d"), None);
    assert_eq!(containing_path_of("", "x/y"), Some(0));
}

#[test]
fn next_component_skips_separator_runs() {
    let mut cursor = 0;
    assert_eq!(next_component("a//b/c", &mut cursor), Some("a"));
    assert_eq!(next_component("a//b/c", &mut cursor), Some("b"));
    assert_eq!(next_component("a//b/c", &mut cursor), Some("c"));
    assert_eq!(next_component("a//b/c", &mut cursor), None);
}

#[test]
fn reverse_match_score_is_symmetric() {
    let pairs = [
        ("Docs/a.txt", "Backup/a.txt"),
        ("a/b/c", "a/b/c"),
        ("", "a"),
        ("x/file", "y/other"),
        ("deep/er/leaf", "leaf"),
    ];
    for (a, b) in pairs {
        assert_eq!(
            reverse_match_score(a, b),
            reverse_match_score(b, a),
            "asymmetric for {a:?} / {b:?}"
        );
    }
}

#[test]
fn reverse_match_score_zero_unless_leaf_matches() {
    assert_eq!(reverse_match_score("Docs/a.txt", "Docs/b.txt"), 0);
    assert_eq!(reverse_match_score("", "Docs/a.txt"), 0);
    assert!(reverse_match_score("Docs/a.txt", "Other/a.txt") > 0);
}

#[test]
fn reverse_match_score_full_match_counts_chars_minus_separators() {
    // 5 matched bytes, one crossed separator
    assert_eq!(reverse_match_score("a/b/c", "a/b/c"), 3);
    assert_eq!(reverse_match_score("leaf", "leaf"), 4);
}

#[test]
fn deeper_shared_suffix_scores_higher() {
    let cached = "Photos/2023/img.jpg";
    let same_folder = "Backup/2023/img.jpg";
    let other_folder = "Backup/2024/img.jpg";
    assert!(reverse_match_score(cached, same_folder) > reverse_match_score(cached, other_folder));
}

#[test]
fn name_cmp_folds_case_only_when_asked() {
    let ci = NameCmp::new(true);
    let cs = NameCmp::new(false);
    assert!(ci.eq("README", "readme"));
    assert_eq!(cs.compare("README", "readme"), Ordering::Less);
    assert_eq!(ci.key("ReadMe"), "readme");
}

#[test]
fn leaf_name_takes_last_component() {
    assert_eq!(leaf_name("a/b/c.txt"), "c.txt");
    assert_eq!(leaf_name("plain"), "plain");
}
