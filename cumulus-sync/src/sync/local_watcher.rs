//! Adapter from `notify` filesystem events to scan-queue notifications.
//!
//! The watcher thread only translates paths; it never touches the node tree.
//! Each event becomes a root-relative notification naming the parent
//! directory of the changed entry (a directory scan picks up the entry
//! itself). Events under the debris folder are dropped at the source.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use super::queue::Notification;

pub fn start_notify_watcher(
    root: &Path,
    debris_name: &str,
) -> notify::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<Notification>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let root = root.to_path_buf();
    let watch_root = root.clone();
    let debris = root.join(debris_name);
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            for notification in map_event(&watch_root, &debris, event) {
                let _ = tx.send(notification);
            }
        }
    })?;
    watcher.watch(root.as_path(), RecursiveMode::Recursive)?;
    Ok((watcher, rx))
}

fn map_event(root: &Path, debris: &Path, event: Event) -> Vec<Notification> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| !path.starts_with(debris))
        .filter_map(|path| to_parent_relative(root, path))
        .map(|path| Notification {
            node: None,
            path,
            timestamp: 0,
        })
        .collect()
}

/// Root-relative path of the directory containing `path`; empty string for
/// entries directly under the root.
fn to_parent_relative(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    let joined = PathBuf::from(parent);
    Some(joined.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, paths: Vec<PathBuf>) -> Event {
        Event {
            kind,
            paths,
            attrs: Default::default(),
        }
    }

    #[test]
    fn maps_change_to_parent_directory_notification() {
        let root = Path::new("/tmp/root");
        let mapped = map_event(
            root,
            &root.join(".debris"),
            event(
                EventKind::Modify(notify::event::ModifyKind::Data(
                    notify::event::DataChange::Any,
                )),
                vec![PathBuf::from("/tmp/root/Docs/A.txt")],
            ),
        );
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].path, "Docs");
        assert_eq!(mapped[0].timestamp, 0);
    }

    #[test]
    fn top_level_change_maps_to_empty_path() {
        let root = Path::new("/tmp/root");
        let mapped = map_event(
            root,
            &root.join(".debris"),
            event(
                EventKind::Create(notify::event::CreateKind::File),
                vec![PathBuf::from("/tmp/root/new.txt")],
            ),
        );
        assert_eq!(mapped[0].path, "");
    }

    #[test]
    fn debris_events_are_dropped() {
        let root = Path::new("/tmp/root");
        let mapped = map_event(
            root,
            &root.join(".debris"),
            event(
                EventKind::Remove(notify::event::RemoveKind::File),
                vec![PathBuf::from("/tmp/root/.debris/2026-08-02/x")],
            ),
        );
        assert!(mapped.is_empty());
    }

    #[test]
    fn rename_notifies_both_parents() {
        let root = Path::new("/tmp/root");
        let mapped = map_event(
            root,
            &root.join(".debris"),
            event(
                EventKind::Modify(notify::event::ModifyKind::Name(
                    notify::event::RenameMode::Both,
                )),
                vec![
                    PathBuf::from("/tmp/root/A/x.txt"),
                    PathBuf::from("/tmp/root/B/x.txt"),
                ],
            ),
        );
        let paths: Vec<_> = mapped.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["A", "B"]);
    }
}
