use super::*;

use std::collections::HashMap as TestHashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;
use tempfile::tempdir;
use time::macros::datetime;

use cumulus_core::fingerprint::Crc32;
use cumulus_core::remote::RemoteNode;

const ROOT_HANDLE: NodeHandle = 1000;
const TEST_TAG: i32 = 7;

#[derive(Default)]
struct Recorded {
    events: Vec<(u32, String)>,
    conflicts: Vec<PathBuf>,
    states: Vec<(SyncState, SyncErrorCode)>,
}

#[derive(Clone, Default)]
struct TestMonitor(Arc<Mutex<Recorded>>);

impl SyncMonitor for TestMonitor {
    fn on_state_change(&mut self, _tag: i32, state: SyncState, error: SyncErrorCode) {
        self.0.lock().unwrap().states.push((state, error));
    }

    fn on_event(&mut self, event_id: u32, detail: &str) {
        self.0.lock().unwrap().events.push((event_id, detail.to_string()));
    }

    fn on_name_conflict(&mut self, path: &Path) {
        self.0.lock().unwrap().conflicts.push(path.to_path_buf());
    }
}

fn body_crc(body: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(body);
    hasher.finalize()
}

fn set_mtime(path: &Path, mtime: i64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    let stamp = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(mtime as u64);
    file.set_times(std::fs::FileTimes::new().set_modified(stamp))
        .unwrap();
}

fn disk_mtime(path: &Path) -> i64 {
    fs::stat(path, false).unwrap().mtime
}

/// Test rig: one engine over a tempdir, an in-memory state store, and a
/// hand-driven remote tree standing in for the RPC driver.
struct Rig {
    dir: tempfile::TempDir,
    pool: SqlitePool,
    engine: SyncEngine,
    index: FsidIndex,
    remote: RemoteTree,
    bodies: TestHashMap<NodeHandle, Vec<u8>>,
    now: i64,
    recorded: Arc<Mutex<Recorded>>,
    next_handle: NodeHandle,
}

impl Rig {
    async fn new() -> Rig {
        Self::with_case_insensitive(false).await
    }

    async fn with_case_insensitive(case_insensitive: bool) -> Rig {
        let dir = tempdir().unwrap();
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let store = StateStore::open(pool.clone(), 11, ROOT_HANDLE, 42).await.unwrap();
        let mut config = SyncConfig::new(TEST_TAG, dir.path().to_path_buf(), ROOT_HANDLE, 42);
        config.case_insensitive = case_insensitive;
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let monitor = TestMonitor(recorded.clone());
        let mut index = FsidIndex::new();
        let engine = SyncEngine::new(config, Some(store), Box::new(monitor), &mut index)
            .await
            .unwrap();

        let mut remote = RemoteTree::new();
        remote.upsert(RemoteNode {
            handle: ROOT_HANDLE,
            parent: 0,
            name: Some(String::new()),
            kind: NodeKind::Folder,
            size: 0,
            mtime: 0,
            crc: 0,
            decrypted: true,
            alive: true,
        });

        Rig {
            dir,
            pool,
            engine,
            index,
            remote,
            bodies: TestHashMap::new(),
            now: 1000,
            recorded,
            next_handle: 2000,
        }
    }

    /// Tears down the engine and builds a fresh one over the same tempdir,
    /// state table and remote view, as after a process restart.
    async fn restart(&mut self) {
        let store = StateStore::open(self.pool.clone(), 11, ROOT_HANDLE, 42)
            .await
            .unwrap();
        let config = SyncConfig::new(TEST_TAG, self.dir.path().to_path_buf(), ROOT_HANDLE, 42);
        let monitor = TestMonitor(self.recorded.clone());
        self.index = FsidIndex::new();
        self.engine = SyncEngine::new(config, Some(store), Box::new(monitor), &mut self.index)
            .await
            .unwrap();
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn notify(&mut self, rel: &str) {
        self.engine.notify(Notification {
            node: None,
            path: rel.to_string(),
            timestamp: 0,
        });
    }

    async fn step(&mut self) {
        self.now += 25;
        self.engine
            .step(
                &mut self.index,
                &self.remote,
                self.now,
                datetime!(2026-08-02 12:00:00 UTC),
            )
            .await
            .unwrap();
    }

    fn drain(&mut self) -> Vec<(u64, CloudCommand)> {
        let mut out = Vec::new();
        while let Some(entry) = self.engine.pop_command() {
            out.push(entry);
        }
        out
    }

    fn remote_file(&mut self, parent: NodeHandle, name: &str, body: &[u8], mtime: i64) -> NodeHandle {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.remote.upsert(RemoteNode {
            handle,
            parent,
            name: Some(name.to_string()),
            kind: NodeKind::File,
            size: body.len() as i64,
            mtime,
            crc: body_crc(body),
            decrypted: true,
            alive: true,
        });
        self.bodies.insert(handle, body.to_vec());
        handle
    }

    fn remote_folder(&mut self, parent: NodeHandle, name: &str) -> NodeHandle {
        self.next_handle += 1;
        let handle = self.next_handle;
        self.remote.upsert(RemoteNode {
            handle,
            parent,
            name: Some(name.to_string()),
            kind: NodeKind::Folder,
            size: 0,
            mtime: 0,
            crc: 0,
            decrypted: true,
            alive: true,
        });
        handle
    }

    /// Plays the RPC driver for one command: applies the side effect to the
    /// remote tree / local disk and acknowledges it.
    fn execute(&mut self, request: u64, command: &CloudCommand) {
        match command {
            CloudCommand::StartUpload {
                parent,
                name,
                fingerprint,
                ..
            } => {
                // the server versions overwrites: a same-name child is
                // replaced by the fresh node
                let previous: Vec<NodeHandle> = self
                    .remote
                    .children_of(*parent)
                    .filter(|n| n.name.as_deref() == Some(name.as_str()))
                    .map(|n| n.handle)
                    .collect();
                for stale in previous {
                    self.remote.remove(stale);
                }
                self.next_handle += 1;
                let handle = self.next_handle;
                self.remote.upsert(RemoteNode {
                    handle,
                    parent: *parent,
                    name: Some(name.clone()),
                    kind: NodeKind::File,
                    size: fingerprint.size,
                    mtime: fingerprint.mtime,
                    crc: fingerprint.crc,
                    decrypted: true,
                    alive: true,
                });
                self.engine
                    .complete_command(&mut self.index, request, Ok(Some(handle)));
            }
            CloudCommand::NewFolder { parent, name } => {
                self.next_handle += 1;
                let handle = self.next_handle;
                self.remote.upsert(RemoteNode {
                    handle,
                    parent: *parent,
                    name: Some(name.clone()),
                    kind: NodeKind::Folder,
                    size: 0,
                    mtime: 0,
                    crc: 0,
                    decrypted: true,
                    alive: true,
                });
                self.engine
                    .complete_command(&mut self.index, request, Ok(Some(handle)));
            }
            CloudCommand::StartDownload { handle, local_path } => {
                let body = self.bodies.get(handle).cloned().unwrap_or_default();
                let mtime = self.remote.get(*handle).map(|n| n.mtime).unwrap_or(0);
                std::fs::write(local_path, &body).unwrap();
                if mtime > 0 {
                    set_mtime(local_path, mtime);
                }
                self.engine.complete_command(&mut self.index, request, Ok(None));
            }
            CloudCommand::MoveNode {
                handle,
                new_parent,
                new_name,
            } => {
                self.remote.set_parent(*handle, *new_parent, new_name.clone());
                self.engine.complete_command(&mut self.index, request, Ok(None));
            }
            CloudCommand::DeleteNode { handle } => {
                self.remote.remove(*handle);
                self.engine.complete_command(&mut self.index, request, Ok(None));
            }
        }
    }

    /// Steps the engine `rounds` times, executing every emitted command, and
    /// returns the full command history.
    async fn settle(&mut self, rounds: usize) -> Vec<CloudCommand> {
        let mut history = Vec::new();
        for _ in 0..rounds {
            self.step().await;
            for (request, command) in self.drain() {
                self.execute(request, &command);
                history.push(command);
            }
        }
        history
    }

    fn node_at(&self, rel: &str) -> &SyncNode {
        let id = self.engine.node_by_rel_path(rel).unwrap();
        self.engine.node(id).unwrap()
    }

    fn events(&self) -> Vec<u32> {
        self.recorded.lock().unwrap().events.iter().map(|(id, _)| *id).collect()
    }

    fn conflicts(&self) -> Vec<PathBuf> {
        self.recorded.lock().unwrap().conflicts.clone()
    }

    fn states(&self) -> Vec<(SyncState, SyncErrorCode)> {
        self.recorded.lock().unwrap().states.clone()
    }
}

fn count_moves(history: &[CloudCommand]) -> usize {
    history
        .iter()
        .filter(|c| matches!(c, CloudCommand::MoveNode { .. }))
        .count()
}

include!("part1.rs");
include!("part2.rs");
include!("part3.rs");
