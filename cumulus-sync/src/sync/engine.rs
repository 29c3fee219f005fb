//! The reconciliation engine.
//!
//! One [`SyncEngine`] owns one synced subtree: the node arena, the scan
//! queue, the outbound cloud-command queue and the state cache. The engine
//! is stepped from a single task; watcher threads and the RPC driver only
//! talk to it through [`SyncEngine::notify`] and
//! [`SyncEngine::complete_command`]. A step walks triplet rows of
//! `(cloud, sync, filesystem)` per directory and dispatches one action per
//! row.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use cumulus_core::fingerprint::FileFingerprint;
use cumulus_core::fs::{self, FsEntry, FsError, NodeKind};
use cumulus_core::paths::{NameCmp, append_with_separator, next_component};
use cumulus_core::remote::{CloudCommand, CloudCommandError, NodeHandle, RemoteTree, UNDEF};

use super::assign::assign_filesystem_ids;
use super::debris::move_to_local_debris;
use super::node::{CachedNode, FsidIndex, NodeId, Nodes, SyncNode, TreeAction, clear_fsid, set_fsid};
use super::queue::{Notification, NotifyQueue, ScanQueue};
use super::store::{StateStore, StoreError, SyncConfig};

/// Quiet time after a local notification, deciseconds.
pub const SCANNING_DELAY_DS: i64 = 5;
/// Quiet time after a file notification on a network filesystem.
pub const EXTRA_SCANNING_DELAY_DS: i64 = 150;
/// A changing file must hold still this long before a move or upload is
/// committed.
pub const FILE_UPDATE_DELAY_DS: i64 = 30;
/// Hard cap on waiting for a changing file, seconds.
pub const FILE_UPDATE_MAX_DELAY_SECS: i64 = 60;
/// Minimum gap between two scans of the same folder, deciseconds.
pub const SCAN_MIN_INTERVAL_DS: i64 = 20;
/// Telemetry id emitted when a file never stabilised and the pending
/// operation was dropped.
pub const EVENT_FILE_NEVER_STABLE: u32 = 99438;

/// Batched state-cache writes start flowing during the initial scan once the
/// backlog grows past this.
const INITIAL_SCAN_FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    InitialScan,
    Active,
    Canceled,
    Failed,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncErrorCode {
    #[default]
    NoError,
    RootMissing,
    RootNotAFolder,
    RootIsSymlink,
    StoreWriteFailed,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Callbacks to the lifecycle owner: state transitions, telemetry events,
/// and detected (not resolved) name conflicts.
pub trait SyncMonitor {
    fn on_state_change(&mut self, tag: i32, state: SyncState, error: SyncErrorCode);
    fn on_event(&mut self, event_id: u32, detail: &str);
    fn on_name_conflict(&mut self, path: &Path) {
        let _ = path;
    }
}

pub struct NullMonitor;

impl SyncMonitor for NullMonitor {
    fn on_state_change(&mut self, _: i32, _: SyncState, _: SyncErrorCode) {}
    fn on_event(&mut self, _: u32, _: &str) {}
}

/// Cloud side of one triplet row. The conflict case marks names that
/// collide under the filesystem comparator; such rows dispatch nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloudSlot {
    Present(NodeHandle),
    Absent,
    Conflict,
}

#[derive(Debug)]
struct ChildRow {
    cloud: CloudSlot,
    sync: Option<NodeId>,
    fs: Option<FsEntry>,
}

/// Debounce slot for the one file currently being watched for stability.
#[derive(Debug)]
struct FileWatch {
    path: PathBuf,
    size: i64,
    mtime: i64,
    last_change_ds: i64,
    initial_ds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stability {
    Stable,
    Wait,
    Abandoned,
}

pub struct SyncEngine {
    config: SyncConfig,
    state: SyncState,
    error_code: SyncErrorCode,
    nodes: Nodes,
    root: NodeId,
    local_debris: PathBuf,
    cmp: NameCmp,
    store: Option<StateStore>,
    insertq: BTreeSet<NodeId>,
    deleteq: BTreeSet<u32>,
    queue: ScanQueue,
    outbound: VecDeque<(u64, NodeId, CloudCommand)>,
    in_flight: HashMap<u64, (NodeId, CloudCommand)>,
    pending_nodes: HashMap<NodeId, u32>,
    pending_handles: HashMap<NodeHandle, u32>,
    next_request: u64,
    scan_seq_no: u64,
    local_bytes: i64,
    file_count: usize,
    folder_count: usize,
    fs_stable_ids: bool,
    full_scan: bool,
    watch: Option<FileWatch>,
    monitor: Box<dyn SyncMonitor + Send>,
}

impl SyncEngine {
    /// Builds the engine in the initial-scan state, rehydrating the node
    /// tree from the state cache when one is supplied. Cached fsids go
    /// straight into the shared index so move detection works across a
    /// restart on filesystems with stable ids.
    pub async fn new(
        config: SyncConfig,
        store: Option<StateStore>,
        monitor: Box<dyn SyncMonitor + Send>,
        index: &mut FsidIndex,
    ) -> Result<Self, EngineError> {
        let local_debris = config.local_root.join(&config.debris_name);
        let cmp = NameCmp::new(config.case_insensitive);
        let mut nodes = Nodes::new();
        let root = nodes.insert(SyncNode::new(NodeKind::Folder, "", None));

        let mut engine = Self {
            config,
            state: SyncState::InitialScan,
            error_code: SyncErrorCode::NoError,
            nodes,
            root,
            local_debris,
            cmp,
            store,
            insertq: BTreeSet::new(),
            deleteq: BTreeSet::new(),
            queue: ScanQueue::new(),
            outbound: VecDeque::new(),
            in_flight: HashMap::new(),
            pending_nodes: HashMap::new(),
            pending_handles: HashMap::new(),
            next_request: 0,
            scan_seq_no: 0,
            local_bytes: 0,
            file_count: 0,
            folder_count: 1,
            fs_stable_ids: fs::stable_fs_ids(),
            full_scan: true,
            watch: None,
            monitor,
        };
        engine.read_state_cache(index).await?;
        Ok(engine)
    }

    pub fn tag(&self) -> i32 {
        self.config.tag
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn error_code(&self) -> SyncErrorCode {
        self.error_code
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&SyncNode> {
        self.nodes.get(id)
    }

    pub fn local_bytes(&self) -> i64 {
        self.local_bytes
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.file_count, self.folder_count)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Resolves a root-relative `/`-separated path to a node.
    pub fn node_by_rel_path(&self, path: &str) -> Option<NodeId> {
        let (deepest, residual) = self.node_by_path(self.root, path);
        residual.is_none().then_some(deepest)
    }

    /// Watcher intake: fast path.
    pub fn notify(&mut self, notification: Notification) {
        self.queue.push(NotifyQueue::Events, notification);
    }

    /// Watcher intake: retry path for entries that hit a transient error.
    pub fn notify_retry(&mut self, notification: Notification) {
        self.queue.push(NotifyQueue::Retry, notification);
    }

    /// Hands the next queued command to the RPC driver and marks it in
    /// flight.
    pub fn pop_command(&mut self) -> Option<(u64, CloudCommand)> {
        let (id, node, command) = self.outbound.pop_front()?;
        self.in_flight.insert(id, (node, command.clone()));
        Some((id, command))
    }

    pub fn has_queued_commands(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn issue(&mut self, node: NodeId, command: CloudCommand) {
        self.next_request += 1;
        *self.pending_nodes.entry(node).or_default() += 1;
        if let Some(handle) = pending_handle_of(&command) {
            *self.pending_handles.entry(handle).or_default() += 1;
        }
        debug!(request = self.next_request, ?command, "queueing cloud command");
        self.outbound.push_back((self.next_request, node, command));
    }

    fn node_pending(&self, id: NodeId) -> bool {
        self.pending_nodes.get(&id).is_some_and(|n| *n > 0)
    }

    fn handle_pending(&self, handle: NodeHandle) -> bool {
        self.pending_handles.get(&handle).is_some_and(|n| *n > 0)
    }

    fn release_pending(&mut self, node: NodeId, command: &CloudCommand) {
        if let Some(count) = self.pending_nodes.get_mut(&node) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending_nodes.remove(&node);
            }
        }
        if let Some(handle) = pending_handle_of(command)
            && let Some(count) = self.pending_handles.get_mut(&handle)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending_handles.remove(&handle);
            }
        }
    }
}

/// The cloud node a command keeps busy while in flight; folder creation
/// blocks its parent so the directory is skipped until the handle exists.
fn pending_handle_of(command: &CloudCommand) -> Option<NodeHandle> {
    match command {
        CloudCommand::StartUpload { .. } => None,
        CloudCommand::StartDownload { handle, .. } => Some(*handle),
        CloudCommand::NewFolder { parent, .. } => Some(*parent),
        CloudCommand::MoveNode { handle, .. } => Some(*handle),
        CloudCommand::DeleteNode { handle } => Some(*handle),
    }
}

include!("engine_impl_core.rs");
include!("engine_impl_ops.rs");

#[cfg(test)]
#[path = "engine_tests/mod.rs"]
mod tests;
