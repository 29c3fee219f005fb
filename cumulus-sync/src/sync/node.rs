//! The sync-tree node model.
//!
//! Nodes live in an id-keyed arena owned by their [`SyncEngine`]; the parent
//! link is a plain [`NodeId`], so the "owned child, non-owning parent" shape
//! needs no lifetime gymnastics and serialisation falls out of the arena for
//! free. One global [`FsidIndex`] maps filesystem ids to nodes across all
//! active syncs; it is only ever touched from the reconciliation thread.
//!
//! [`SyncEngine`]: super::engine::SyncEngine

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use cumulus_core::fingerprint::{FileFingerprint, LightFingerprint};
use cumulus_core::fs::{FsEntry, NodeKind};
use cumulus_core::paths::NameCmp;
use cumulus_core::remote::{NodeHandle, UNDEF};

pub const CACHE_VERSION: u8 = 1;
const FLAG_SHORT_NAME_IN_DB: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Scan / sync dirty state of one node. Ordered so flags can only be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TreeAction {
    #[default]
    Resolved,
    HereOnly,
    HereAndBelow,
}

impl TreeAction {
    pub fn raise(&mut self, to: TreeAction) {
        if to > *self {
            *self = to;
        }
    }
}

#[derive(Debug)]
pub struct SyncNode {
    pub kind: NodeKind,
    /// Leaf name as it appears on the filesystem, case preserved.
    pub local_name: String,
    pub short_name: Option<String>,
    pub parent: Option<NodeId>,
    /// Children keyed by the comparator key of their local name.
    pub children: HashMap<String, NodeId>,
    /// Secondary lookup by short name.
    pub schildren: HashMap<String, NodeId>,
    pub fs_id: u64,
    pub remote_handle: NodeHandle,
    /// Last remote handle confirmed in sync; distinguishes "was synced and
    /// then cloud-deleted" from "was never synced".
    pub synced_remote_handle: NodeHandle,
    pub size: i64,
    pub mtime: i64,
    pub fingerprint: FileFingerprint,
    pub scan_again: TreeAction,
    pub sync_again: TreeAction,
    /// Deciseconds timestamp of the last completed scan of this folder.
    pub last_scan_time: i64,
    /// Scan sequence at which a filesystem entry was last observed.
    pub scan_seq_no: u64,
    /// Store row id, 0 if never persisted.
    pub db_id: u32,
    pub parent_db_id: u32,
    pub deleted: bool,
    pub not_seen: bool,
    pub short_name_in_db: bool,
}

impl SyncNode {
    pub fn new(kind: NodeKind, local_name: impl Into<String>, short_name: Option<String>) -> Self {
        Self {
            kind,
            local_name: local_name.into(),
            short_name,
            parent: None,
            children: HashMap::new(),
            schildren: HashMap::new(),
            fs_id: UNDEF,
            remote_handle: UNDEF,
            synced_remote_handle: UNDEF,
            size: 0,
            mtime: 0,
            fingerprint: FileFingerprint::default(),
            scan_again: TreeAction::Resolved,
            sync_again: TreeAction::Resolved,
            last_scan_time: 0,
            scan_seq_no: 0,
            db_id: 0,
            parent_db_id: 0,
            deleted: false,
            not_seen: false,
            // rows written by this version always carry the short name
            short_name_in_db: true,
        }
    }

    pub fn light_fingerprint(&self) -> LightFingerprint {
        LightFingerprint {
            size: self.size,
            mtime: self.mtime,
        }
    }

    /// Synthesises a scan result from cached fields, used when a folder's
    /// scan-again flag is clear and no fresh directory listing is wanted.
    pub fn known_fs_details(&self) -> FsEntry {
        FsEntry {
            local_name: self.local_name.clone(),
            display_name: self.local_name.clone(),
            kind: self.kind,
            fs_id: self.fs_id,
            short_name: self.short_name.clone(),
            size: self.size,
            mtime: self.mtime,
            is_symlink: false,
            fingerprint: self.fingerprint,
        }
    }

    pub fn raise_future_scan(&mut self, to: TreeAction) {
        self.scan_again.raise(to);
    }

    pub fn raise_future_sync(&mut self, to: TreeAction) {
        self.sync_again.raise(to);
    }

    /// Serialises the persisted fields into the versioned little-endian
    /// state-cache layout.
    pub fn serialize(&self) -> Vec<u8> {
        let name = self.local_name.as_bytes();
        let short = self.short_name.as_deref().unwrap_or("").as_bytes();
        let mut out = Vec::with_capacity(48 + name.len() + short.len());
        out.push(CACHE_VERSION);
        out.push(match self.kind {
            NodeKind::File => 0,
            NodeKind::Folder => 1,
        });
        out.extend_from_slice(&self.parent_db_id.to_le_bytes());
        out.extend_from_slice(&self.fs_id.to_le_bytes());
        out.extend_from_slice(&self.remote_handle.to_le_bytes());
        out.extend_from_slice(&self.synced_remote_handle.to_le_bytes());
        out.extend_from_slice(&(self.size as u64).to_le_bytes());
        out.extend_from_slice(&(self.mtime as u64).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(short.len() as u16).to_le_bytes());
        out.extend_from_slice(short);
        out.push(if self.short_name_in_db {
            FLAG_SHORT_NAME_IN_DB
        } else {
            0
        });
        out.extend_from_slice(&self.fingerprint.crc.to_le_bytes());
        out
    }
}

/// Fields recovered from one state-cache row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedNode {
    pub kind: NodeKind,
    pub parent_db_id: u32,
    pub fs_id: u64,
    pub remote_handle: NodeHandle,
    pub synced_remote_handle: NodeHandle,
    pub size: i64,
    pub mtime: i64,
    pub local_name: String,
    pub short_name: Option<String>,
    pub short_name_in_db: bool,
    pub crc: u32,
}

impl CachedNode {
    pub fn deserialize(data: &[u8]) -> Option<CachedNode> {
        let mut cursor = Reader { data, at: 0 };
        if cursor.u8()? != CACHE_VERSION {
            return None;
        }
        let kind = match cursor.u8()? {
            0 => NodeKind::File,
            1 => NodeKind::Folder,
            _ => return None,
        };
        let parent_db_id = cursor.u32()?;
        let fs_id = cursor.u64()?;
        let remote_handle = cursor.u64()?;
        let synced_remote_handle = cursor.u64()?;
        let size = cursor.u64()? as i64;
        let mtime = cursor.u64()? as i64;
        let name_len = cursor.u16()? as usize;
        let local_name = String::from_utf8(cursor.bytes(name_len)?.to_vec()).ok()?;
        let short_len = cursor.u16()? as usize;
        let short_raw = String::from_utf8(cursor.bytes(short_len)?.to_vec()).ok()?;
        let flags = cursor.u8()?;
        let crc = cursor.u32()?;
        Some(CachedNode {
            kind,
            parent_db_id,
            fs_id,
            remote_handle,
            synced_remote_handle,
            size,
            mtime,
            local_name,
            short_name: (!short_raw.is_empty()).then_some(short_raw),
            short_name_in_db: flags & FLAG_SHORT_NAME_IN_DB != 0,
            crc,
        })
    }

    pub fn into_node(self) -> SyncNode {
        let mut node = SyncNode::new(self.kind, self.local_name, self.short_name);
        node.parent_db_id = self.parent_db_id;
        node.fs_id = self.fs_id;
        node.remote_handle = self.remote_handle;
        node.synced_remote_handle = self.synced_remote_handle;
        node.size = self.size;
        node.mtime = self.mtime;
        node.fingerprint = if self.kind == NodeKind::File && self.synced_remote_handle != UNDEF {
            FileFingerprint::remote(self.size, self.mtime, self.crc)
        } else {
            FileFingerprint::metadata_only(self.size, self.mtime)
        };
        node.short_name_in_db = self.short_name_in_db;
        node
    }
}

struct Reader<'a> {
    data: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.at..self.at + len)?;
        self.at += len;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.bytes(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.bytes(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }
}

/// Id-keyed arena of sync nodes. Ids are never reused within one engine's
/// lifetime, so a stale id simply fails to resolve.
#[derive(Debug, Default)]
pub struct Nodes {
    map: HashMap<NodeId, SyncNode>,
    next: u32,
}

impl Nodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: SyncNode) -> NodeId {
        self.next += 1;
        let id = NodeId(self.next);
        self.map.insert(id, node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&SyncNode> {
        self.map.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SyncNode> {
        self.map.get_mut(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SyncNode)> {
        self.map.iter().map(|(id, node)| (*id, node))
    }

    /// Links `child` under `parent`, maintaining both lookup maps and the
    /// back-reference. The child must be detached.
    pub fn attach(&mut self, cmp: &NameCmp, parent: NodeId, child: NodeId) {
        debug_assert!(self[child].parent.is_none());
        let key = cmp.key(&self[child].local_name);
        let short = self[child].short_name.clone();
        let parent_node = &mut self[parent];
        parent_node.children.insert(key, child);
        if let Some(short) = short {
            parent_node.schildren.insert(cmp.key(&short), child);
        }
        self[child].parent = Some(parent);
    }

    /// Unlinks `child` from its parent, if any.
    pub fn detach(&mut self, cmp: &NameCmp, child: NodeId) {
        let Some(parent) = self[child].parent.take() else {
            return;
        };
        let key = cmp.key(&self[child].local_name);
        let short = self[child].short_name.clone();
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.remove(&key);
            if let Some(short) = short {
                parent_node.schildren.remove(&cmp.key(&short));
            }
        }
    }

    /// Re-binds a node under a new parent and name: the move primitive.
    pub fn set_name_parent(
        &mut self,
        cmp: &NameCmp,
        id: NodeId,
        new_parent: NodeId,
        new_name: &str,
        new_short: Option<String>,
    ) {
        self.detach(cmp, id);
        {
            let node = &mut self[id];
            node.local_name = new_name.to_string();
            node.short_name = new_short;
        }
        self.attach(cmp, new_parent, id);
        let parent_db = self[new_parent].db_id;
        self[id].parent_db_id = parent_db;
    }

    pub fn child_by_name(&self, cmp: &NameCmp, parent: NodeId, name: &str) -> Option<NodeId> {
        let key = cmp.key(name);
        let parent_node = self.get(parent)?;
        parent_node
            .children
            .get(&key)
            .or_else(|| parent_node.schildren.get(&key))
            .copied()
    }

    pub fn remove(&mut self, id: NodeId) -> Option<SyncNode> {
        self.map.remove(&id)
    }

    /// Absolute path of `id`, built from the root's filesystem path.
    pub fn full_path(&self, root_path: &Path, root: NodeId, id: NodeId) -> PathBuf {
        let mut parts = Vec::new();
        let mut cursor = id;
        while cursor != root {
            let Some(node) = self.get(cursor) else { break };
            parts.push(node.local_name.clone());
            let Some(parent) = node.parent else { break };
            cursor = parent;
        }
        let mut path = root_path.to_path_buf();
        for part in parts.iter().rev() {
            path.push(part);
        }
        path
    }

    /// Root-relative `/`-separated path of `id`; empty for the root itself.
    pub fn relative_path(&self, root: NodeId, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cursor = id;
        while cursor != root {
            let Some(node) = self.get(cursor) else { break };
            parts.push(node.local_name.as_str());
            let Some(parent) = node.parent else { break };
            cursor = parent;
        }
        parts.reverse();
        parts.join("/")
    }
}

impl std::ops::Index<NodeId> for Nodes {
    type Output = SyncNode;

    fn index(&self, id: NodeId) -> &SyncNode {
        self.map.get(&id).unwrap_or_else(|| panic!("stale node id {id:?}"))
    }
}

impl std::ops::IndexMut<NodeId> for Nodes {
    fn index_mut(&mut self, id: NodeId) -> &mut SyncNode {
        self.map
            .get_mut(&id)
            .unwrap_or_else(|| panic!("stale node id {id:?}"))
    }
}

/// Process-wide fsid -> node index shared by every active sync. Reads and
/// writes happen on the reconciliation thread only.
#[derive(Debug, Default)]
pub struct FsidIndex {
    map: HashMap<u64, (i32, NodeId)>,
}

impl FsidIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fs_id: u64) -> Option<(i32, NodeId)> {
        self.map.get(&fs_id).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Drops every entry belonging to one sync, used at teardown.
    pub fn purge_sync(&mut self, tag: i32) {
        self.map.retain(|_, (owner, _)| *owner != tag);
    }

    fn remove_if(&mut self, fs_id: u64, tag: i32, id: NodeId) {
        if self.map.get(&fs_id) == Some(&(tag, id)) {
            self.map.remove(&fs_id);
        }
    }
}

/// Rebinds a node's fsid, keeping the global index consistent. A node may
/// only take over an fsid already mapped inside the same sync if the caller
/// resolved the conflict first.
pub fn set_fsid(nodes: &mut Nodes, index: &mut FsidIndex, tag: i32, id: NodeId, fs_id: u64) {
    let old = nodes[id].fs_id;
    if old == fs_id {
        if fs_id != UNDEF {
            index.map.insert(fs_id, (tag, id));
        }
        return;
    }
    if old != UNDEF {
        index.remove_if(old, tag, id);
    }
    nodes[id].fs_id = fs_id;
    if fs_id != UNDEF {
        debug_assert!(
            !matches!(index.get(fs_id), Some((owner, other)) if owner == tag && other != id && nodes.contains(other)),
            "fsid {fs_id} already bound to another node in sync {tag}"
        );
        index.map.insert(fs_id, (tag, id));
    }
}

/// Clears a node's fsid without touching other entries.
pub fn clear_fsid(nodes: &mut Nodes, index: &mut FsidIndex, tag: i32, id: NodeId) {
    let old = nodes[id].fs_id;
    if old != UNDEF {
        index.remove_if(old, tag, id);
        nodes[id].fs_id = UNDEF;
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
