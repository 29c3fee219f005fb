//! The engine's view of the cloud tree, plus the outbound command set.
//!
//! The RPC client itself lives elsewhere; it maintains a [`RemoteTree`] from
//! server events and hands it to the engine read-only. Commands flow the
//! other way: the engine queues [`CloudCommand`]s, the client executes them
//! and answers with a [`CloudAck`] carrying the new handle where one was
//! created.

use std::collections::{HashMap, HashSet};

use crate::fingerprint::FileFingerprint;
use crate::fs::NodeKind;

pub type NodeHandle = u64;

/// Unbound handle or fsid. Zero also stands for UNDEF in the serialized
/// node layout.
pub const UNDEF: u64 = 0;

#[derive(Debug, Clone)]
pub struct RemoteNode {
    pub handle: NodeHandle,
    pub parent: NodeHandle,
    /// None while the name attribute is still undecryptable.
    pub name: Option<String>,
    pub kind: NodeKind,
    pub size: i64,
    pub mtime: i64,
    pub crc: u32,
    pub decrypted: bool,
    pub alive: bool,
}

impl RemoteNode {
    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint::remote(self.size, self.mtime, self.crc)
    }

    /// Whether this node takes part in reconciliation: alive, decrypted,
    /// carrying a displayable name, and not the sync's own debris folder.
    pub fn syncable(&self, debris_name: &str) -> bool {
        self.alive
            && self.decrypted
            && self
                .name
                .as_deref()
                .is_some_and(|name| !name.is_empty() && name != debris_name)
    }
}

#[derive(Debug, Default)]
pub struct RemoteTree {
    nodes: HashMap<NodeHandle, RemoteNode>,
    children: HashMap<NodeHandle, HashSet<NodeHandle>>,
}

impl RemoteTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: NodeHandle) -> Option<&RemoteNode> {
        self.nodes.get(&handle)
    }

    /// Inserts or replaces a node, maintaining the parent/child maps.
    pub fn upsert(&mut self, node: RemoteNode) {
        if let Some(prev) = self.nodes.get(&node.handle)
            && prev.parent != node.parent
            && let Some(siblings) = self.children.get_mut(&prev.parent)
        {
            siblings.remove(&node.handle);
        }
        self.children.entry(node.parent).or_default().insert(node.handle);
        self.nodes.insert(node.handle, node);
    }

    pub fn remove(&mut self, handle: NodeHandle) -> Option<RemoteNode> {
        let node = self.nodes.remove(&handle)?;
        if let Some(siblings) = self.children.get_mut(&node.parent) {
            siblings.remove(&handle);
        }
        Some(node)
    }

    pub fn set_parent(&mut self, handle: NodeHandle, new_parent: NodeHandle, new_name: String) {
        if let Some(mut node) = self.remove(handle) {
            node.parent = new_parent;
            node.name = Some(new_name);
            self.upsert(node);
        }
    }

    pub fn children_of(&self, handle: NodeHandle) -> impl Iterator<Item = &RemoteNode> {
        self.children
            .get(&handle)
            .into_iter()
            .flatten()
            .filter_map(|h| self.nodes.get(h))
    }

    /// Root-relative path of `handle` using display names, or None when the
    /// node (or any ancestor short of `root`) is unknown.
    pub fn path_of(&self, root: NodeHandle, handle: NodeHandle) -> Option<Vec<String>> {
        let mut parts = Vec::new();
        let mut cursor = handle;
        while cursor != root {
            let node = self.nodes.get(&cursor)?;
            parts.push(node.name.clone()?);
            cursor = node.parent;
        }
        parts.reverse();
        Some(parts)
    }
}

/// Outbound work for the cloud client, one variant per RPC. A discriminated
/// union, never a tag-plus-cast.
#[derive(Debug, Clone, PartialEq)]
pub enum CloudCommand {
    StartUpload {
        parent: NodeHandle,
        name: String,
        local_path: std::path::PathBuf,
        fingerprint: FileFingerprint,
    },
    StartDownload {
        handle: NodeHandle,
        local_path: std::path::PathBuf,
    },
    NewFolder {
        parent: NodeHandle,
        name: String,
    },
    MoveNode {
        handle: NodeHandle,
        new_parent: NodeHandle,
        new_name: String,
    },
    DeleteNode {
        handle: NodeHandle,
    },
}

/// Completion report for a queued command. `new_handle` is set for uploads
/// and folder creations.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudAck {
    pub request: u64,
    pub result: Result<Option<NodeHandle>, CloudCommandError>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cloud command failed: {reason}")]
pub struct CloudCommandError {
    pub reason: String,
    pub transient: bool,
}
