//! Persistent state cache.
//!
//! Every sync owns one table of `(id INTEGER, data BLOB)` rows, one row per
//! cached node in the layout produced by
//! [`SyncNode::serialize`](super::node::SyncNode::serialize). The table name
//! encodes the identity triple `(root fsid, remote root handle, account)` so
//! a re-created sync with the same identity finds its cache again. A second,
//! shared table holds the serialized sync configurations.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};
use thiserror::Error;
use tracing::warn;

use cumulus_core::remote::NodeHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("config row for tag {0} is not valid JSON: {1}")]
    BadConfig(i32, serde_json::Error),
}

/// Configuration snapshot of one sync, persisted by [`ConfigBag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub tag: i32,
    pub local_root: PathBuf,
    pub remote_root: NodeHandle,
    pub account_id: u64,
    pub debris_name: String,
    pub case_insensitive: bool,
    pub is_network: bool,
    /// Filesystem fingerprint pinned at first construction; 0 while unset.
    pub fs_fingerprint: u64,
}

impl SyncConfig {
    pub fn new(tag: i32, local_root: PathBuf, remote_root: NodeHandle, account_id: u64) -> Self {
        Self {
            tag,
            local_root,
            remote_root,
            account_id,
            debris_name: ".debris".to_string(),
            case_insensitive: false,
            is_network: false,
            fs_fingerprint: 0,
        }
    }
}

/// Table name for one sync's node cache.
pub fn state_table_name(root_fs_id: u64, remote_root: NodeHandle, account_id: u64) -> String {
    let mut raw = [0u8; 24];
    raw[..8].copy_from_slice(&root_fs_id.to_le_bytes());
    raw[8..16].copy_from_slice(&remote_root.to_le_bytes());
    raw[16..].copy_from_slice(&account_id.to_le_bytes());
    format!("syncstate_{}", URL_SAFE_NO_PAD.encode(raw))
}

pub struct StateStore {
    pool: SqlitePool,
    table: String,
    next_id: u32,
}

pub struct ConfigBag {
    pool: SqlitePool,
    configs: HashMap<i32, SyncConfig>,
}

include!("store_impl.rs");

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("cumulus");
    path.push("sync");
    path.push("state.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
