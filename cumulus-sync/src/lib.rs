pub mod sync;

pub use sync::engine::{EngineError, NullMonitor, SyncEngine, SyncErrorCode, SyncMonitor, SyncState};
pub use sync::node::{FsidIndex, NodeId, Nodes, SyncNode, TreeAction};
pub use sync::queue::{Notification, ScanQueue};
pub use sync::store::{ConfigBag, StateStore, SyncConfig};
