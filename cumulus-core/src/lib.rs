pub mod fingerprint;
pub mod fs;
pub mod paths;
pub mod remote;

pub use fingerprint::{FileFingerprint, LightFingerprint};
pub use fs::{FsEntry, FsError, NodeKind};
pub use remote::{CloudCommand, NodeHandle, RemoteNode, RemoteTree, UNDEF};
