//! Per-instance activity trail
//!
//! Emitted as structured `tracing` events under the `activity` target so a
//! subscriber can route them to their own sink.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Create,
    Clone,
    Start,
    Stop,
    Delete,
    InstallService,
    AddUser,
    SnapshotCreate,
    SnapshotRestore,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Clone => "clone",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Delete => "delete",
            Self::InstallService => "install_service",
            Self::AddUser => "add_user",
            Self::SnapshotCreate => "snapshot_create",
            Self::SnapshotRestore => "snapshot_restore",
        }
    }
}

/// Record one finished action against an instance.
pub fn record(instance_id: &str, kind: ActivityKind, success: bool, detail: &str) {
    if success {
        info!(
            target: "activity",
            instance_id = %instance_id,
            kind = kind.as_str(),
            status = "success",
            "{}",
            detail
        );
    } else {
        warn!(
            target: "activity",
            instance_id = %instance_id,
            kind = kind.as_str(),
            status = "error",
            "{}",
            detail
        );
    }
}
