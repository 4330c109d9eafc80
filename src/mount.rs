//! Mount table (spec §4.3): tracks mounted subtrees and backs the mount /
//! unmount protocol implemented by [`crate::namespace::Namespace`].
//!
//! Grounded on the teacher's `src/mount/mnt.rs`/`umnt.rs` XDR handlers,
//! generalized from argument decoding into the actual mount state machine
//! those handlers were stubs for.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{Result, Status};
use crate::triplet::{BackendHandle, Triplet};

/// `(mount-point path string, mount-point triplet, mounted-root triplet,
/// backend_handle, service_id, instance number, filesystem name, options
/// string)` — spec §3 "Mount entry".
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub point: String,
    /// `None` only for the root mount (spec §3: "no mount-point triplet").
    pub mountpoint_triplet: Option<Triplet>,
    pub root_triplet: Triplet,
    pub backend: BackendHandle,
    pub service_id: u64,
    pub instance: u64,
    pub fs_name: String,
    pub options: String,
}

/// Tracks mounted subtrees; provides overlay lookup at a mount point
/// (spec §4.3). Guarded by its own mutex, held briefly and never across an
/// `.await` on a backend call — lock order (spec §5) puts it below the
/// namespace rwlock but above the backend registry.
#[derive(Default)]
pub struct MountTable {
    by_path: Mutex<HashMap<String, MountEntry>>,
}

impl MountTable {
    pub fn new() -> Self {
        Self { by_path: Mutex::new(HashMap::new()) }
    }

    /// Record a fully-negotiated mount. Callers must have already
    /// completed every backend round trip for this mount (spec §9 open
    /// question: this is never called before that, so a partially
    /// negotiated mount never becomes visible).
    pub async fn insert(&self, entry: MountEntry) -> Result<()> {
        let mut table = self.by_path.lock().await;
        if table.contains_key(&entry.point) {
            return Err(Status::EExist);
        }
        if entry.mountpoint_triplet.is_some()
            && table.values().any(|e| e.mountpoint_triplet == entry.mountpoint_triplet)
        {
            // spec §3 invariant: a triplet may be a mount point of at most
            // one child mount.
            return Err(Status::EBusy);
        }
        table.insert(entry.point.clone(), entry);
        Ok(())
    }

    pub async fn remove(&self, point: &str) -> Option<MountEntry> {
        self.by_path.lock().await.remove(point)
    }

    /// If `triplet` is currently a mount-point triplet, return the entry
    /// whose mounted root it overlays (spec §4.3: "resolver consults the
    /// mount table implicitly by recognising when a triplet it has just
    /// resolved is a mount-point triplet").
    pub async fn overlay_at(&self, triplet: Triplet) -> Option<MountEntry> {
        let table = self.by_path.lock().await;
        table.values().find(|e| e.mountpoint_triplet == Some(triplet)).cloned()
    }

    pub async fn get(&self, point: &str) -> Option<MountEntry> {
        self.by_path.lock().await.get(point).cloned()
    }

    pub async fn root(&self) -> Option<MountEntry> {
        self.get("/").await
    }

    pub async fn is_empty(&self) -> bool {
        self.by_path.lock().await.is_empty()
    }

    /// Snapshot every mount entry, used by `GET_MTAB` streaming (spec
    /// §4.6) and the mtab enumerator.
    pub async fn snapshot(&self) -> Vec<MountEntry> {
        self.by_path.lock().await.values().cloned().collect()
    }
}
