//! Per-client descriptor table (spec §4.5).
//!
//! Grounded on the teacher's per-connection task/channel ownership model
//! (`process_socket` spawning one task set per connection) generalized to
//! a per-connection array of open-file records; the per-slot mutex mirrors
//! the node cache's per-node lock (`src/node.rs`).

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Result, Status};
use crate::node::Node;

/// `(node, byte position, open-read bool, open-write bool, append bool,
/// permissions mask, per-descriptor mutex)` — spec §3 "Descriptor".
///
/// Permissions are fixed at creation from the walk result and bound the
/// flags a later `open` may set; `open_read`/`open_write` start `false`
/// and are latched in by `open` (spec §4.6).
pub struct Descriptor {
    pub node: Arc<Node>,
    pub position: u64,
    pub open_read: bool,
    pub open_write: bool,
    pub append: bool,
    pub permissions: Permissions,
}

/// Bound on what a later `open` may request, inherited from the parent
/// descriptor at walk time or defaulted to read|write|append (spec §4.6
/// "walk").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
}

impl Permissions {
    pub const DEFAULT: Self = Self { read: true, write: true, append: true };
}

impl Descriptor {
    pub fn new(node: Arc<Node>, permissions: Permissions) -> Self {
        Self { node, position: 0, open_read: false, open_write: false, append: false, permissions }
    }
}

/// A table slot: a mutex-guarded descriptor plus the shared handle callers
/// clone out for the duration of one operation. Every mutation happens
/// through the slot's own mutex, so operations on the same fd serialise
/// while distinct fds proceed in parallel (spec §4.5, §5).
type Slot = Arc<Mutex<Descriptor>>;

/// Per-client array of open-file records, indexed by small integers
/// (spec §4.5).
#[derive(Default)]
pub struct DescriptorTable {
    slots: Mutex<Vec<Option<Slot>>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self { slots: Mutex::new(Vec::new()) }
    }

    /// Allocate the lowest free slot and bind `descriptor` to it.
    /// `exclusive` is reserved for future multi-client arbitration
    /// (spec §4.5 signature: `alloc(exclusive: bool) -> fd`); the
    /// descriptor table itself is already exclusive per client, so it is
    /// accepted but does not change behavior here.
    pub async fn alloc(&self, descriptor: Descriptor, _exclusive: bool) -> i64 {
        let mut slots = self.slots.lock().await;
        let slot = Arc::new(Mutex::new(descriptor));
        for (fd, entry) in slots.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(slot);
                return fd as i64;
            }
        }
        slots.push(Some(slot));
        (slots.len() - 1) as i64
    }

    /// Bind an already-constructed descriptor to a specific slot, used by
    /// `dup` (spec §4.5 `assign`). Grows the table if `fd` is beyond its
    /// current length.
    pub async fn assign(&self, fd: i64, descriptor: Descriptor) -> Result<()> {
        let fd = usize::try_from(fd).map_err(|_| Status::EBadF)?;
        let mut slots = self.slots.lock().await;
        if fd >= slots.len() {
            slots.resize_with(fd + 1, || None);
        }
        slots[fd] = Some(Arc::new(Mutex::new(descriptor)));
        Ok(())
    }

    /// Take a reference to the descriptor at `fd`. Callers acquire the
    /// returned slot's mutex themselves before mutating its fields
    /// (spec §4.5).
    pub async fn get(&self, fd: i64) -> Result<Slot> {
        let fd = usize::try_from(fd).map_err(|_| Status::EBadF)?;
        let slots = self.slots.lock().await;
        slots.get(fd).and_then(Option::clone).ok_or(Status::EBadF)
    }

    /// Close `fd`: clears the slot. The caller is responsible for
    /// releasing the node reference (spec §4.5 `free`); this only removes
    /// the table entry so the slot can be reused by a later `alloc`.
    pub async fn free(&self, fd: i64) -> Result<Slot> {
        let fd = usize::try_from(fd).map_err(|_| Status::EBadF)?;
        let mut slots = self.slots.lock().await;
        slots.get_mut(fd).and_then(Option::take).ok_or(Status::EBadF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LookupResult, NodeKind};
    use crate::node::NodeCache;
    use crate::triplet::{BackendHandle, Triplet};

    fn node() -> Arc<Node> {
        let cache = NodeCache::new();
        cache.get(LookupResult {
            triplet: Triplet::new(BackendHandle(1), 0, 1),
            size: 0,
            kind: NodeKind::Regular,
        })
    }

    #[tokio::test]
    async fn alloc_reuses_lowest_free_slot() {
        let table = DescriptorTable::new();
        let fd0 = table.alloc(Descriptor::new(node(), Permissions::DEFAULT), false).await;
        let fd1 = table.alloc(Descriptor::new(node(), Permissions::DEFAULT), false).await;
        assert_eq!(fd0, 0);
        assert_eq!(fd1, 1);
        table.free(fd0).await.unwrap();
        let fd2 = table.alloc(Descriptor::new(node(), Permissions::DEFAULT), false).await;
        assert_eq!(fd2, 0);
    }

    #[tokio::test]
    async fn get_missing_fd_is_ebadf() {
        let table = DescriptorTable::new();
        assert!(matches!(table.get(5).await, Err(Status::EBadF)));
    }

    #[tokio::test]
    async fn assign_binds_descriptor_into_chosen_slot() {
        let table = DescriptorTable::new();
        table.assign(3, Descriptor::new(node(), Permissions::DEFAULT)).await.unwrap();
        let slot = table.get(3).await.unwrap();
        assert_eq!(slot.lock().await.position, 0);
    }

    #[tokio::test]
    async fn negative_fd_is_ebadf() {
        let table = DescriptorTable::new();
        assert!(matches!(table.get(-1).await, Err(Status::EBadF)));
    }
}
