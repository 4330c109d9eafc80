//! Operation dispatcher (spec §4.6): implements the client-facing
//! operations by composing the namespace, resolver, node cache, and
//! descriptor table; owns locking order and reply sequencing.
//!
//! Grounded on `examples/shadow_fs/fs/mod.rs`'s `impl Vfs for ShadowFS`
//! (one method per operation, error-mapping-first style), generalized from
//! host-filesystem operations to namespace/descriptor composition over a
//! [`Backend`].

use std::sync::Arc;

use tracing::instrument;

use crate::backend::{Backend, NodeKind, OpenMode};
use crate::descriptor::{Descriptor, DescriptorTable, Permissions};
use crate::error::{Result, Status};
use crate::namespace::Namespace;
use crate::node;
use crate::resolver::WalkFlags;
use crate::triplet::Triplet;

/// `SEEK` whence values (spec §6 `SEEK`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Per-connection dispatcher: one [`DescriptorTable`] per client, shared
/// access to the process-wide [`Namespace`] (spec §4.6, §5).
pub struct Dispatcher {
    pub namespace: Arc<Namespace>,
    pub descriptors: DescriptorTable,
}

impl Dispatcher {
    pub fn new(namespace: Arc<Namespace>) -> Self {
        Self { namespace, descriptors: DescriptorTable::new() }
    }

    async fn backend_for(&self, triplet: Triplet) -> Result<Arc<dyn Backend>> {
        self.namespace.registry.by_handle(triplet.backend).await.ok_or(Status::EIo)
    }

    fn permissions_from_walk(parent_permissions: Option<Permissions>) -> Permissions {
        parent_permissions.unwrap_or(Permissions::DEFAULT)
    }

    /// `WALK` — resolve `path` relative to `parent_fd` (or the namespace
    /// root when `parent_fd` is negative) and allocate a new descriptor for
    /// the result. Does not open the node (spec §4.6 "walk").
    #[instrument(skip(self))]
    pub async fn walk(&self, parent_fd: i64, path: &str, flags: WalkFlags) -> Result<i64> {
        let (base, inherited_permissions) = if parent_fd < 0 {
            (self.namespace.read_root().await?, None)
        } else {
            let slot = self.descriptors.get(parent_fd).await?;
            let guard = slot.lock().await;
            (guard.node.triplet, Some(guard.permissions))
        };

        let result = self.namespace.resolve(base, path, flags).await?;
        let node = self.namespace.nodes.get(result);
        let permissions = Self::permissions_from_walk(inherited_permissions);
        let fd = self.descriptors.alloc(Descriptor::new(node, permissions), false).await;
        Ok(fd)
    }

    /// `OPEN2` — validate `mode` against the descriptor's permission mask
    /// and latch read/write bits once the backend accepts the open
    /// (spec §4.6 "open").
    #[instrument(skip(self))]
    pub async fn open(&self, fd: i64, mode: OpenMode) -> Result<()> {
        let slot = self.descriptors.get(fd).await?;
        let mut guard = slot.lock().await;

        if (mode.read && !guard.permissions.read) || (mode.write && !guard.permissions.write) {
            return Err(Status::EPerm);
        }
        if mode.append && !guard.permissions.append {
            return Err(Status::EPerm);
        }
        if !mode.read && !mode.write {
            return Err(Status::EInval);
        }
        if mode.write && guard.node.kind == NodeKind::Directory {
            return Err(Status::EInval);
        }

        let backend = self.backend_for(guard.node.triplet).await?;
        backend.open_node(guard.node.triplet.service_id, guard.node.triplet.index, mode).await?;
        guard.open_read = mode.read;
        guard.open_write = mode.write;
        guard.append = mode.append;
        Ok(())
    }

    /// `READ` (spec §4.6 "read/write").
    #[instrument(skip(self))]
    pub async fn read(&self, fd: i64, count: u32) -> Result<Vec<u8>> {
        let slot = self.descriptors.get(fd).await?;
        let mut guard = slot.lock().await;
        if !guard.open_read {
            return Err(Status::EInval);
        }

        let backend = self.backend_for(guard.node.triplet).await?;
        let triplet = guard.node.triplet;
        let node = guard.node.clone();

        // Directory reads (readdir) additionally take the namespace
        // read-lock so the namespace can't mutate mid-enumeration
        // (spec §4.6).
        let _namespace_guard = if node.kind == NodeKind::Directory {
            Some(self.namespace.read_root().await)
        } else {
            None
        };

        let outcome = {
            let _contents_guard = node.contents().read().await;
            backend.read(triplet.service_id, triplet.index, guard.position, count).await?
        };

        guard.position = guard.position.saturating_add(outcome.data.len() as u64);
        Ok(outcome.data)
    }

    /// `WRITE` (spec §4.6 "read/write", append-mode position handling).
    #[instrument(skip(self, data))]
    pub async fn write(&self, fd: i64, data: &[u8]) -> Result<(u32, Option<u64>)> {
        let slot = self.descriptors.get(fd).await?;
        let mut guard = slot.lock().await;
        if !guard.open_write {
            return Err(Status::EInval);
        }

        let backend = self.backend_for(guard.node.triplet).await?;
        let triplet = guard.node.triplet;
        let node = guard.node.clone();
        let caps = backend.capabilities();

        // A write that may change size, or that runs on a backend without
        // concurrent-rw, needs the write-mode contents lock; otherwise it
        // can share the read mode with concurrent readers (spec §4.6).
        let needs_write_lock = !(caps.concurrent_rw && caps.write_retains_size);

        let (written, new_size) = if needs_write_lock {
            let mut contents = node.contents().write().await;
            if guard.append {
                guard.position = contents.size;
            }
            let outcome =
                backend.write(triplet.service_id, triplet.index, guard.position, data).await?;
            if let Some(size) = outcome.new_size {
                contents.size = size;
            }
            (outcome.written, outcome.new_size)
        } else {
            if guard.append {
                guard.position = node::read_size(&node).await;
            }
            let outcome =
                backend.write(triplet.service_id, triplet.index, guard.position, data).await?;
            (outcome.written, outcome.new_size)
        };

        guard.position = guard.position.saturating_add(u64::from(written));
        Ok((written, new_size))
    }

    /// `SEEK` (spec §4.6).
    #[instrument(skip(self))]
    pub async fn seek(&self, fd: i64, offset: i64, whence: Whence) -> Result<i64> {
        let slot = self.descriptors.get(fd).await?;
        let mut guard = slot.lock().await;

        let new_position: u64 = match whence {
            Whence::Set => {
                if offset < 0 {
                    return Err(Status::EInval);
                }
                offset as u64
            }
            Whence::Cur => {
                if offset >= 0 {
                    guard.position.checked_add(offset as u64).ok_or(Status::EOverflow)?
                } else {
                    let magnitude = offset.unsigned_abs();
                    guard.position.checked_sub(magnitude).ok_or(Status::EOverflow)?
                }
            }
            Whence::End => {
                let size = node::read_size(&guard.node).await;
                if offset >= 0 {
                    size.checked_add(offset as u64).ok_or(Status::EOverflow)?
                } else {
                    let magnitude = offset.unsigned_abs();
                    size.checked_sub(magnitude).ok_or(Status::EOverflow)?
                }
            }
        };

        guard.position = new_position;
        Ok(new_position.min(i64::MAX as u64) as i64)
    }

    /// `TRUNCATE` (spec §4.6).
    #[instrument(skip(self))]
    pub async fn truncate(&self, fd: i64, new_size: u64) -> Result<()> {
        let slot = self.descriptors.get(fd).await?;
        let guard = slot.lock().await;
        let backend = self.backend_for(guard.node.triplet).await?;
        let triplet = guard.node.triplet;

        let mut contents = guard.node.contents().write().await;
        backend.truncate(triplet.service_id, triplet.index, new_size).await?;
        contents.size = new_size;
        Ok(())
    }

    /// `SYNC` (spec §4.6).
    #[instrument(skip(self))]
    pub async fn sync(&self, fd: i64) -> Result<()> {
        let slot = self.descriptors.get(fd).await?;
        let guard = slot.lock().await;
        let backend = self.backend_for(guard.node.triplet).await?;
        backend.sync(guard.node.triplet.service_id, guard.node.triplet.index).await
    }

    /// `FSTAT` (spec §4.6: "forward routing so the backend can write the
    /// reply payload directly to the client buffer").
    #[instrument(skip(self))]
    pub async fn stat(&self, fd: i64) -> Result<Vec<u8>> {
        let slot = self.descriptors.get(fd).await?;
        let guard = slot.lock().await;
        let backend = self.backend_for(guard.node.triplet).await?;
        backend.stat(guard.node.triplet.service_id, guard.node.triplet.index).await
    }

    /// `CLOSE` (spec §4.6): free the descriptor, drop the node reference.
    #[instrument(skip(self))]
    pub async fn close(&self, fd: i64) -> Result<()> {
        let slot = self.descriptors.free(fd).await?;
        let node = slot.lock().await.node.clone();
        let backend = self.backend_for(node.triplet).await?;
        self.namespace.nodes.put(node, backend);
        Ok(())
    }

    /// `UNLINK2` (spec §4.6).
    #[instrument(skip(self))]
    pub async fn unlink(
        &self,
        parent_fd: i64,
        expect_fd: Option<i64>,
        path: &str,
        flags: WalkFlags,
    ) -> Result<()> {
        let base = if parent_fd < 0 {
            self.namespace.read_root().await?
        } else {
            self.descriptors.get(parent_fd).await?.lock().await.node.triplet
        };

        if let Some(expect_fd) = expect_fd {
            let probe = self.namespace.resolve(base, path, WalkFlags::empty()).await?;
            let slot = self.descriptors.get(expect_fd).await?;
            let expected = slot.lock().await.node.triplet;
            if probe.triplet != expected {
                return Err(Status::ENoEnt);
            }
        }

        let result = self.namespace.resolve(base, path, flags | WalkFlags::UNLINK).await?;
        // spec §4.6: `node_get` immediately followed by `node_put` so that
        // if this was the last link, `DESTROY` fires at the right moment.
        let node = self.namespace.nodes.get(result);
        let backend = self.backend_for(result.triplet).await?;
        self.namespace.nodes.put(node, backend);
        Ok(())
    }

    /// `RENAME` (spec §4.6). Resolves `base_fd` to a triplet and defers the
    /// whole best-effort atomic replace to `Namespace::rename`, which holds
    /// the namespace write-lock across the entire displace/unlink/link/
    /// release sequence (spec §5).
    #[instrument(skip(self))]
    pub async fn rename(&self, base_fd: i64, old: &str, new: &str) -> Result<()> {
        let base = if base_fd < 0 {
            self.namespace.read_root().await?
        } else {
            self.descriptors.get(base_fd).await?.lock().await.node.triplet
        };
        self.namespace.rename(base, old, new).await
    }

    /// `DUP` (spec §4.6).
    #[instrument(skip(self))]
    pub async fn dup(&self, old_fd: i64, new_fd: i64) -> Result<i64> {
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        let old_slot = self.descriptors.get(old_fd).await?;
        let old_guard = old_slot.lock().await;

        if let Ok(stale) = self.descriptors.free(new_fd).await {
            let node = stale.lock().await.node.clone();
            let backend = self.backend_for(node.triplet).await?;
            self.namespace.nodes.put(node, backend);
        }

        let node = self.namespace.nodes.get(crate::backend::LookupResult {
            triplet: old_guard.node.triplet,
            size: 0,
            kind: old_guard.node.kind,
        });
        let mut duplicate = Descriptor::new(node, old_guard.permissions);
        duplicate.position = old_guard.position;
        duplicate.open_read = old_guard.open_read;
        duplicate.open_write = old_guard.open_write;
        duplicate.append = old_guard.append;
        self.descriptors.assign(new_fd, duplicate).await?;
        Ok(new_fd)
    }

    /// `GET_MTAB` (spec §4.6): snapshot the mount table.
    #[instrument(skip(self))]
    pub async fn get_mtab(&self) -> Vec<crate::mount::MountEntry> {
        self.namespace.mounts.snapshot().await
    }
}

