//! Global namespace root and the mount/unmount protocol (spec §4.3, §9).
//!
//! Grounded on the teacher's overall `MamontFs`/export composition
//! (`src/fs/mod.rs`, `src/export.rs`), which glues a backend handle and a
//! registry together; generalized here into the namespace rwlock plus
//! mount-table composition the rest of the broker locks against.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::backend::registry::BackendRegistry;
use crate::backend::{Backend, LookupMode, LookupResult, NodeKind};
use crate::error::{Result, Status};
use crate::mount::{MountEntry, MountTable};
use crate::node::NodeCache;
use crate::resolver::{self, WalkFlags};
use crate::triplet::{BackendHandle, Triplet};

/// Process-wide namespace state (spec §9 "Global namespace root"): unset
/// at startup, set exactly once by the first successful root `MOUNT`,
/// cleared by root `UNMOUNT`, protected throughout by the namespace rwlock
/// (lock order position 1, spec §5).
pub struct Namespace {
    root: RwLock<Option<Triplet>>,
    pub mounts: MountTable,
    pub nodes: NodeCache,
    pub registry: BackendRegistry,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(None),
            mounts: MountTable::new(),
            nodes: NodeCache::new(),
            registry: BackendRegistry::new(),
        }
    }

    /// Read-lock the namespace, returning the current root triplet (or
    /// `ENOENT` if nothing is mounted yet). Held for the duration of any
    /// lookup-only operation.
    pub async fn read_root(&self) -> Result<Triplet> {
        self.root.read().await.ok_or(Status::ENoEnt)
    }

    async fn backend_for(&self, triplet: Triplet) -> Result<Arc<dyn Backend>> {
        self.registry.by_handle(triplet.backend).await.ok_or(Status::EIo)
    }

    /// Resolve `path` relative to `base`. Pure lookups take the namespace
    /// read-lock and run in parallel with one another; a walk that creates
    /// or unlinks a directory entry takes the write-lock instead so it is
    /// serialized against every other namespace-modifying operation (spec
    /// §5: "rename, unlink, walk-with-create ... are serialised by the
    /// namespace write-lock").
    pub async fn resolve(&self, base: Triplet, path: &str, flags: WalkFlags) -> Result<LookupResult> {
        if flags.intersects(WalkFlags::CREATE | WalkFlags::UNLINK) {
            let _guard = self.root.write().await;
            resolver::resolve(&self.registry, &self.mounts, base, path, flags).await
        } else {
            let _guard = self.root.read().await;
            resolver::resolve(&self.registry, &self.mounts, base, path, flags).await
        }
    }

    /// Mount protocol (spec §4.3), entered under the namespace write-lock
    /// for the whole negotiation so lookups never observe a half-installed
    /// mount.
    pub async fn mount(
        &self,
        mountpoint_path: &str,
        backend_handle: BackendHandle,
        backend: Arc<dyn Backend>,
        service_id: u64,
        instance: u64,
        fs_name: &str,
        options: &str,
    ) -> Result<()> {
        let mut root_guard = self.root.write().await;

        if root_guard.is_none() {
            if mountpoint_path != "/" {
                return Err(Status::ENoEnt);
            }
            let mut result = backend.mounted(service_id, options).await?;
            // The backend identifies its root by `(service_id, index)`
            // alone; it doesn't know the handle the registry just assigned
            // it, so the namespace stamps it in here.
            result.triplet.backend = backend_handle;
            let node = self.nodes.get(result);
            let entry = MountEntry {
                point: "/".to_string(),
                mountpoint_triplet: None,
                root_triplet: result.triplet,
                backend: backend_handle,
                service_id,
                instance,
                fs_name: fs_name.to_string(),
                options: options.to_string(),
            };
            if let Err(err) = self.mounts.insert(entry).await {
                // spec §9: roll back any error observed before the final
                // reply — never leave a dangling node reference behind.
                self.nodes.put(node, backend.clone());
                return Err(err);
            }
            *root_guard = Some(result.triplet);
            return Ok(());
        }

        let root = root_guard.expect("checked above");
        drop(root_guard);

        let mountpoint = resolver::resolve(
            &self.registry,
            &self.mounts,
            root,
            mountpoint_path,
            WalkFlags::DIRECTORY,
        )
        .await?;
        let mountpoint_node = self.nodes.get(mountpoint);

        let parent_backend = match self.backend_for(mountpoint.triplet).await {
            Ok(b) => b,
            Err(err) => {
                self.nodes.put(mountpoint_node, backend.clone());
                return Err(err);
            }
        };

        // spec §4.3 deadlock note: hold the mount-point's backend exchange
        // across the `MOUNT` reply (modeled here as one direct call) since
        // the parent may recursively re-enter the child. We never hold the
        // namespace write-lock across this await chain past what's needed
        // for serializability — the lock itself, not an IPC handle, is
        // what guards against lookups observing a half-installed mount.
        let mount_result = parent_backend
            .mount(mountpoint.triplet.service_id, mountpoint.triplet.index, backend_handle, service_id, options)
            .await;
        if let Err(err) = mount_result {
            self.nodes.put(mountpoint_node, backend.clone());
            return Err(err);
        }

        let child_root = match backend.mounted(service_id, options).await {
            Ok(mut root) => {
                root.triplet.backend = backend_handle;
                root
            }
            Err(err) => {
                let _ = parent_backend
                    .unmount(mountpoint.triplet.service_id, mountpoint.triplet.index)
                    .await;
                self.nodes.put(mountpoint_node, backend.clone());
                return Err(err);
            }
        };
        let root_node = self.nodes.get(child_root);

        let entry = MountEntry {
            point: mountpoint_path.to_string(),
            mountpoint_triplet: Some(mountpoint.triplet),
            root_triplet: child_root.triplet,
            backend: backend_handle,
            service_id,
            instance,
            fs_name: fs_name.to_string(),
            options: options.to_string(),
        };
        if let Err(err) = self.mounts.insert(entry).await {
            self.nodes.put(root_node, backend.clone());
            self.nodes.put(mountpoint_node, backend.clone());
            let _ = parent_backend
                .unmount(mountpoint.triplet.service_id, mountpoint.triplet.index)
                .await;
            return Err(err);
        }

        // The reference taken above via `nodes.get(mountpoint)` is the
        // long-lived mount reference (spec §4.3: "Take a reference on the
        // mount-point node; it will be released by unmount"); we simply
        // don't `put` it here. Dropping the `Arc` handle itself is fine —
        // only `NodeCache::put` touches the logical refcount.
        drop(mountpoint_node);
        Ok(())
    }

    /// Unmount protocol (spec §4.3).
    pub async fn unmount(&self, mountpoint_path: &str) -> Result<()> {
        let root_guard = self.root.write().await;
        root_guard.ok_or(Status::ENoEnt)?;

        let entry = self.mounts.get(mountpoint_path).await.ok_or(Status::ENoEnt)?;
        let root_backend = self.backend_for(entry.root_triplet).await?;

        let root_lookup =
            LookupResult { triplet: entry.root_triplet, size: 0, kind: NodeKind::Directory };
        let mount_root_node = self.nodes.get(root_lookup);

        let sum = self.nodes.refcount_sum(entry.root_triplet.backend, entry.root_triplet.service_id);
        if sum > 2 {
            self.nodes.put(mount_root_node, root_backend);
            return Err(Status::EBusy);
        }

        if let Some(mountpoint) = entry.mountpoint_triplet {
            let parent_backend = self.backend_for(mountpoint).await?;
            parent_backend.unmount(mountpoint.service_id, mountpoint.index).await?;
            let mountpoint_lookup =
                LookupResult { triplet: mountpoint, size: 0, kind: NodeKind::Directory };
            let mountpoint_node = self.nodes.get(mountpoint_lookup);
            // once for this call's own reference, once for the mount
            // reference the original mount installed (spec §4.3 step 3).
            self.nodes.put(mountpoint_node.clone(), parent_backend.clone());
            self.nodes.put(mountpoint_node, parent_backend);
        } else {
            root_backend.unmounted(entry.root_triplet.service_id).await?;
            drop(root_guard);
            *self.root.write().await = None;
        }

        self.nodes.forget(&mount_root_node);
        self.mounts.remove(mountpoint_path).await;
        Ok(())
    }

    pub async fn register_backend(
        &self,
        fs_name: impl Into<String>,
        instance: u64,
        backend: Arc<dyn Backend>,
    ) -> BackendHandle {
        self.registry.register(fs_name, instance, backend).await
    }

    /// `RENAME` (spec §4.6). Best-effort atomic replace, entered under the
    /// namespace write-lock for its whole displace/unlink/link/release
    /// sequence so two renames (or a rename racing an unlink/walk-create)
    /// can never interleave (spec §5, property #5, scenario S4).
    pub async fn rename(&self, base: Triplet, old: &str, new: &str) -> Result<()> {
        if old == new {
            return Ok(());
        }
        if new.starts_with(old) && new.as_bytes().get(old.len()) == Some(&b'/')
            || old.starts_with(new) && old.as_bytes().get(new.len()) == Some(&b'/')
        {
            return Err(Status::EInval);
        }

        let (old_parent, old_name) = split_parent(old)?;
        let (new_parent, new_name) = split_parent(new)?;

        let _guard = self.root.write().await;

        let old_parent_triplet =
            resolver::resolve(&self.registry, &self.mounts, base, old_parent, WalkFlags::DIRECTORY)
                .await?
                .triplet;
        let new_parent_triplet =
            resolver::resolve(&self.registry, &self.mounts, base, new_parent, WalkFlags::DIRECTORY)
                .await?
                .triplet;

        let old_backend = self.backend_for(old_parent_triplet).await?;
        let new_backend = self.backend_for(new_parent_triplet).await?;

        // Step 1: displace `new`, if present.
        let displaced = match new_backend
            .lookup(
                new_parent_triplet.service_id,
                new_parent_triplet.index,
                new_name,
                LookupMode { unlink: true, ..LookupMode::default() },
            )
            .await
        {
            Ok(mut found) => {
                found.triplet.backend = new_parent_triplet.backend;
                Some(found.triplet)
            }
            Err(Status::ENoEnt) => None,
            Err(err) => return Err(err),
        };

        // Step 2: unlink `old`.
        let old_lookup = match old_backend
            .lookup(
                old_parent_triplet.service_id,
                old_parent_triplet.index,
                old_name,
                LookupMode { unlink: true, ..LookupMode::default() },
            )
            .await
        {
            Ok(mut found) => {
                found.triplet.backend = old_parent_triplet.backend;
                found
            }
            Err(err) => {
                if let Some(target) = displaced {
                    let _ = new_backend
                        .link(new_parent_triplet.service_id, new_parent_triplet.index, new_name, target.index)
                        .await;
                }
                return Err(err);
            }
        };

        // Step 3: link `old`'s node at `new`.
        if let Err(err) = new_backend
            .link(new_parent_triplet.service_id, new_parent_triplet.index, new_name, old_lookup.triplet.index)
            .await
        {
            let _ = old_backend
                .link(old_parent_triplet.service_id, old_parent_triplet.index, old_name, old_lookup.triplet.index)
                .await;
            if let Some(target) = displaced {
                let _ = new_backend
                    .link(new_parent_triplet.service_id, new_parent_triplet.index, new_name, target.index)
                    .await;
            }
            return Err(err);
        }

        // Step 4: release the displaced `new` target so `DESTROY` fires if
        // nothing else references it.
        if let Some(target) = displaced {
            let node = self.nodes.get(LookupResult { triplet: target, size: 0, kind: NodeKind::Regular });
            self.nodes.put(node, new_backend);
        }

        Ok(())
    }
}

/// Split `path` into `(parent, name)`; the root itself has no parent.
fn split_parent(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Ok(("/", &trimmed[1..])),
        Some(idx) => Ok((&trimmed[..idx], &trimmed[idx + 1..])),
        None if !trimmed.is_empty() => Ok(("/", trimmed)),
        None => Err(Status::EInval),
    }
}
