//! A host-filesystem-backed [`Backend`] that mirrors a real directory tree.
//!
//! Grounded on the teacher's `examples/shadow_fs/fs/{shadow,state,utils}.rs`
//! (`ShadowFS`/`State`): an id-keyed path table over a canonicalised root,
//! generalized from the NFS `Vfs` trait (file-handle-addressed) to
//! [`Backend`] (triplet/`index`-addressed), and from `vfs::NfsError` to
//! [`Status`].

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::backend::{
    Backend, BackendCaps, LookupMode, LookupResult, NodeKind, OpenMode, ReadOutcome, WriteOutcome,
};
use crate::error::{Result, Status};
use crate::triplet::BackendHandle;

const ROOT_INDEX: u64 = 1;
const ORPHAN_DIR: &str = ".vfs-orphans";

struct PathEntry {
    path: PathBuf,
    /// Cleared by an `UNLINK` lookup; a `DESTROY` for an entry in this
    /// state reclaims the file on disk rather than just forgetting the
    /// index (spec §4.2: `DESTROY` reflects the broker's reference count,
    /// not the filesystem's directory-entry count).
    linked: bool,
}

struct PathTable {
    next_index: u64,
    by_index: HashMap<u64, PathEntry>,
    by_path: HashMap<PathBuf, u64>,
}

impl PathTable {
    fn new() -> Self {
        let mut by_index = HashMap::new();
        let mut by_path = HashMap::new();
        by_index.insert(ROOT_INDEX, PathEntry { path: PathBuf::new(), linked: true });
        by_path.insert(PathBuf::new(), ROOT_INDEX);
        Self { next_index: ROOT_INDEX + 1, by_index, by_path }
    }

    fn ensure(&mut self, rel: PathBuf) -> u64 {
        if let Some(&index) = self.by_path.get(&rel) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.by_index.insert(index, PathEntry { path: rel.clone(), linked: true });
        self.by_path.insert(rel, index);
        index
    }

    fn path_of(&self, index: u64) -> Option<PathBuf> {
        self.by_index.get(&index).map(|entry| entry.path.clone())
    }

    fn is_linked(&self, index: u64) -> bool {
        self.by_index.get(&index).map(|entry| entry.linked).unwrap_or(false)
    }

    fn forget(&mut self, rel: &Path) {
        if let Some(index) = self.by_path.remove(rel) {
            self.by_index.remove(&index);
        }
    }

    /// Re-home `old` at `new`, marking the entry unlinked — used when an
    /// `UNLINK` lookup parks a file under the orphan directory.
    fn unlink(&mut self, old: &Path, new: PathBuf) {
        if let Some(index) = self.by_path.remove(old) {
            self.by_index.insert(index, PathEntry { path: new.clone(), linked: false });
            self.by_path.insert(new, index);
        }
    }

    /// Re-home `old` at `new`, marking the entry linked again — used by
    /// `LINK` when a rename re-homes an unlinked file under a new name.
    fn relink(&mut self, old: &Path, new: PathBuf) {
        if let Some(index) = self.by_path.remove(old) {
            self.by_index.insert(index, PathEntry { path: new.clone(), linked: true });
            self.by_path.insert(new, index);
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Status::EInval);
    }
    match Path::new(name).components().next() {
        Some(Component::Normal(_)) => {}
        _ => return Err(Status::EInval),
    }
    if Path::new(name).components().count() != 1 {
        return Err(Status::EInval);
    }
    Ok(())
}

fn map_io_error(err: std::io::Error) -> Status {
    use std::io::ErrorKind::*;
    match err.kind() {
        NotFound => Status::ENoEnt,
        PermissionDenied => Status::EPerm,
        AlreadyExists => Status::EExist,
        InvalidInput | InvalidData => Status::EInval,
        _ => Status::EIo,
    }
}

/// A filesystem backend rooted at a real host directory.
pub struct ShadowBackend {
    root: PathBuf,
    paths: Mutex<PathTable>,
}

impl ShadowBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let canonical = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root: canonical, paths: Mutex::new(PathTable::new()) }
    }

    fn full_path(&self, rel: &Path) -> PathBuf {
        if rel.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }

    fn orphan_rel(&self, index: u64) -> PathBuf {
        Path::new(ORPHAN_DIR).join(index.to_string())
    }

    async fn metadata_for(&self, rel: &Path) -> Result<std::fs::Metadata> {
        fs::metadata(self.full_path(rel)).await.map_err(map_io_error)
    }

    fn kind_of(meta: &std::fs::Metadata) -> NodeKind {
        if meta.is_dir() {
            NodeKind::Directory
        } else if meta.is_file() {
            NodeKind::Regular
        } else {
            NodeKind::Other
        }
    }

    async fn result_for(&self, index: u64, rel: &Path) -> Result<LookupResult> {
        let meta = self.metadata_for(rel).await?;
        Ok(LookupResult {
            triplet: crate::triplet::Triplet::new(BackendHandle(0), 0, index),
            size: meta.len(),
            kind: Self::kind_of(&meta),
        })
    }
}

#[async_trait]
impl Backend for ShadowBackend {
    async fn mounted(&self, _service_id: u64, _options: &str) -> Result<LookupResult> {
        self.result_for(ROOT_INDEX, Path::new("")).await
    }

    async fn mount(
        &self,
        _service_id: u64,
        mountpoint_index: u64,
        _child_backend: BackendHandle,
        _child_service: u64,
        _options: &str,
    ) -> Result<()> {
        let rel = self.paths.lock().await.path_of(mountpoint_index).ok_or(Status::ENoEnt)?;
        let meta = self.metadata_for(&rel).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(Status::EInval)
        }
    }

    async fn unmount(&self, _service_id: u64, mountpoint_index: u64) -> Result<()> {
        if self.paths.lock().await.path_of(mountpoint_index).is_some() {
            Ok(())
        } else {
            Err(Status::ENoEnt)
        }
    }

    async fn unmounted(&self, _service_id: u64) -> Result<()> {
        Ok(())
    }

    async fn lookup(
        &self,
        _service_id: u64,
        parent_index: u64,
        name: &str,
        mode: LookupMode,
    ) -> Result<LookupResult> {
        let parent_rel = {
            let paths = self.paths.lock().await;
            paths.path_of(parent_index).ok_or(Status::ENoEnt)?
        };

        if name == "." {
            return self.result_for(parent_index, &parent_rel).await;
        }
        validate_name(name)?;

        let child_rel = parent_rel.join(name);
        let child_abs = self.full_path(&child_rel);
        let exists = fs::symlink_metadata(&child_abs).await.is_ok();

        if exists {
            if mode.exclusive {
                return Err(Status::EExist);
            }
            let index = self.paths.lock().await.ensure(child_rel.clone());
            if mode.unlink {
                let meta = self.metadata_for(&child_rel).await?;
                let result = LookupResult {
                    triplet: crate::triplet::Triplet::new(BackendHandle(0), 0, index),
                    size: meta.len(),
                    kind: Self::kind_of(&meta),
                };
                // The directory entry is gone, but the node may still be
                // referenced (open fd, pending `link` from a rename) — park
                // the file under a hidden holding area rather than deleting
                // it; `destroy` reclaims it for real once nothing refers to
                // the index anymore.
                let orphan_rel = self.orphan_rel(index);
                let orphan_abs = self.full_path(&orphan_rel);
                fs::create_dir_all(self.full_path(Path::new(ORPHAN_DIR))).await.map_err(map_io_error)?;
                fs::rename(&child_abs, &orphan_abs).await.map_err(map_io_error)?;
                self.paths.lock().await.unlink(&child_rel, orphan_rel);
                return Ok(result);
            }
            let result = self.result_for(index, &child_rel).await?;
            if let Some(required) = mode.require {
                if result.kind != required {
                    return Err(Status::EInval);
                }
            }
            return Ok(result);
        }

        if mode.unlink || !mode.create {
            return Err(Status::ENoEnt);
        }

        match mode.require {
            Some(NodeKind::Directory) => {
                fs::create_dir(&child_abs).await.map_err(map_io_error)?;
            }
            _ => {
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&child_abs)
                    .await
                    .map_err(map_io_error)?;
            }
        }
        let index = self.paths.lock().await.ensure(child_rel.clone());
        self.result_for(index, &child_rel).await
    }

    async fn open_node(&self, _service_id: u64, index: u64, _mode: OpenMode) -> Result<()> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        self.metadata_for(&rel).await.map(|_| ())
    }

    async fn read(&self, _service_id: u64, index: u64, offset: u64, count: u32) -> Result<ReadOutcome> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        let mut file = fs::File::open(self.full_path(&rel)).await.map_err(map_io_error)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
        let mut buf = vec![0u8; count as usize];
        let read = file.read(&mut buf).await.map_err(map_io_error)?;
        buf.truncate(read);
        Ok(ReadOutcome { data: buf })
    }

    async fn write(&self, _service_id: u64, index: u64, offset: u64, data: &[u8]) -> Result<WriteOutcome> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        let path = self.full_path(&rel);
        let mut file = OpenOptions::new().write(true).open(&path).await.map_err(map_io_error)?;
        file.seek(std::io::SeekFrom::Start(offset)).await.map_err(map_io_error)?;
        file.write_all(data).await.map_err(map_io_error)?;
        let new_size = file.metadata().await.map_err(map_io_error)?.len();
        Ok(WriteOutcome { written: data.len() as u32, new_size: Some(new_size) })
    }

    async fn truncate(&self, _service_id: u64, index: u64, new_size: u64) -> Result<()> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        let path = self.full_path(&rel);
        let file = OpenOptions::new().write(true).open(&path).await.map_err(map_io_error)?;
        file.set_len(new_size).await.map_err(map_io_error)
    }

    async fn sync(&self, _service_id: u64, index: u64) -> Result<()> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        let path = self.full_path(&rel);
        let file = OpenOptions::new().read(true).open(&path).await.map_err(map_io_error)?;
        file.sync_all().await.map_err(map_io_error)
    }

    async fn stat(&self, _service_id: u64, index: u64) -> Result<Vec<u8>> {
        let rel = self.paths.lock().await.path_of(index).ok_or(Status::ENoEnt)?;
        let meta = self.metadata_for(&rel).await?;
        let kind = match Self::kind_of(&meta) {
            NodeKind::Directory => 0u8,
            NodeKind::Regular => 1u8,
            NodeKind::Other => 2u8,
        };
        let mut out = vec![kind];
        out.extend_from_slice(&meta.len().to_le_bytes());
        Ok(out)
    }

    async fn destroy(&self, _service_id: u64, index: u64) {
        if index == ROOT_INDEX {
            return;
        }
        let rel = {
            let mut paths = self.paths.lock().await;
            let Some(rel) = paths.path_of(index) else { return };
            let linked = paths.is_linked(index);
            paths.forget(&rel);
            if linked {
                return;
            }
            rel
        };
        let abs = self.full_path(&rel);
        if let Ok(meta) = fs::symlink_metadata(&abs).await {
            let _ = if meta.is_dir() { fs::remove_dir_all(&abs).await } else { fs::remove_file(&abs).await };
        }
    }

    async fn link(&self, _service_id: u64, new_parent_index: u64, new_name: &str, target_index: u64) -> Result<()> {
        validate_name(new_name)?;
        let (parent_rel, target_rel) = {
            let paths = self.paths.lock().await;
            (
                paths.path_of(new_parent_index).ok_or(Status::ENoEnt)?,
                paths.path_of(target_index).ok_or(Status::ENoEnt)?,
            )
        };
        let new_rel = parent_rel.join(new_name);
        let new_abs = self.full_path(&new_rel);
        if fs::symlink_metadata(&new_abs).await.is_ok() {
            return Err(Status::EExist);
        }
        // Entries were already removed from their old directory name by a
        // preceding `UNLINK` lookup; re-home the underlying file at the new
        // name (host filesystems can't keep a file with no directory entry
        // the way the broker's cache can keep a node with no descriptor).
        let old_abs = self.full_path(&target_rel);
        if fs::symlink_metadata(&old_abs).await.is_ok() {
            fs::rename(&old_abs, &new_abs).await.map_err(map_io_error)?;
        }
        self.paths.lock().await.relink(&target_rel, new_rel);
        Ok(())
    }

    fn capabilities(&self) -> BackendCaps {
        BackendCaps::default()
    }
}

/// Validate that `name` has no path separators — re-exported for tests.
#[cfg(test)]
pub(crate) fn validate_name_for_tests(name: &str) -> Result<()> {
    validate_name(name)
}

#[allow(dead_code)]
fn unused_ref(_: &OsStr) {}
