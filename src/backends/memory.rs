//! An in-memory [`Backend`] — a tiny single-process filesystem with
//! directories and regular files, no persistence.
//!
//! Grounded on the teacher's `examples/in_memory/filesystem.rs`
//! `InMemoryVfs`/`State`/`Entry` shape (a fileid-keyed node map plus a
//! `next_fileid` counter), generalized from path-string handles to
//! triplet-keyed (`service_id`, `index`) identity and from the NFS `Vfs`
//! trait to [`Backend`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{
    Backend, BackendCaps, LookupMode, LookupResult, NodeKind, OpenMode, ReadOutcome, WriteOutcome,
};
use crate::error::{Result, Status};
use crate::triplet::BackendHandle;

const ROOT_INDEX: u64 = 1;

enum Kind {
    Directory(BTreeMap<String, u64>),
    Regular(Vec<u8>),
}

struct Entry {
    kind: Kind,
    /// Set once the entry has been unlinked from every directory; a
    /// `DESTROY` for an entry in this state actually reclaims storage.
    /// An entry still reachable via some directory is kept alive by
    /// `destroy` (spec §4.2: `DESTROY` reflects the broker's reference
    /// count, not the filesystem's link count).
    linked: bool,
}

struct State {
    entries: BTreeMap<u64, Entry>,
    next_index: u64,
}

impl State {
    fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT_INDEX, Entry { kind: Kind::Directory(BTreeMap::new()), linked: true });
        Self { entries, next_index: ROOT_INDEX + 1 }
    }

    fn allocate(&mut self, kind: Kind) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.entries.insert(index, Entry { kind, linked: true });
        index
    }
}

/// A single in-memory filesystem instance. Every call is addressed with
/// `service_id` for API parity with [`Backend`], but a given instance only
/// ever serves one `service_id`/`index` namespace.
pub struct InMemoryBackend {
    state: Mutex<State>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::new()) }
    }

    fn size_of(entry: &Entry) -> u64 {
        match &entry.kind {
            Kind::Directory(children) => children.len() as u64,
            Kind::Regular(data) => data.len() as u64,
        }
    }

    fn kind_of(entry: &Entry) -> NodeKind {
        match &entry.kind {
            Kind::Directory(_) => NodeKind::Directory,
            Kind::Regular(_) => NodeKind::Regular,
        }
    }

    fn result_for(index: u64, entry: &Entry) -> LookupResult {
        LookupResult {
            triplet: crate::triplet::Triplet::new(BackendHandle(0), 0, index),
            size: Self::size_of(entry),
            kind: Self::kind_of(entry),
        }
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn mounted(&self, _service_id: u64, _options: &str) -> Result<LookupResult> {
        let state = self.state.lock().unwrap();
        let root = state.entries.get(&ROOT_INDEX).expect("root always present");
        Ok(Self::result_for(ROOT_INDEX, root))
    }

    async fn mount(
        &self,
        _service_id: u64,
        mountpoint_index: u64,
        _child_backend: BackendHandle,
        _child_service: u64,
        _options: &str,
    ) -> Result<()> {
        let state = self.state.lock().unwrap();
        match state.entries.get(&mountpoint_index).map(Self::kind_of) {
            Some(NodeKind::Directory) => Ok(()),
            Some(_) => Err(Status::EInval),
            None => Err(Status::ENoEnt),
        }
    }

    async fn unmount(&self, _service_id: u64, mountpoint_index: u64) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.entries.contains_key(&mountpoint_index) {
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
        let mut state = self.state.lock().unwrap();

        if name == "." {
            let entry = state.entries.get(&parent_index).ok_or(Status::ENoEnt)?;
            return Ok(Self::result_for(parent_index, entry));
        }

        match state.entries.get(&parent_index).map(Self::kind_of) {
            Some(NodeKind::Directory) => {}
            Some(_) => return Err(Status::EInval),
            None => return Err(Status::ENoEnt),
        }

        let existing = match &state.entries.get(&parent_index).unwrap().kind {
            Kind::Directory(children) => children.get(name).copied(),
            _ => unreachable!("checked above"),
        };

        if let Some(index) = existing {
            if mode.exclusive {
                return Err(Status::EExist);
            }
            if mode.unlink {
                if let Kind::Directory(children) = &mut state.entries.get_mut(&parent_index).unwrap().kind {
                    children.remove(name);
                }
                if let Some(entry) = state.entries.get_mut(&index) {
                    entry.linked = false;
                }
                let entry = state.entries.get(&index).unwrap();
                return Ok(Self::result_for(index, entry));
            }
            let entry = state.entries.get(&index).unwrap();
            if let Some(required) = mode.require {
                if Self::kind_of(entry) != required {
                    return Err(Status::EInval);
                }
            }
            return Ok(Self::result_for(index, entry));
        }

        if mode.unlink {
            return Err(Status::ENoEnt);
        }
        if !mode.create {
            return Err(Status::ENoEnt);
        }

        let kind = match mode.require {
            Some(NodeKind::Directory) => Kind::Directory(BTreeMap::new()),
            _ => Kind::Regular(Vec::new()),
        };
        let index = state.allocate(kind);
        if let Kind::Directory(children) = &mut state.entries.get_mut(&parent_index).unwrap().kind {
            children.insert(name.to_string(), index);
        }
        let entry = state.entries.get(&index).unwrap();
        Ok(Self::result_for(index, entry))
    }

    async fn open_node(&self, _service_id: u64, index: u64, _mode: OpenMode) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.entries.contains_key(&index) {
            Ok(())
        } else {
            Err(Status::ENoEnt)
        }
    }

    async fn read(&self, _service_id: u64, index: u64, offset: u64, count: u32) -> Result<ReadOutcome> {
        let state = self.state.lock().unwrap();
        let entry = state.entries.get(&index).ok_or(Status::ENoEnt)?;
        let data = match &entry.kind {
            Kind::Regular(data) => data,
            Kind::Directory(_) => return Err(Status::EInval),
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(ReadOutcome { data: Vec::new() });
        }
        let end = (offset + count as usize).min(data.len());
        Ok(ReadOutcome { data: data[offset..end].to_vec() })
    }

    async fn write(&self, _service_id: u64, index: u64, offset: u64, data: &[u8]) -> Result<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.get_mut(&index).ok_or(Status::ENoEnt)?;
        let buffer = match &mut entry.kind {
            Kind::Regular(buffer) => buffer,
            Kind::Directory(_) => return Err(Status::EInval),
        };
        let offset = offset as usize;
        let end = offset + data.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[offset..end].copy_from_slice(data);
        Ok(WriteOutcome { written: data.len() as u32, new_size: Some(buffer.len() as u64) })
    }

    async fn truncate(&self, _service_id: u64, index: u64, new_size: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.get_mut(&index).ok_or(Status::ENoEnt)?;
        match &mut entry.kind {
            Kind::Regular(buffer) => {
                buffer.resize(new_size as usize, 0);
                Ok(())
            }
            Kind::Directory(_) => Err(Status::EInval),
        }
    }

    async fn sync(&self, _service_id: u64, index: u64) -> Result<()> {
        let state = self.state.lock().unwrap();
        if state.entries.contains_key(&index) {
            Ok(())
        } else {
            Err(Status::ENoEnt)
        }
    }

    async fn stat(&self, _service_id: u64, index: u64) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let entry = state.entries.get(&index).ok_or(Status::ENoEnt)?;
        let size = Self::size_of(entry);
        let kind = match Self::kind_of(entry) {
            NodeKind::Directory => 0u8,
            NodeKind::Regular => 1u8,
            NodeKind::Other => 2u8,
        };
        let mut out = vec![kind];
        out.extend_from_slice(&size.to_le_bytes());
        Ok(out)
    }

    async fn destroy(&self, _service_id: u64, index: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get(&index) {
            if !entry.linked {
                state.entries.remove(&index);
            }
        }
    }

    async fn link(&self, _service_id: u64, new_parent_index: u64, new_name: &str, target_index: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.entries.contains_key(&target_index) {
            return Err(Status::ENoEnt);
        }
        {
            let parent = state.entries.get_mut(&new_parent_index).ok_or(Status::ENoEnt)?;
            match &mut parent.kind {
                Kind::Directory(children) => {
                    if children.contains_key(new_name) {
                        return Err(Status::EExist);
                    }
                    children.insert(new_name.to_string(), target_index);
                }
                Kind::Regular(_) => return Err(Status::EInval),
            }
        }
        state.entries.get_mut(&target_index).expect("checked above").linked = true;
        Ok(())
    }

    fn capabilities(&self) -> BackendCaps {
        BackendCaps::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_read_back_directory_entry() {
        let backend = InMemoryBackend::new();
        let mode = LookupMode { create: true, require: Some(NodeKind::Regular), ..Default::default() };
        let created = backend.lookup(0, ROOT_INDEX, "a", mode).await.unwrap();
        assert_eq!(created.kind, NodeKind::Regular);

        let found = backend.lookup(0, ROOT_INDEX, "a", LookupMode::default()).await.unwrap();
        assert_eq!(found.triplet, created.triplet);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let backend = InMemoryBackend::new();
        let mode = LookupMode { create: true, require: Some(NodeKind::Regular), ..Default::default() };
        let file = backend.lookup(0, ROOT_INDEX, "a", mode).await.unwrap();
        let outcome = backend.write(0, file.triplet.index, 0, b"hello").await.unwrap();
        assert_eq!(outcome.written, 5);
        assert_eq!(outcome.new_size, Some(5));
        let read = backend.read(0, file.triplet.index, 0, 5).await.unwrap();
        assert_eq!(read.data, b"hello");
    }

    #[tokio::test]
    async fn unlink_then_destroy_reclaims_storage() {
        let backend = InMemoryBackend::new();
        let mode = LookupMode { create: true, require: Some(NodeKind::Regular), ..Default::default() };
        let file = backend.lookup(0, ROOT_INDEX, "a", mode).await.unwrap();
        let unlink_mode = LookupMode { unlink: true, ..Default::default() };
        backend.lookup(0, ROOT_INDEX, "a", unlink_mode).await.unwrap();
        backend.destroy(0, file.triplet.index).await;
        let err = backend.sync(0, file.triplet.index).await.unwrap_err();
        assert_eq!(err, Status::ENoEnt);
    }

    #[tokio::test]
    async fn exclusive_create_on_existing_fails() {
        let backend = InMemoryBackend::new();
        let mode = LookupMode { create: true, require: Some(NodeKind::Regular), ..Default::default() };
        backend.lookup(0, ROOT_INDEX, "a", mode).await.unwrap();
        let exclusive = LookupMode { create: true, exclusive: true, require: Some(NodeKind::Regular), ..Default::default() };
        let err = backend.lookup(0, ROOT_INDEX, "a", exclusive).await.unwrap_err();
        assert_eq!(err, Status::EExist);
    }

    #[tokio::test]
    async fn link_creates_second_directory_entry() {
        let backend = InMemoryBackend::new();
        let mode = LookupMode { create: true, require: Some(NodeKind::Regular), ..Default::default() };
        let file = backend.lookup(0, ROOT_INDEX, "a", mode).await.unwrap();
        backend.link(0, ROOT_INDEX, "b", file.triplet.index).await.unwrap();
        let found = backend.lookup(0, ROOT_INDEX, "b", LookupMode::default()).await.unwrap();
        assert_eq!(found.triplet, file.triplet);
    }
}
