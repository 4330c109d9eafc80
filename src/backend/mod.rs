//! The backend request surface (spec §6) and the [`Backend`] trait the
//! broker dispatches it through.
//!
//! A backend is a separate file-system server the broker never talks to
//! directly on the wire — spec.md §1 keeps the actual IPC transport and
//! backend processes out of scope, describing them only as "addressed
//! through an opaque request channel". We model that channel as an
//! `async_trait` object (`Arc<dyn Backend>`), the same shape the teacher
//! crate uses for its own `vfs::Vfs` backend abstraction: one async method
//! per wire request, `Result<T, Status>` returns, no backend-specific
//! generic parameters leaking into the namespace core.
//!
//! Simplification note (see `DESIGN.md`): spec §4.3's mount protocol has the
//! broker splice the child backend's exchange into the parent's so the
//! parent can talk to the child directly without the broker re-entering its
//! own locks. That detail concerns the out-of-scope low-level IPC transport
//! (§1), not the namespace core, so this trait exposes the mount step as
//! two direct broker-to-backend calls ([`Backend::mounted`] against the
//! child, [`Backend::mount`] against the parent) with the same observable
//! effect: both backends learn about the mount, and the broker ends up
//! holding the child root's [`LookupResult`].

pub mod registry;

use async_trait::async_trait;

use crate::error::Status;
use crate::triplet::Triplet;

/// Kind of a node, as reported by a backend (spec §3).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    Regular,
    Other,
}

/// Result of a lookup: `(triplet, size, type)` (spec §3 "Lookup result").
/// Transient — the broker never caches this directly, only the [`Triplet`]
/// and `kind`/`size` it uses to populate a [`crate::node::Node`].
#[derive(Debug, Copy, Clone)]
pub struct LookupResult {
    pub triplet: Triplet,
    pub size: u64,
    pub kind: NodeKind,
}

/// Per-component lookup semantics passed into [`Backend::lookup`]. The
/// resolver (`src/resolver.rs`) only ever sets these on the *terminal*
/// component of a walk; intermediate components always look up with
/// every field at its default.
#[derive(Debug, Copy, Clone, Default)]
pub struct LookupMode {
    /// Create the entry if it does not exist.
    pub create: bool,
    /// Fail with `EEXIST` if the entry already exists (requires `create`).
    pub exclusive: bool,
    /// Remove the directory entry for this name as part of resolving it.
    pub unlink: bool,
    /// If `Some`, require the resolved (or newly created) entry to be this
    /// kind of node; `None` means no constraint.
    pub require: Option<NodeKind>,
}

/// Read/write/append access bits latched into a descriptor by `OPEN_NODE`
/// (spec §4.6 `open`; spec §3 "opened further refines into ... appending").
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    /// Writes first set `position := node.size` before issuing the backend
    /// write (spec §4.6 "append").
    pub append: bool,
}

/// Result of a `READ` backend call.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub data: Vec<u8>,
}

/// Result of a `WRITE` backend call. `new_size` is `Some` only when the
/// write may have changed the file's size (spec §4.6: "reply contains byte
/// count and, for writes that may change size, the new size").
#[derive(Debug, Copy, Clone)]
pub struct WriteOutcome {
    pub written: u32,
    pub new_size: Option<u64>,
}

/// Static capability flags a backend advertises once, consulted by the
/// dispatcher to pick the node contents lock mode (spec §4.6).
#[derive(Debug, Copy, Clone, Default)]
pub struct BackendCaps {
    /// The backend allows concurrent readers and writers on the same node.
    pub concurrent_rw: bool,
    /// Writes on this backend never change a file's size (e.g. a raw block
    /// device). Combined with `concurrent_rw`, writes can share the node's
    /// read-mode contents lock instead of taking the write mode.
    pub write_retains_size: bool,
}

/// The backend request surface (spec §6), issued by the broker and replied
/// to by the backend. Every call is addressed by `(service_id, index)`
/// unless it concerns the filesystem as a whole.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `MOUNTED` — install this backend's filesystem as a mount root.
    /// `options` is the mount-point's data-write phase payload (spec §4.3
    /// step 1).
    async fn mounted(&self, service_id: u64, options: &str) -> Result<LookupResult, Status>;

    /// `MOUNT` — tell the *parent* backend that a child filesystem is now
    /// overlaid at `(service_id, mountpoint_index)`.
    async fn mount(
        &self,
        service_id: u64,
        mountpoint_index: u64,
        child_backend: crate::triplet::BackendHandle,
        child_service: u64,
        options: &str,
    ) -> Result<(), Status>;

    /// `UNMOUNT` — tell the parent backend a mount at `(service_id,
    /// mountpoint_index)` is gone.
    async fn unmount(&self, service_id: u64, mountpoint_index: u64) -> Result<(), Status>;

    /// `UNMOUNTED` — tell the (root) child backend its entire subtree is
    /// being torn down.
    async fn unmounted(&self, service_id: u64) -> Result<(), Status>;

    /// `LOOKUP` — resolve one path component under `(service_id,
    /// parent_index)`, optionally creating/unlinking/type-checking it per
    /// `mode` (see [`LookupMode`]).
    async fn lookup(
        &self,
        service_id: u64,
        parent_index: u64,
        name: &str,
        mode: LookupMode,
    ) -> Result<LookupResult, Status>;

    /// `OPEN_NODE` — validate and latch open mode bits for a node.
    async fn open_node(&self, service_id: u64, index: u64, mode: OpenMode) -> Result<(), Status>;

    /// `READ`.
    async fn read(
        &self,
        service_id: u64,
        index: u64,
        offset: u64,
        count: u32,
    ) -> Result<ReadOutcome, Status>;

    /// `WRITE`.
    async fn write(
        &self,
        service_id: u64,
        index: u64,
        offset: u64,
        data: &[u8],
    ) -> Result<WriteOutcome, Status>;

    /// `TRUNCATE`.
    async fn truncate(&self, service_id: u64, index: u64, new_size: u64) -> Result<(), Status>;

    /// `SYNC`.
    async fn sync(&self, service_id: u64, index: u64) -> Result<(), Status>;

    /// `STAT` — opaque attribute payload, forwarded verbatim to the client
    /// (spec §4.6: "`stat` uses forward routing so the backend can write
    /// the reply payload directly to the client buffer").
    async fn stat(&self, service_id: u64, index: u64) -> Result<Vec<u8>, Status>;

    /// `DESTROY` — fire-and-forget notification that the last broker
    /// reference to this node is gone (spec §4.2: "Reply ... is not
    /// awaited by the releasing path").
    async fn destroy(&self, service_id: u64, index: u64);

    /// `LINK` — create a new directory entry `new_name` under
    /// `(service_id, new_parent_index)` pointing at the existing node
    /// `target` (used by rename's atomic-replace step 3, spec §4.6).
    async fn link(
        &self,
        service_id: u64,
        new_parent_index: u64,
        new_name: &str,
        target_index: u64,
    ) -> Result<(), Status>;

    /// Static capability flags, consulted once per read/write (spec §4.6).
    fn capabilities(&self) -> BackendCaps;
}
