//! VFS node representation and the node cache (spec §3, §4.2).
//!
//! Grounded on the teacher's `examples/shadow_fs/fs/state.rs` `State` table
//! (an id-keyed map plus a reverse index) generalized from path-keyed
//! identity to triplet-keyed identity, and backed by `dashmap` (as the
//! teacher's own later manifest revision under `mamont/Cargo.toml` already
//! depends on) instead of a single `tokio::sync::Mutex<HashMap<..>>` so
//! unrelated triplets don't contend on the same lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::backend::{LookupResult, NodeKind};
use crate::error::{Result, Status};
use crate::triplet::{BackendHandle, Triplet};

/// Size and mount-point back-link guarded by the per-node contents rwlock
/// (spec §3: "content-contents rwlock guarding its cached size and
/// serialising content-mutating operations against size-reading
/// operations").
#[derive(Debug)]
pub struct NodeContents {
    pub size: u64,
}

/// The broker's in-memory handle for a triplet (spec §3).
///
/// Invariant upheld by [`NodeCache`]: at most one `Node` per live triplet
/// exists in the cache at any moment.
#[derive(Debug)]
pub struct Node {
    pub triplet: Triplet,
    pub kind: NodeKind,
    refcount: AtomicU64,
    contents: RwLock<NodeContents>,
}

impl Node {
    fn new(triplet: Triplet, kind: NodeKind, size: u64) -> Arc<Self> {
        Arc::new(Self {
            triplet,
            kind,
            refcount: AtomicU64::new(1),
            contents: RwLock::new(NodeContents { size }),
        })
    }

    /// Shared access to the node's cached size / mount back-link.
    pub fn contents(&self) -> &RwLock<NodeContents> {
        &self.contents
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.load(Ordering::Acquire)
    }
}

/// Interns backend nodes keyed by `(backend, service, index)`; maintains
/// reference counts and per-node content locks (spec §4.2).
#[derive(Default)]
pub struct NodeCache {
    nodes: DashMap<Triplet, Arc<Node>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }

    /// Intern by triplet: if present, increments refcount and returns it;
    /// if absent, installs a new node carrying one reference and the
    /// backend-reported size and type.
    pub fn get(&self, lookup: LookupResult) -> Arc<Node> {
        // `entry` makes the increment-or-insert atomic under dashmap's
        // per-shard lock, so two tasks racing to intern the same triplet
        // can't both believe they created it.
        self.nodes
            .entry(lookup.triplet)
            .and_modify(|n| {
                n.refcount.fetch_add(1, Ordering::AcqRel);
            })
            .or_insert_with(|| Node::new(lookup.triplet, lookup.kind, lookup.size))
            .clone()
    }

    /// Decrement refcount; at zero, remove from cache and fire a `DESTROY`
    /// at the backend for the triplet. The `DESTROY` reply is not awaited
    /// (spec §4.2), but is only ever sent after the removal is committed so
    /// it is ordered after the last user of the node.
    pub fn put(&self, node: Arc<Node>, backend: Arc<dyn crate::backend::Backend>) {
        let triplet = node.triplet;
        let previous = node.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous >= 1, "node refcount underflow for {triplet:?}");
        if previous != 1 {
            return;
        }
        // Only remove if nobody raced in a fresh `get` between the
        // decrement above and this removal.
        let removed = self
            .nodes
            .remove_if(&triplet, |_, cached| Arc::ptr_eq(cached, &node) && cached.refcount() == 0);
        if removed.is_some() {
            tokio::spawn(async move {
                backend.destroy(triplet.service_id, triplet.index).await;
            });
        }
    }

    /// Remove from cache and drop the reference without notifying the
    /// backend; used exclusively when the backend has already been told to
    /// unmount the whole subtree (spec §4.2, `UNMOUNTED`).
    pub fn forget(&self, node: &Arc<Node>) {
        node.refcount.fetch_sub(1, Ordering::AcqRel);
        self.nodes.remove_if(&node.triplet, |_, cached| Arc::ptr_eq(cached, node));
    }

    /// Look up a cached node by triplet without adjusting its refcount.
    pub fn peek(&self, triplet: Triplet) -> Option<Arc<Node>> {
        self.nodes.get(&triplet).map(|entry| entry.clone())
    }

    /// Sum of refcounts for all cached nodes belonging to a specific
    /// mounted filesystem, used to decide whether an unmount is safe
    /// (spec §4.3: expected sum is 2 once the unmount check itself has
    /// taken a reference — the mount reference plus that just-taken one).
    pub fn refcount_sum(&self, backend: BackendHandle, service_id: u64) -> u64 {
        self.nodes
            .iter()
            .filter(|entry| {
                entry.key().backend == backend && entry.key().service_id == service_id
            })
            .map(|entry| entry.refcount())
            .sum()
    }

    /// Number of distinct triplets currently interned (test/debug helper).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Set a node's cached size under the write-mode contents lock. Used after
/// a `WRITE`/`TRUNCATE` reply that carries a new size (spec §4.6).
pub async fn latch_size(node: &Node, size: u64) {
    let mut contents = node.contents.write().await;
    contents.size = size;
}

/// Read a node's cached size under the read-mode contents lock.
pub async fn read_size(node: &Node) -> u64 {
    node.contents.read().await.size
}

/// Helper used by the resolver/dispatcher to reject invalid node-kind
/// expectations uniformly.
pub fn require_kind(kind: NodeKind, expected: Option<NodeKind>) -> Result<()> {
    match expected {
        Some(want) if want != kind => Err(Status::EInval),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registry::BackendRegistry;
    use crate::backend::*;
    use std::sync::Arc;

    struct NullBackend;

    #[async_trait::async_trait]
    impl Backend for NullBackend {
        async fn mounted(&self, _: u64, _: &str) -> Result<LookupResult> {
            unreachable!()
        }
        async fn mount(&self, _: u64, _: u64, _: BackendHandle, _: u64, _: &str) -> Result<()> {
            unreachable!()
        }
        async fn unmount(&self, _: u64, _: u64) -> Result<()> {
            unreachable!()
        }
        async fn unmounted(&self, _: u64) -> Result<()> {
            unreachable!()
        }
        async fn lookup(&self, _: u64, _: u64, _: &str, _: LookupMode) -> Result<LookupResult> {
            unreachable!()
        }
        async fn open_node(&self, _: u64, _: u64, _: OpenMode) -> Result<()> {
            unreachable!()
        }
        async fn read(&self, _: u64, _: u64, _: u64, _: u32) -> Result<ReadOutcome> {
            unreachable!()
        }
        async fn write(&self, _: u64, _: u64, _: u64, _: &[u8]) -> Result<WriteOutcome> {
            unreachable!()
        }
        async fn truncate(&self, _: u64, _: u64, _: u64) -> Result<()> {
            unreachable!()
        }
        async fn sync(&self, _: u64, _: u64) -> Result<()> {
            unreachable!()
        }
        async fn stat(&self, _: u64, _: u64) -> Result<Vec<u8>> {
            unreachable!()
        }
        async fn destroy(&self, _: u64, _: u64) {}
        async fn link(&self, _: u64, _: u64, _: &str, _: u64) -> Result<()> {
            unreachable!()
        }
        fn capabilities(&self) -> BackendCaps {
            BackendCaps::default()
        }
    }

    fn lookup(triplet: Triplet) -> LookupResult {
        LookupResult { triplet, size: 0, kind: NodeKind::Regular }
    }

    #[test]
    fn get_interns_uniquely_per_triplet() {
        let cache = NodeCache::new();
        let triplet = Triplet::new(BackendHandle(1), 0, 1);
        let a = cache.get(lookup(triplet));
        let b = cache.get(lookup(triplet));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.refcount(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn put_to_zero_removes_and_destroys() {
        let cache = NodeCache::new();
        let _registry = BackendRegistry::new();
        let backend: Arc<dyn Backend> = Arc::new(NullBackend);
        let triplet = Triplet::new(BackendHandle(1), 0, 1);
        let node = cache.get(lookup(triplet));
        cache.put(node, backend);
        // allow the fire-and-forget destroy task to run
        tokio::task::yield_now().await;
        assert!(cache.is_empty());
    }

    #[test]
    fn forget_drops_without_destroy() {
        let cache = NodeCache::new();
        let triplet = Triplet::new(BackendHandle(1), 0, 1);
        let node = cache.get(lookup(triplet));
        cache.forget(&node);
        assert!(cache.is_empty());
    }

    #[test]
    fn refcount_sum_scopes_to_backend_and_service() {
        let cache = NodeCache::new();
        let backend = BackendHandle(1);
        let a = Triplet::new(backend, 7, 1);
        let b = Triplet::new(backend, 7, 2);
        let other = Triplet::new(backend, 8, 1);
        cache.get(lookup(a));
        cache.get(lookup(b));
        cache.get(lookup(other));
        assert_eq!(cache.refcount_sum(backend, 7), 2);
    }
}
