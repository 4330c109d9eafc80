//! End-to-end scenarios against the real `Namespace`/`Dispatcher` stack
//! over the in-memory and shadow reference backends (spec §8).

use std::sync::Arc;

use vfs_broker::backend::{Backend, OpenMode};
use vfs_broker::backends::memory::InMemoryBackend;
use vfs_broker::backends::shadow::ShadowBackend;
use vfs_broker::dispatcher::{Dispatcher, Whence};
use vfs_broker::error::Status;
use vfs_broker::namespace::Namespace;
use vfs_broker::resolver::WalkFlags;

async fn mount_in_memory_root() -> Dispatcher {
    let namespace = Arc::new(Namespace::new());
    let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
    let handle = namespace.register_backend("tmpfs", 0, backend.clone()).await;
    namespace.mount("/", handle, backend, 0, 0, "tmpfs", "").await.unwrap();
    Dispatcher::new(namespace)
}

// S1: root mount, then WALK("/") returns a descriptor over the backend's
// reported root triplet.
#[tokio::test]
async fn s1_root_mount_then_walk_root() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/", WalkFlags::empty()).await.unwrap();
    assert_eq!(fd, 0);
    let root = dispatcher.namespace.read_root().await.unwrap();
    let slot = dispatcher.descriptors.get(fd).await.unwrap();
    assert_eq!(slot.lock().await.node.triplet, root);
}

// S2: unmount fails EBUSY while a descriptor over the root is open; CLOSE
// then UNMOUNT succeeds.
#[tokio::test]
async fn s2_unmount_busy_then_succeeds_after_close() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/", WalkFlags::empty()).await.unwrap();

    let err = dispatcher.namespace.unmount("/").await.unwrap_err();
    assert_eq!(err, Status::EBusy);

    dispatcher.close(fd).await.unwrap();
    dispatcher.namespace.unmount("/").await.unwrap();
    assert_eq!(dispatcher.namespace.read_root().await.unwrap_err(), Status::ENoEnt);
}

// S3: mount stacking — a child mount at "/m" serves its own lookups, and
// an open descriptor under it keeps the child mount busy.
#[tokio::test]
async fn s3_mount_stacking_and_busy_child() {
    let dispatcher = mount_in_memory_root().await;

    let mp_fd = dispatcher.walk(-1, "/m", WalkFlags::CREATE | WalkFlags::DIRECTORY).await.unwrap();
    dispatcher.close(mp_fd).await.unwrap();

    let child_backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
    let child_handle = dispatcher.namespace.register_backend("tmpfs", 1, child_backend.clone()).await;
    dispatcher.namespace.mount("/m", child_handle, child_backend, 0, 1, "tmpfs", "").await.unwrap();

    let file_fd = dispatcher
        .walk(-1, "/m/x", WalkFlags::CREATE | WalkFlags::FILE)
        .await
        .unwrap();
    let slot = dispatcher.descriptors.get(file_fd).await.unwrap();
    assert_eq!(slot.lock().await.node.triplet.backend, child_handle);
    drop(slot);

    let err = dispatcher.namespace.unmount("/m").await.unwrap_err();
    assert_eq!(err, Status::EBusy);

    dispatcher.close(file_fd).await.unwrap();
    dispatcher.namespace.unmount("/m").await.unwrap();
}

// S4: rename is an atomic replace — "/a" takes "/b"'s name, "/a" is gone,
// and the old "/b" node is destroyed by the backend.
#[tokio::test]
async fn s4_rename_replaces_destination() {
    let dispatcher = mount_in_memory_root().await;

    let a_fd = dispatcher.walk(-1, "/a", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    let a_triplet = dispatcher.descriptors.get(a_fd).await.unwrap().lock().await.node.triplet;
    dispatcher.close(a_fd).await.unwrap();

    let b_fd = dispatcher.walk(-1, "/b", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    dispatcher.close(b_fd).await.unwrap();

    dispatcher.rename(-1, "/a", "/b").await.unwrap();

    let err = dispatcher.walk(-1, "/a", WalkFlags::empty()).await.unwrap_err();
    assert_eq!(err, Status::ENoEnt);

    let renamed_fd = dispatcher.walk(-1, "/b", WalkFlags::empty()).await.unwrap();
    let renamed_triplet = dispatcher.descriptors.get(renamed_fd).await.unwrap().lock().await.node.triplet;
    assert_eq!(renamed_triplet, a_triplet);
    dispatcher.close(renamed_fd).await.unwrap();
}

// S5: seeking past the start from SEEK_END overflows rather than wrapping,
// and leaves the descriptor's position untouched.
#[tokio::test]
async fn s5_seek_underflow_is_overflow_error() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/f", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    dispatcher.open(fd, OpenMode { read: true, write: true, append: false }).await.unwrap();
    dispatcher.write(fd, &[0u8; 10]).await.unwrap();
    dispatcher.seek(fd, 0, Whence::Set).await.unwrap();

    let err = dispatcher.seek(fd, -20, Whence::End).await.unwrap_err();
    assert_eq!(err, Status::EOverflow);

    let slot = dispatcher.descriptors.get(fd).await.unwrap();
    assert_eq!(slot.lock().await.position, 0);
}

// S6: renaming a path onto its own descendant is rejected before touching
// the namespace.
#[tokio::test]
async fn s6_rename_onto_own_prefix_is_einval() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/a", WalkFlags::CREATE | WalkFlags::DIRECTORY).await.unwrap();
    dispatcher.close(fd).await.unwrap();

    let err = dispatcher.rename(-1, "/a", "/a/b").await.unwrap_err();
    assert_eq!(err, Status::EInval);

    // Namespace was left untouched: "/a" still resolves to a directory.
    let fd = dispatcher.walk(-1, "/a", WalkFlags::DIRECTORY).await.unwrap();
    dispatcher.close(fd).await.unwrap();
}

// Invariant 6/7: write-then-read and SEEK round trip.
#[tokio::test]
async fn write_then_read_round_trips_through_dispatcher() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/f", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    dispatcher.open(fd, OpenMode { read: true, write: true, append: false }).await.unwrap();

    let (written, new_size) = dispatcher.write(fd, b"hello world").await.unwrap();
    assert_eq!(written, 11);
    assert_eq!(new_size, Some(11));

    dispatcher.seek(fd, 0, Whence::Set).await.unwrap();
    let data = dispatcher.read(fd, 11).await.unwrap();
    assert_eq!(data, b"hello world");

    let pos = dispatcher.seek(fd, 0, Whence::Cur).await.unwrap();
    assert_eq!(pos, 11);
}

// Invariant 8: unmounting with an open descriptor is refused, and the
// mount/nodes are left intact (a later close + unmount still works).
#[tokio::test]
async fn unmount_safety_leaves_mount_intact_when_busy() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/a", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();

    assert_eq!(dispatcher.namespace.unmount("/").await.unwrap_err(), Status::EBusy);

    // The mount is still there and the node still resolves.
    let probe_fd = dispatcher.walk(-1, "/a", WalkFlags::empty()).await.unwrap();
    dispatcher.close(probe_fd).await.unwrap();
    dispatcher.close(fd).await.unwrap();
    dispatcher.namespace.unmount("/").await.unwrap();
}

// Refcount conservation / node cache uniqueness across dup + close.
#[tokio::test]
async fn dup_shares_node_and_refcount_drops_after_both_close() {
    let dispatcher = mount_in_memory_root().await;
    let fd = dispatcher.walk(-1, "/a", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    let dup_fd = dispatcher.dup(fd, 10).await.unwrap();
    assert_eq!(dup_fd, 10);

    let first = dispatcher.descriptors.get(fd).await.unwrap().lock().await.node.triplet;
    let second = dispatcher.descriptors.get(dup_fd).await.unwrap().lock().await.node.triplet;
    assert_eq!(first, second);

    dispatcher.close(fd).await.unwrap();
    dispatcher.close(dup_fd).await.unwrap();

    // The node can still be reached fresh afterwards.
    let fd = dispatcher.walk(-1, "/a", WalkFlags::empty()).await.unwrap();
    dispatcher.close(fd).await.unwrap();
}

// The shadow backend drives the same scenario against a real directory on
// disk, exercising rename's orphan-park-then-link path end to end.
#[tokio::test]
async fn shadow_backend_rename_replace_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let namespace = Arc::new(Namespace::new());
    let backend: Arc<dyn Backend> = Arc::new(ShadowBackend::new(dir.path()));
    let handle = namespace.register_backend("shadow", 0, backend.clone()).await;
    namespace.mount("/", handle, backend, 0, 0, "shadow", "").await.unwrap();
    let dispatcher = Dispatcher::new(namespace);

    let a_fd = dispatcher.walk(-1, "/a", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    dispatcher.open(a_fd, OpenMode { read: true, write: true, append: false }).await.unwrap();
    dispatcher.write(a_fd, b"from a").await.unwrap();
    dispatcher.close(a_fd).await.unwrap();

    let b_fd = dispatcher.walk(-1, "/b", WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
    dispatcher.close(b_fd).await.unwrap();

    dispatcher.rename(-1, "/a", "/b").await.unwrap();
    assert_eq!(dispatcher.walk(-1, "/a", WalkFlags::empty()).await.unwrap_err(), Status::ENoEnt);

    let b_fd = dispatcher.walk(-1, "/b", WalkFlags::empty()).await.unwrap();
    dispatcher.open(b_fd, OpenMode { read: true, write: false, append: false }).await.unwrap();
    let data = dispatcher.read(b_fd, 64).await.unwrap();
    assert_eq!(data, b"from a");
    dispatcher.close(b_fd).await.unwrap();
}

// Lock-order / concurrency smoke test: many concurrent walks+writes on
// distinct paths under one mount never deadlock or corrupt the namespace.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_do_not_deadlock_or_collide() {
    let dispatcher = Arc::new(mount_in_memory_root().await);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            let path = format!("/f{i}");
            let fd = dispatcher.walk(-1, &path, WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
            dispatcher.open(fd, OpenMode { read: true, write: true, append: false }).await.unwrap();
            dispatcher.write(fd, format!("payload-{i}").as_bytes()).await.unwrap();
            dispatcher.close(fd).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..16 {
        let path = format!("/f{i}");
        let fd = dispatcher.walk(-1, &path, WalkFlags::FILE).await.unwrap();
        dispatcher.open(fd, OpenMode { read: true, write: false, append: false }).await.unwrap();
        let data = dispatcher.read(fd, 64).await.unwrap();
        assert_eq!(data, format!("payload-{i}").as_bytes());
        dispatcher.close(fd).await.unwrap();
    }
    assert!(matches!(dispatcher.descriptors.get(0).await, Err(Status::EBadF)));
}

// Two renames racing to displace the same destination name must not
// interleave: the namespace write-lock (spec §5) serializes them, so
// exactly one of the two source files ends up reachable at the shared
// destination and the other is a clean ENOENT — never a torn state where
// both or neither resolve.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_renames_onto_same_destination_do_not_interleave() {
    let dispatcher = Arc::new(mount_in_memory_root().await);

    for name in ["/a", "/b", "/dest"] {
        let fd = dispatcher.walk(-1, name, WalkFlags::CREATE | WalkFlags::FILE).await.unwrap();
        dispatcher.close(fd).await.unwrap();
    }

    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.rename(-1, "/a", "/dest").await })
    };
    let second = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.rename(-1, "/b", "/dest").await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // Both sources are gone...
    assert_eq!(dispatcher.walk(-1, "/a", WalkFlags::empty()).await.unwrap_err(), Status::ENoEnt);
    assert_eq!(dispatcher.walk(-1, "/b", WalkFlags::empty()).await.unwrap_err(), Status::ENoEnt);

    // ...and exactly one ends up reachable at "/dest" (the one that ran
    // second, since each rename unconditionally displaces whatever it
    // finds there).
    let fd = dispatcher.walk(-1, "/dest", WalkFlags::empty()).await.unwrap();
    dispatcher.close(fd).await.unwrap();
}
