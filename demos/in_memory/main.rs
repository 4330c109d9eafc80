//! Stands up a `Namespace` backed by the in-memory reference backend,
//! mounts it at `/`, and drives a couple of operations end to end.
//!
//! Grounded on the teacher's `examples/in_memory/filesystem.rs`, which
//! demoed `InMemoryVfs` the same way: construct it, exercise it, print
//! what happened.

use std::sync::Arc;

use vfs_broker::backends::memory::InMemoryBackend;
use vfs_broker::dispatcher::Dispatcher;
use vfs_broker::namespace::Namespace;
use vfs_broker::resolver::WalkFlags;

#[tokio::main]
async fn main() {
    let namespace = Arc::new(Namespace::new());
    let backend: Arc<dyn vfs_broker::backend::Backend> = Arc::new(InMemoryBackend::new());
    let handle = namespace.register_backend("tmpfs", 0, backend.clone()).await;
    namespace.mount("/", handle, backend, 0, 0, "tmpfs", "").await.expect("root mount");

    let dispatcher = Dispatcher::new(namespace);
    let root_fd = dispatcher.walk(-1, "/", WalkFlags::empty()).await.expect("walk root");
    let file_fd = dispatcher
        .walk(root_fd, "hello.txt", WalkFlags::FILE | WalkFlags::CREATE)
        .await
        .expect("walk create");
    dispatcher.open(file_fd, vfs_broker::backend::OpenMode { read: true, write: true, append: false }).await.expect("open");
    let (written, _) = dispatcher.write(file_fd, b"hello from the in-memory backend\n").await.expect("write");
    dispatcher.seek(file_fd, 0, vfs_broker::dispatcher::Whence::Set).await.expect("seek");
    let data = dispatcher.read(file_fd, written).await.expect("read");
    println!("wrote {written} bytes, read back: {}", String::from_utf8_lossy(&data));
}
