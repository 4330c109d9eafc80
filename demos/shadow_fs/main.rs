//! Mirrors a real directory with the host-filesystem-shadow backend and
//! drives a couple of operations through it.
//!
//! Grounded on the teacher's `examples/shadow_fs/main.rs`, which took a
//! directory argument and printed the resolved root path.

use std::env;
use std::sync::Arc;

use vfs_broker::backends::shadow::ShadowBackend;
use vfs_broker::dispatcher::Dispatcher;
use vfs_broker::namespace::Namespace;
use vfs_broker::resolver::WalkFlags;

#[tokio::main]
async fn main() {
    let path = env::args().nth(1).expect("must supply directory to mirror");

    let namespace = Arc::new(Namespace::new());
    let backend: Arc<dyn vfs_broker::backend::Backend> = Arc::new(ShadowBackend::new(&path));
    let handle = namespace.register_backend("shadow", 0, backend.clone()).await;
    namespace.mount("/", handle, backend, 0, 0, "shadow", "").await.expect("root mount");

    println!("shadow backend rooted at {path:?}");

    let dispatcher = Dispatcher::new(namespace);
    let root_fd = dispatcher.walk(-1, "/", WalkFlags::empty()).await.expect("walk root");
    dispatcher.open(root_fd, vfs_broker::backend::OpenMode { read: true, write: false, append: false }).await.expect("open root");
    println!("root fd: {root_fd}");
}
