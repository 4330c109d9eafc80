//! Per-connection task split and `handle_forever` (spec §10.3).
//!
//! Grounded directly on the teacher's `lib.rs` + `read_task.rs` +
//! `vfs_task.rs` + `stream_writer.rs` — the same three-task shape (read →
//! dispatch → write), renamed to carry broker request/reply semantics
//! instead of NFS procedure semantics.

mod dispatch_task;
mod read_task;
mod write_task;

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::namespace::Namespace;
use crate::protocol::{Reply, Request};

use dispatch_task::DispatchTask;
use read_task::ReadTask;
use write_task::WriteTask;

/// Accept connections forever, spawning a fresh read/dispatch/write task
/// triple per client (spec §10.3, mirroring the teacher's
/// `handle_forever`/`process_socket`).
pub async fn handle_forever(listener: TcpListener, namespace: Arc<Namespace>) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        tracing::info!(%peer, "accepted connection");
        process_socket(socket, namespace.clone());
    }
}

fn process_socket(socket: TcpStream, namespace: Arc<Namespace>) {
    let (readhalf, writehalf) = socket.into_split();

    let (request_send, request_recv) = mpsc::unbounded_channel::<Request>();
    let (reply_send, reply_recv) = mpsc::unbounded_channel::<Reply>();

    ReadTask::spawn(readhalf, request_send);
    DispatchTask::spawn(namespace, request_recv, reply_send);
    WriteTask::spawn(writehalf, reply_recv);
}
