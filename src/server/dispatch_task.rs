//! Executes client requests against a [`Dispatcher`], sending replies back
//! to the write task (spec §10.3).
//!
//! Grounded on the teacher's `src/vfs_task.rs`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::backend::OpenMode;
use crate::dispatcher::{Dispatcher, Whence};
use crate::error::Status;
use crate::mtab;
use crate::namespace::Namespace;
use crate::protocol::{Reply, Request};

pub struct DispatchTask {
    dispatcher: Dispatcher,
    request_recv: UnboundedReceiver<Request>,
    reply_send: UnboundedSender<Reply>,
}

impl DispatchTask {
    pub fn spawn(
        namespace: Arc<Namespace>,
        request_recv: UnboundedReceiver<Request>,
        reply_send: UnboundedSender<Reply>,
    ) -> JoinHandle<()> {
        let dispatcher = Dispatcher::new(namespace);
        tokio::spawn(async move { Self { dispatcher, request_recv, reply_send }.run().await })
    }

    async fn run(mut self) {
        while let Some(request) = self.request_recv.recv().await {
            if matches!(request, Request::GetMtab) {
                if !self.stream_mtab().await {
                    return;
                }
                continue;
            }
            let reply = self.execute(request).await;
            if self.reply_send.send(reply).is_err() {
                return;
            }
        }
    }

    /// Drives `GetMtab`: replies with the total row count, then streams one
    /// row per `MtabPing` through [`mtab::stream`] (spec §4.6). Returns
    /// `false` if the write side of the connection is gone and the
    /// connection should be torn down.
    async fn stream_mtab(&mut self) -> bool {
        let entries = self.dispatcher.get_mtab().await;
        let total = entries.len() as u32;
        if self.reply_send.send(Reply::MtabCount(Status::Eok, total)).is_err() {
            return false;
        }

        let (row_send, mut row_recv) = mpsc::channel(1);
        let (ping_send, ping_recv) = mpsc::channel(1);
        let stream_task = tokio::spawn(mtab::stream(entries, row_send, ping_recv));

        for _ in 0..total {
            match self.request_recv.recv().await {
                Some(Request::MtabPing) => {
                    if ping_send.send(()).await.is_err() {
                        break;
                    }
                    let Some(row) = row_recv.recv().await else { break };
                    if self.reply_send.send(Reply::MtabRow(Status::Eok, row)).is_err() {
                        drop(ping_send);
                        let _ = stream_task.await;
                        return false;
                    }
                }
                // a client that stops pinging mid-stream or sends something
                // else aborts the stream early.
                _ => break,
            }
        }
        drop(ping_send);
        let _ = stream_task.await;
        true
    }

    #[tracing::instrument(skip(self, request))]
    async fn execute(&self, request: Request) -> Reply {
        match request {
            Request::Mount { service_id, flags: _, instance, point, options, fs_name } => {
                match self.dispatcher.namespace.registry.resolve(&fs_name, instance, true).await {
                    Ok((handle, backend)) => {
                        let result = self
                            .dispatcher
                            .namespace
                            .mount(&point, handle, backend, service_id, instance, &fs_name, &options)
                            .await;
                        Reply::Status(status_of(result))
                    }
                    Err(err) => Reply::Status(err),
                }
            }
            Request::Unmount { point } => {
                Reply::Status(status_of(self.dispatcher.namespace.unmount(&point).await))
            }
            Request::Walk { parent_fd, flags, path } => {
                match self.dispatcher.walk(parent_fd, &path, flags).await {
                    Ok(fd) => Reply::NewFd(Status::Eok, fd),
                    Err(err) => Reply::NewFd(err, -1),
                }
            }
            Request::Open2 { fd, read, write, append } => {
                let mode = OpenMode { read, write, append };
                Reply::Status(status_of(self.dispatcher.open(fd, mode).await))
            }
            Request::Read { fd, count } => match self.dispatcher.read(fd, count).await {
                Ok(data) => Reply::Bytes(Status::Eok, data),
                Err(err) => Reply::Bytes(err, Vec::new()),
            },
            Request::Write { fd, data } => match self.dispatcher.write(fd, &data).await {
                Ok((written, new_size)) => Reply::Written(Status::Eok, written, new_size),
                Err(err) => Reply::Written(err, 0, None),
            },
            Request::Seek { fd, offset, whence } => {
                let whence = match whence {
                    0 => Whence::Set,
                    1 => Whence::Cur,
                    _ => Whence::End,
                };
                match self.dispatcher.seek(fd, offset, whence).await {
                    Ok(pos) => Reply::Position(Status::Eok, pos),
                    Err(err) => Reply::Position(err, 0),
                }
            }
            Request::Truncate { fd, size } => {
                Reply::Status(status_of(self.dispatcher.truncate(fd, size).await))
            }
            Request::Sync { fd } => Reply::Status(status_of(self.dispatcher.sync(fd).await)),
            Request::Fstat { fd } => match self.dispatcher.stat(fd).await {
                Ok(data) => Reply::Bytes(Status::Eok, data),
                Err(err) => Reply::Bytes(err, Vec::new()),
            },
            Request::Close { fd } => Reply::Status(status_of(self.dispatcher.close(fd).await)),
            Request::Unlink2 { parent_fd, expect_fd, flags, path } => Reply::Status(status_of(
                self.dispatcher.unlink(parent_fd, expect_fd, &path, flags).await,
            )),
            Request::Rename { base_fd, old, new } => {
                Reply::Status(status_of(self.dispatcher.rename(base_fd, &old, &new).await))
            }
            Request::Dup { old_fd, new_fd } => match self.dispatcher.dup(old_fd, new_fd).await {
                Ok(fd) => Reply::NewFd(Status::Eok, fd),
                Err(err) => Reply::NewFd(err, -1),
            },
            Request::WaitHandle => {
                // Not part of the namespace/descriptor core (spec §4.6);
                // blocks until a root is mounted, then hands back a fresh
                // descriptor on it, mirroring what a client would get from
                // `WALK(parent=-1, "/")` once mounting completes.
                loop {
                    if self.dispatcher.namespace.read_root().await.is_ok() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                match self.dispatcher.walk(-1, "/", crate::resolver::WalkFlags::empty()).await {
                    Ok(fd) => Reply::NewFd(Status::Eok, fd),
                    Err(err) => Reply::NewFd(err, -1),
                }
            }
            // Handled directly in `run`/`stream_mtab` since it spans
            // multiple request/reply round trips.
            Request::GetMtab => unreachable!("GetMtab is intercepted in run()"),
            // Only meaningful while a `GetMtab` stream is in progress
            // (handled in `stream_mtab`); outside that window it's a
            // protocol violation.
            Request::MtabPing => Reply::Status(Status::EInval),
        }
    }
}

fn status_of(result: crate::error::Result<()>) -> Status {
    match result {
        Ok(()) => Status::Eok,
        Err(err) => err,
    }
}
