//! Writes dispatcher replies back to a network connection (spec §10.3).
//!
//! Grounded on the teacher's `src/stream_writer.rs`/`write_task.rs`.

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::protocol::{self, Reply};

pub struct WriteTask {
    writehalf: OwnedWriteHalf,
    reply_recv: UnboundedReceiver<Reply>,
}

impl WriteTask {
    pub fn spawn(writehalf: OwnedWriteHalf, reply_recv: UnboundedReceiver<Reply>) -> JoinHandle<()> {
        tokio::spawn(Self { writehalf, reply_recv }.run())
    }

    async fn run(mut self) {
        while let Some(reply) = self.reply_recv.recv().await {
            if let Err(err) = protocol::write_reply(&mut self.writehalf, &reply).await {
                tracing::warn!(%err, "client connection write error");
                return;
            }
        }
    }
}
