//! Reads client request frames from a network connection and forwards them
//! to a [`super::dispatch_task::DispatchTask`] (spec §10.3).
//!
//! Grounded on the teacher's `src/read_task.rs`.

use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::protocol::{self, Request};

/// Reads length-prefixed [`Request`] frames from a connection and forwards
/// them to the dispatch task.
pub struct ReadTask {
    readhalf: OwnedReadHalf,
    request_send: UnboundedSender<Request>,
}

impl ReadTask {
    pub fn spawn(readhalf: OwnedReadHalf, request_send: UnboundedSender<Request>) -> JoinHandle<()> {
        tokio::spawn(Self { readhalf, request_send }.run())
    }

    async fn run(mut self) {
        loop {
            match protocol::read_request(&mut self.readhalf).await {
                Ok(request) => {
                    if self.request_send.send(request).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::UnexpectedEof {
                        tracing::warn!(%err, "client connection read error");
                    }
                    return;
                }
            }
        }
    }
}
