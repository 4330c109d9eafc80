//! Mtab enumerator (spec §4.6 `get_mtab`): snapshots and streams the mount
//! table to clients.
//!
//! Grounded on the teacher's `src/mount/dump.rs`/`export.rs` (serializing a
//! linked list of mount entries onto the wire); the ping-handshake pacing
//! mirrors the teacher's `EarlyReply`/`StreamWriter` split
//! (`src/stream_writer.rs`), generalized from an XDR linked list to our own
//! `(mount-point, options, fs-name, instance, service)` tuple stream.

use tokio::sync::mpsc;

use crate::mount::MountEntry;

/// One row of the streamed mtab, per spec §4.6:
/// "(mount-point, options, fs-name, instance, service) tuples".
#[derive(Debug, Clone)]
pub struct MtabRow {
    pub point: String,
    pub options: String,
    pub fs_name: String,
    pub instance: u64,
    pub service_id: u64,
}

impl From<&MountEntry> for MtabRow {
    fn from(entry: &MountEntry) -> Self {
        Self {
            point: entry.point.clone(),
            options: entry.options.clone(),
            fs_name: entry.fs_name.clone(),
            instance: entry.instance,
            service_id: entry.service_id,
        }
    }
}

/// Stream a mtab snapshot to `rows`, pacing one entry per client ping
/// (spec §4.6: "using a ping-handshake per entry so that the client paces
/// the transfer"). `pings` yields once per client-requested row; the
/// enumerator stops early if the channel closes or `pings` is exhausted
/// before the snapshot is fully sent.
pub async fn stream(
    entries: Vec<MountEntry>,
    rows: mpsc::Sender<MtabRow>,
    mut pings: mpsc::Receiver<()>,
) -> usize {
    let mut sent = 0;
    for entry in &entries {
        if pings.recv().await.is_none() {
            break;
        }
        if rows.send(MtabRow::from(entry)).await.is_err() {
            break;
        }
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triplet::{BackendHandle, Triplet};

    fn entry(point: &str) -> MountEntry {
        MountEntry {
            point: point.to_string(),
            mountpoint_triplet: None,
            root_triplet: Triplet::new(BackendHandle(1), 0, 1),
            backend: BackendHandle(1),
            service_id: 0,
            instance: 0,
            fs_name: "tmpfs".to_string(),
            options: String::new(),
        }
    }

    #[tokio::test]
    async fn streams_one_row_per_ping() {
        let entries = vec![entry("/"), entry("/m")];
        let (row_tx, mut row_rx) = mpsc::channel(4);
        let (ping_tx, ping_rx) = mpsc::channel(4);
        for _ in 0..2 {
            ping_tx.send(()).await.unwrap();
        }
        drop(ping_tx);
        let sent = stream(entries, row_tx, ping_rx).await;
        assert_eq!(sent, 2);
        assert_eq!(row_rx.recv().await.unwrap().point, "/");
        assert_eq!(row_rx.recv().await.unwrap().point, "/m");
    }

    #[tokio::test]
    async fn stops_early_when_pings_run_out() {
        let entries = vec![entry("/"), entry("/m")];
        let (row_tx, _row_rx) = mpsc::channel(4);
        let (ping_tx, ping_rx) = mpsc::channel(4);
        ping_tx.send(()).await.unwrap();
        drop(ping_tx);
        let sent = stream(entries, row_tx, ping_rx).await;
        assert_eq!(sent, 1);
    }
}
