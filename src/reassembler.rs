//! Per-transfer chunk reassembly: strictly ordered appends to the
//! destination artifact.
//!
//! Each transfer gets its own writer task owning the file handle. The file
//! is opened on the first accepted chunk and closed on terminal state, so
//! bytes on disk are always a prefix of the source in transmission order.
//! There is no out-of-order buffering and no rollback.

use std::path::PathBuf;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

/// One accepted chunk handed off by the orchestrator.
#[derive(Debug)]
pub struct WriteCommand {
    pub seq: u64,
    pub data: Vec<u8>,
    pub is_last: bool,
}

/// Outcome reported back to the orchestrator.
#[derive(Debug, PartialEq, Eq)]
pub enum ReassemblyEvent {
    Completed {
        transfer_id: String,
        bytes_written: u64,
    },
    Failed {
        transfer_id: String,
        error: String,
    },
}

/// Capacity 1: at most one chunk queued per transfer while another is being
/// persisted. Chunk ingest for a transfer suspends only while its own
/// previous write is still in flight.
const WRITER_QUEUE_DEPTH: usize = 1;

/// Spawn the writer task for one transfer. The returned sender is the only
/// way to feed it; dropping the sender makes the task close the file and
/// exit, leaving already-written bytes untouched.
pub fn spawn_writer(
    transfer_id: String,
    dest: PathBuf,
    events: mpsc::UnboundedSender<ReassemblyEvent>,
) -> mpsc::Sender<WriteCommand> {
    let (tx, rx) = mpsc::channel(WRITER_QUEUE_DEPTH);
    tokio::spawn(run_writer(transfer_id, dest, rx, events));
    tx
}

async fn run_writer(
    transfer_id: String,
    dest: PathBuf,
    mut rx: mpsc::Receiver<WriteCommand>,
    events: mpsc::UnboundedSender<ReassemblyEvent>,
) {
    let mut file: Option<File> = None;
    let mut expected_seq: u64 = 1;
    let mut bytes_written: u64 = 0;

    while let Some(cmd) = rx.recv().await {
        // The orchestrator validates ordering before handing off; a mismatch
        // here means the transfer table and this task disagree.
        if cmd.seq != expected_seq {
            let _ = events.send(ReassemblyEvent::Failed {
                transfer_id: transfer_id.clone(),
                error: format!("expected chunk {expected_seq}, got {}", cmd.seq),
            });
            return;
        }

        if file.is_none() {
            if let Some(parent) = dest.parent() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    let _ = events.send(ReassemblyEvent::Failed {
                        transfer_id: transfer_id.clone(),
                        error: format!("cannot create {}: {e}", parent.display()),
                    });
                    return;
                }
            }
            match File::create(&dest).await {
                Ok(created) => file = Some(created),
                Err(e) => {
                    let _ = events.send(ReassemblyEvent::Failed {
                        transfer_id: transfer_id.clone(),
                        error: format!("cannot create {}: {e}", dest.display()),
                    });
                    return;
                }
            }
        }
        let Some(f) = file.as_mut() else {
            return;
        };

        if let Err(e) = f.write_all(&cmd.data).await {
            let _ = events.send(ReassemblyEvent::Failed {
                transfer_id: transfer_id.clone(),
                error: e.to_string(),
            });
            return;
        }
        bytes_written += cmd.data.len() as u64;
        expected_seq += 1;

        if cmd.is_last {
            if let Err(e) = f.flush().await {
                let _ = events.send(ReassemblyEvent::Failed {
                    transfer_id: transfer_id.clone(),
                    error: e.to_string(),
                });
                return;
            }
            let _ = events.send(ReassemblyEvent::Completed {
                transfer_id,
                bytes_written,
            });
            return;
        }
    }

    // Sender dropped without end-of-stream: the transfer failed upstream.
    // The file closes on drop; partial bytes stay on disk.
    debug!(transfer_id, bytes_written, "writer stopped before end-of-stream");
}
