//! Transfer orchestrator: owns every transfer record from creation to its
//! terminal state.
//!
//! All mutation of the transfer table goes through this type, so concurrent
//! status reads never observe a torn update. Payload persistence is handed
//! off to per-transfer reassembler tasks; their results and the registry's
//! liveness events come back over channels consumed by background loops.

use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{Result, UplinkError};
use crate::protocol::ServerMessage;
use crate::reassembler::{self, ReassemblyEvent, WriteCommand};
use crate::registry::{ConnectionRegistry, RegistryEvent};
use crate::transfer::{Transfer, TransferFault, TransferSnapshot, TransferStatus};

/// How often the inactivity sweep scans for overdue transfers.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct TransferOrchestrator {
    registry: Arc<ConnectionRegistry>,
    transfers: DashMap<String, Transfer>,
    config: TransferConfig,
    download_dir: PathBuf,
    reassembly_tx: mpsc::UnboundedSender<ReassemblyEvent>,
}

impl TransferOrchestrator {
    /// Build the orchestrator and spawn its background loops: the registry
    /// liveness listener, the reassembly result listener, and the
    /// inactivity sweep.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        registry_events: mpsc::UnboundedReceiver<RegistryEvent>,
        config: TransferConfig,
        download_dir: PathBuf,
    ) -> Arc<Self> {
        let (reassembly_tx, reassembly_rx) = mpsc::unbounded_channel();

        let orchestrator = Arc::new(Self {
            registry,
            transfers: DashMap::new(),
            config,
            download_dir,
            reassembly_tx,
        });

        tokio::spawn(Arc::clone(&orchestrator).run_registry_listener(registry_events));
        tokio::spawn(Arc::clone(&orchestrator).run_reassembly_listener(reassembly_rx));
        tokio::spawn(Arc::clone(&orchestrator).run_inactivity_sweep());

        orchestrator
    }

    /// Create a transfer for `agent_id` and dispatch the request down its
    /// connection.
    ///
    /// No record is created when the agent is unknown (`AgentNotConnected`)
    /// or the concurrency policy rejects it (`AgentBusy`). If the send races
    /// a disconnect, the record exists and comes back already `failed`.
    pub async fn create(&self, agent_id: &str, remote_path: &str) -> Result<TransferSnapshot> {
        let handle = self
            .registry
            .lookup(agent_id)
            .ok_or_else(|| UplinkError::AgentNotConnected(agent_id.to_string()))?;

        if !self.config.concurrent_per_agent && self.has_active_transfer(agent_id) {
            return Err(UplinkError::AgentBusy(agent_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let local_path = self.destination_path(agent_id, remote_path, &id);
        let mut transfer = Transfer::new(
            id.clone(),
            agent_id.to_string(),
            remote_path.to_string(),
            local_path.clone(),
            self.inactivity_timeout(),
        );
        transfer.writer = Some(reassembler::spawn_writer(
            id.clone(),
            local_path,
            self.reassembly_tx.clone(),
        ));
        self.transfers.insert(id.clone(), transfer);

        info!(agent_id, transfer_id = %id, path = remote_path, "transfer requested");

        // Send without holding the table entry, so a slow agent queue never
        // holds up status reads or the sweep.
        let dispatched = handle
            .send(ServerMessage::TransferRequest {
                transfer_id: id.clone(),
                path: remote_path.to_string(),
            })
            .await;

        let Some(mut entry) = self.transfers.get_mut(&id) else {
            return Err(UplinkError::TransferNotFound(id));
        };
        if !entry.status.is_terminal() {
            match dispatched {
                Ok(()) => entry.mark_dispatched(),
                Err(_) => {
                    warn!(transfer_id = %id, "dispatch failed, agent connection closed");
                    entry.fail(&TransferFault::Dispatch);
                }
            }
        }
        Ok(entry.snapshot())
    }

    /// Immutable copy of the current record; never blocks the ingest path
    /// beyond a per-entry clone.
    pub fn status(&self, transfer_id: &str) -> Option<TransferSnapshot> {
        self.transfers.get(transfer_id).map(|t| t.snapshot())
    }

    /// Number of non-terminal transfers, for the health endpoint.
    pub fn active_transfers(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Ingest one chunk message arriving on `agent_id`'s connection.
    ///
    /// Validates ownership and ordering, updates counters, then hands the
    /// payload to the transfer's writer task. Chunks for terminal transfers
    /// are rejected without touching the record.
    pub async fn on_chunk(
        &self,
        agent_id: &str,
        transfer_id: &str,
        seq: u64,
        data: Vec<u8>,
        is_last: bool,
    ) {
        // Validate and account under the entry lock, but release it before
        // the (possibly suspending) hand-off to the writer.
        let writer = {
            let Some(mut entry) = self.transfers.get_mut(transfer_id) else {
                warn!(transfer_id, "chunk for unknown transfer");
                return;
            };
            if entry.status.is_terminal() {
                debug!(transfer_id, seq, "chunk after terminal state ignored");
                return;
            }
            if entry.agent_id != agent_id {
                let fault = TransferFault::Protocol(format!(
                    "chunk from {agent_id} for a transfer owned by {}",
                    entry.agent_id
                ));
                warn!(transfer_id, %fault, "rejecting chunk");
                entry.fail(&fault);
                return;
            }
            let expected = entry.chunks_received + 1;
            if seq != expected {
                let fault =
                    TransferFault::Protocol(format!("expected chunk {expected}, got {seq}"));
                warn!(transfer_id, %fault, "rejecting chunk");
                entry.fail(&fault);
                return;
            }

            entry.record_chunk(data.len(), self.inactivity_timeout());
            entry.writer.clone()
        };

        if let Some(writer) = writer {
            // Capacity-1 channel: suspends only while this transfer's
            // previous chunk is still being persisted.
            if writer.send(WriteCommand { seq, data, is_last }).await.is_err() {
                self.fail_transfer(transfer_id, &TransferFault::Write("writer stopped".to_string()));
            }
        }
    }

    /// The agent reported it cannot complete the read.
    pub fn on_abort(&self, agent_id: &str, transfer_id: &str, message: String) {
        let Some(mut entry) = self.transfers.get_mut(transfer_id) else {
            warn!(transfer_id, "abort for unknown transfer");
            return;
        };
        if entry.status.is_terminal() {
            debug!(transfer_id, "abort after terminal state ignored");
            return;
        }
        if entry.agent_id != agent_id {
            warn!(transfer_id, agent_id, "abort from foreign agent ignored");
            return;
        }
        info!(transfer_id, message, "transfer aborted by agent");
        entry.fail(&TransferFault::Aborted(message));
    }

    fn has_active_transfer(&self, agent_id: &str) -> bool {
        self.transfers
            .iter()
            .any(|t| t.agent_id == agent_id && !t.status.is_terminal())
    }

    fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.config.inactivity_timeout_secs)
    }

    /// `<agent>_<timestamp>_<id8>_<basename>` under the download dir. The
    /// transfer-id fragment keeps two same-second requests for the same file
    /// from colliding on one path.
    fn destination_path(&self, agent_id: &str, remote_path: &str, transfer_id: &str) -> PathBuf {
        let base = Path::new(remote_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download");
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let id8: String = transfer_id.chars().take(8).collect();
        self.download_dir.join(format!(
            "{}_{stamp}_{id8}_{}",
            sanitize_component(agent_id),
            sanitize_component(base)
        ))
    }

    fn fail_transfer(&self, transfer_id: &str, fault: &TransferFault) {
        if let Some(mut entry) = self.transfers.get_mut(transfer_id) {
            if !entry.status.is_terminal() {
                info!(transfer_id, %fault, "transfer failed");
                entry.fail(fault);
            }
        }
    }

    fn fail_agent_transfers(&self, agent_id: &str, fault: &TransferFault) {
        for mut entry in self.transfers.iter_mut() {
            if entry.agent_id == agent_id && !entry.status.is_terminal() {
                info!(transfer_id = %entry.id, %fault, "transfer failed");
                entry.fail(fault);
            }
        }
    }

    async fn run_registry_listener(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RegistryEvent::Connected { agent_id } => {
                    debug!(agent_id, "agent connected");
                }
                RegistryEvent::Replaced { agent_id } => {
                    self.fail_agent_transfers(&agent_id, &TransferFault::ConnectionReplaced);
                }
                RegistryEvent::Disconnected { agent_id } => {
                    self.fail_agent_transfers(&agent_id, &TransferFault::AgentDisconnected);
                }
            }
        }
    }

    async fn run_reassembly_listener(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ReassemblyEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                ReassemblyEvent::Completed {
                    transfer_id,
                    bytes_written,
                } => self.complete_transfer(&transfer_id, bytes_written),
                ReassemblyEvent::Failed { transfer_id, error } => {
                    self.fail_transfer(&transfer_id, &TransferFault::Write(error));
                }
            }
        }
    }

    /// Move to `completed` once the writer confirms the artifact is on disk,
    /// cross-checking its byte count against what was accepted.
    fn complete_transfer(&self, transfer_id: &str, bytes_written: u64) {
        let Some(mut entry) = self.transfers.get_mut(transfer_id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        if bytes_written != entry.bytes_received {
            let fault = TransferFault::Write(format!(
                "wrote {bytes_written} bytes but accepted {}",
                entry.bytes_received
            ));
            warn!(transfer_id, %fault, "transfer failed");
            entry.fail(&fault);
            return;
        }
        entry.complete();
        info!(
            transfer_id,
            chunks = entry.chunks_received,
            bytes = entry.bytes_received,
            dest = %entry.local_path.display(),
            "transfer completed"
        );
    }

    async fn run_inactivity_sweep(self: Arc<Self>) {
        let mut tick = interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let now = Instant::now();
            let overdue: Vec<String> = self
                .transfers
                .iter()
                .filter(|t| {
                    matches!(
                        t.status,
                        TransferStatus::Dispatched | TransferStatus::InProgress
                    ) && t.deadline <= now
                })
                .map(|t| t.id.clone())
                .collect();

            for transfer_id in overdue {
                // Re-check under the entry lock: a chunk may have landed
                // between the scan and now.
                if let Some(mut entry) = self.transfers.get_mut(&transfer_id) {
                    if !entry.status.is_terminal() && entry.deadline <= now {
                        warn!(transfer_id = %entry.id, "transfer failed: inactivity timeout");
                        entry.fail(&TransferFault::Inactivity);
                    }
                }
            }
        }
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
