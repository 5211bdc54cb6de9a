//! Per-transfer record and its state machine.
//!
//! A record only ever advances: pending -> dispatched -> in_progress ->
//! completed | failed. Terminal states are entered exactly once; everything
//! that arrives afterwards for the same id is rejected without effect.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::reassembler::WriteCommand;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Dispatched,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Why a transfer failed. Rendered verbatim into the record's `error` field,
/// which is what operators see in status responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferFault {
    AgentDisconnected,
    ConnectionReplaced,
    /// The request never reached the agent (connection closed under us).
    Dispatch,
    Protocol(String),
    Inactivity,
    /// The agent sent an explicit abort; its message passes through.
    Aborted(String),
    Write(String),
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgentDisconnected => write!(f, "agent disconnected"),
            Self::ConnectionReplaced => write!(f, "connection replaced"),
            Self::Dispatch => write!(f, "dispatch failed: agent connection closed"),
            Self::Protocol(detail) => write!(f, "protocol violation: {detail}"),
            Self::Inactivity => write!(f, "inactivity timeout"),
            Self::Aborted(message) => write!(f, "{message}"),
            Self::Write(detail) => write!(f, "artifact write failure: {detail}"),
        }
    }
}

/// Mutable transfer record.
///
/// All mutation goes through the orchestrator while it holds the table
/// entry, so status readers only ever observe a consistent snapshot.
#[derive(Debug)]
pub struct Transfer {
    pub id: String,
    pub agent_id: String,
    /// Path on the agent's filesystem, opaque to the server.
    pub remote_path: String,
    /// Destination under the server's download directory.
    pub local_path: PathBuf,
    pub status: TransferStatus,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Elapses when no chunk arrives for the configured inactivity window.
    pub deadline: Instant,
    /// Channel into this transfer's reassembler task. Dropped on terminal
    /// state, which closes the destination file.
    pub writer: Option<mpsc::Sender<WriteCommand>>,
}

impl Transfer {
    pub fn new(
        id: String,
        agent_id: String,
        remote_path: String,
        local_path: PathBuf,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            id,
            agent_id,
            remote_path,
            local_path,
            status: TransferStatus::Pending,
            chunks_received: 0,
            bytes_received: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            deadline: Instant::now() + inactivity_timeout,
            writer: None,
        }
    }

    /// The transfer-request message reached the agent's connection.
    pub fn mark_dispatched(&mut self) {
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Dispatched;
        }
    }

    /// Account for one accepted in-order chunk and push the deadline out.
    pub fn record_chunk(&mut self, payload_len: usize, inactivity_timeout: Duration) {
        self.chunks_received += 1;
        self.bytes_received += payload_len as u64;
        self.status = TransferStatus::InProgress;
        self.deadline = Instant::now() + inactivity_timeout;
    }

    /// The reassembler confirmed the artifact is on disk without gaps.
    pub fn complete(&mut self) {
        self.status = TransferStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.writer = None;
    }

    /// Terminal failure; dropping the writer closes the destination file and
    /// leaves already-written bytes as they are.
    pub fn fail(&mut self, fault: &TransferFault) {
        self.status = TransferStatus::Failed;
        self.error = Some(fault.to_string());
        self.writer = None;
    }

    /// Immutable copy for status queries.
    pub fn snapshot(&self) -> TransferSnapshot {
        TransferSnapshot {
            id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            remote_path: self.remote_path.clone(),
            local_path: self.local_path.clone(),
            status: self.status,
            chunks_received: self.chunks_received,
            bytes_received: self.bytes_received,
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// Read-only copy of a record, served to the control plane.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub id: String,
    pub agent_id: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub status: TransferStatus,
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_transfer() -> Transfer {
        Transfer::new(
            "d-1".to_string(),
            "restaurant-001".to_string(),
            "/data/export.csv".to_string(),
            PathBuf::from("/tmp/out"),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = make_transfer();
        assert_eq!(t.status, TransferStatus::Pending);

        t.mark_dispatched();
        assert_eq!(t.status, TransferStatus::Dispatched);

        t.record_chunk(512, Duration::from_secs(30));
        assert_eq!(t.status, TransferStatus::InProgress);
        assert_eq!(t.chunks_received, 1);
        assert_eq!(t.bytes_received, 512);

        t.record_chunk(100, Duration::from_secs(30));
        assert_eq!(t.chunks_received, 2);
        assert_eq!(t.bytes_received, 612);

        t.complete();
        assert_eq!(t.status, TransferStatus::Completed);
        assert!(t.completed_at.is_some());
        assert!(t.error.is_none());
    }

    #[test]
    fn test_fail_records_operator_visible_reason() {
        let mut t = make_transfer();
        t.mark_dispatched();
        t.fail(&TransferFault::AgentDisconnected);

        assert_eq!(t.status, TransferStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("agent disconnected"));
        assert!(t.writer.is_none());
    }

    #[test]
    fn test_mark_dispatched_only_from_pending() {
        let mut t = make_transfer();
        t.mark_dispatched();
        t.record_chunk(1, Duration::from_secs(30));

        // A late dispatch confirmation must not rewind the state.
        t.mark_dispatched();
        assert_eq!(t.status, TransferStatus::InProgress);
    }

    #[test]
    fn test_fault_display_strings() {
        assert_eq!(TransferFault::ConnectionReplaced.to_string(), "connection replaced");
        assert_eq!(TransferFault::Inactivity.to_string(), "inactivity timeout");
        assert_eq!(
            TransferFault::Protocol("expected chunk 4, got 5".to_string()).to_string(),
            "protocol violation: expected chunk 4, got 5"
        );
        assert_eq!(
            TransferFault::Aborted("File not found: /x".to_string()).to_string(),
            "File not found: /x"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Dispatched.is_terminal());
        assert!(!TransferStatus::InProgress.is_terminal());
        assert_eq!(TransferStatus::InProgress.as_str(), "in_progress");
    }
}
