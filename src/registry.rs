//! Connection registry: one live persistent connection per agent id.
//!
//! The registry owns the outbound half of every agent connection. A new
//! connection for an already-registered id replaces the old entry, which
//! closes the superseded socket (its outbound channel loses its last sender)
//! and invalidates its in-flight transfers via a liveness event.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, UplinkError};
use crate::protocol::ServerMessage;

/// Liveness changes, consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected { agent_id: String },
    /// The previous connection for this id was superseded by a newer one.
    Replaced { agent_id: String },
    Disconnected { agent_id: String },
}

/// Handle for pushing messages down an agent's socket.
///
/// The registry entry holds the only long-lived sender; dropping the entry
/// (replacement or deregistration) ends the connection's outbound loop.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub agent_id: String,
    /// Distinguishes this connection from an earlier one with the same id.
    pub generation: u64,
    tx: mpsc::Sender<ServerMessage>,
}

impl AgentHandle {
    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| UplinkError::AgentDisconnected(self.agent_id.clone()))
    }
}

/// Snapshot row for the control-plane client listing.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: String,
    pub connected: bool,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug)]
struct AgentEntry {
    handle: AgentHandle,
    connected_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

pub struct ConnectionRegistry {
    agents: DashMap<String, AgentEntry>,
    generations: AtomicU64,
    events: mpsc::UnboundedSender<RegistryEvent>,
}

impl ConnectionRegistry {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                agents: DashMap::new(),
                generations: AtomicU64::new(0),
                events,
            },
            rx,
        )
    }

    /// Insert or replace the entry for `agent_id`, returning the new handle.
    ///
    /// Replacing drops the previous entry's sender, which closes that
    /// connection, and emits `Replaced` so the orchestrator fails anything
    /// mid-flight on it.
    pub fn register(&self, agent_id: &str, tx: mpsc::Sender<ServerMessage>) -> AgentHandle {
        let now = Utc::now();
        let handle = AgentHandle {
            agent_id: agent_id.to_string(),
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            tx,
        };

        let previous = self.agents.insert(
            agent_id.to_string(),
            AgentEntry {
                handle: handle.clone(),
                connected_at: now,
                last_seen: now,
            },
        );

        if previous.is_some() {
            debug!(agent_id, "replacing existing connection");
            self.emit(RegistryEvent::Replaced {
                agent_id: agent_id.to_string(),
            });
        }
        self.emit(RegistryEvent::Connected {
            agent_id: agent_id.to_string(),
        });

        handle
    }

    /// Non-blocking lookup of the live handle for `agent_id`.
    pub fn lookup(&self, agent_id: &str) -> Option<AgentHandle> {
        self.agents.get(agent_id).map(|entry| entry.handle.clone())
    }

    /// Remove the entry for `agent_id` on transport-level disconnect.
    ///
    /// Generation-checked: a replaced connection's late deregister must not
    /// evict its successor. Returns whether an entry was actually removed.
    pub fn deregister(&self, agent_id: &str, generation: u64) -> bool {
        let removed = self
            .agents
            .remove_if(agent_id, |_, entry| entry.handle.generation == generation)
            .is_some();

        if removed {
            self.emit(RegistryEvent::Disconnected {
                agent_id: agent_id.to_string(),
            });
        }
        removed
    }

    /// Bump `last_seen` for `agent_id`; called on every inbound frame.
    pub fn touch(&self, agent_id: &str) {
        if let Some(mut entry) = self.agents.get_mut(agent_id) {
            entry.last_seen = Utc::now();
        }
    }

    /// Snapshot of all live entries; never blocks writers.
    pub fn list(&self) -> Vec<AgentInfo> {
        self.agents
            .iter()
            .map(|entry| AgentInfo {
                agent_id: entry.key().clone(),
                connected: true,
                connected_at: entry.connected_at,
                last_seen: entry.last_seen,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn emit(&self, event: RegistryEvent) {
        // Ignore send errors (orchestrator not listening, e.g. in tests)
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_channel() -> (
        mpsc::Sender<ServerMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn test_register_lookup_list() {
        let (registry, _events) = ConnectionRegistry::new();
        let (tx, _rx) = handle_channel();

        registry.register("restaurant-001", tx);

        assert!(registry.lookup("restaurant-001").is_some());
        assert!(registry.lookup("restaurant-999").is_none());

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].agent_id, "restaurant-001");
        assert!(listed[0].connected);
    }

    #[tokio::test]
    async fn test_replacement_closes_previous_connection() {
        let (registry, mut events) = ConnectionRegistry::new();
        let (old_tx, mut old_rx) = handle_channel();
        let (new_tx, _new_rx) = handle_channel();

        // Keep only the generations so the registry holds the sole senders.
        let old_generation = registry.register("restaurant-001", old_tx).generation;
        let new_generation = registry.register("restaurant-001", new_tx).generation;
        assert!(new_generation > old_generation);

        // The old entry's sender was dropped: its outbound loop sees None.
        assert!(old_rx.recv().await.is_none());

        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Connected {
                agent_id: "restaurant-001".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Replaced {
                agent_id: "restaurant-001".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_stale_deregister_keeps_successor() {
        let (registry, _events) = ConnectionRegistry::new();
        let (old_tx, _old_rx) = handle_channel();
        let (new_tx, _new_rx) = handle_channel();

        let old = registry.register("restaurant-001", old_tx);
        let new = registry.register("restaurant-001", new_tx);

        // The replaced connection's reader exits and tries to clean up.
        assert!(!registry.deregister("restaurant-001", old.generation));
        assert_eq!(registry.len(), 1);

        assert!(registry.deregister("restaurant-001", new.generation));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_deregister_emits_disconnected() {
        let (registry, mut events) = ConnectionRegistry::new();
        let (tx, _rx) = handle_channel();

        let handle = registry.register("restaurant-001", tx);
        registry.deregister("restaurant-001", handle.generation);

        // Connected, then Disconnected.
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Connected {
                agent_id: "restaurant-001".to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            RegistryEvent::Disconnected {
                agent_id: "restaurant-001".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_touch_updates_last_seen() {
        let (registry, _events) = ConnectionRegistry::new();
        let (tx, _rx) = handle_channel();

        registry.register("restaurant-001", tx);
        let before = registry.list()[0].last_seen;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.touch("restaurant-001");

        assert!(registry.list()[0].last_seen > before);
    }
}
