use std::{collections::HashMap, fmt};

use metrics::{counter, gauge};
use shared::models::ServerFrame;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Outbound buffer full; the frame was discarded.
    Dropped,
    /// The connection's writer is gone.
    Closed,
}

/// Write side of a connection: a bounded queue drained by the socket writer.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver its writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: ConnectionId::new(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: ServerFrame) -> DeliveryOutcome {
        match self.sender.try_send(frame) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => DeliveryOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    New,
    /// Same connection registered again under the same identity.
    Unchanged,
    /// Connection moved from another identity.
    Rebound { previous: Uuid },
}

/// Per-fan-out tally of connection outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl FanoutReport {
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }

    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.closed += other.closed;
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
            DeliveryOutcome::Closed => self.closed += 1,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    by_user: HashMap<Uuid, HashMap<ConnectionId, ConnectionHandle>>,
    owners: HashMap<ConnectionId, Uuid>,
}

impl RegistryState {
    fn detach(&mut self, connection: ConnectionId) -> Option<Uuid> {
        let user_id = self.owners.remove(&connection)?;
        if let Some(connections) = self.by_user.get_mut(&user_id) {
            connections.remove(&connection);
            if connections.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }
}

/// Live identity to connections map. Frames are written after the lock is
/// released and never wait on a slow client.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: Uuid, connection: ConnectionHandle) -> Registration {
        let connection_id = connection.id();
        let mut state = self.state.write().await;

        let registration = match state.owners.get(&connection_id).copied() {
            Some(owner) if owner == user_id => Registration::Unchanged,
            Some(previous) => {
                state.detach(connection_id);
                warn!(
                    connection_id = %connection_id,
                    previous_user_id = %previous,
                    user_id = %user_id,
                    "connection re-registered under a different identity"
                );
                Registration::Rebound { previous }
            }
            None => Registration::New,
        };

        state.owners.insert(connection_id, user_id);
        state
            .by_user
            .entry(user_id)
            .or_default()
            .insert(connection_id, connection);

        let live = state.owners.len();
        drop(state);

        if registration == Registration::New {
            counter!("marketchat_connections_registered_total").increment(1);
        }
        gauge!("marketchat_live_connections").set(live as f64);
        debug!(connection_id = %connection_id, user_id = %user_id, "connection registered");
        registration
    }

    /// Removes a connection, evicting its identity once no connections remain.
    pub async fn unregister(&self, connection: ConnectionId) -> Option<Uuid> {
        let mut state = self.state.write().await;
        let user_id = state.detach(connection);
        let live = state.owners.len();
        drop(state);

        if let Some(user_id) = user_id {
            gauge!("marketchat_live_connections").set(live as f64);
            debug!(connection_id = %connection, user_id = %user_id, "connection unregistered");
        }
        user_id
    }

    /// Writes `frame` to every live connection of `user_id`.
    pub async fn send(&self, user_id: Uuid, frame: &ServerFrame) -> FanoutReport {
        self.fan_out(user_id, None, frame).await
    }

    /// Like [`send`](Self::send) but skips `except`, usually the originating connection.
    pub async fn send_except(
        &self,
        user_id: Uuid,
        except: ConnectionId,
        frame: &ServerFrame,
    ) -> FanoutReport {
        self.fan_out(user_id, Some(except), frame).await
    }

    async fn fan_out(
        &self,
        user_id: Uuid,
        except: Option<ConnectionId>,
        frame: &ServerFrame,
    ) -> FanoutReport {
        let targets: Vec<ConnectionHandle> = {
            let state = self.state.read().await;
            state
                .by_user
                .get(&user_id)
                .map(|connections| {
                    connections
                        .values()
                        .filter(|handle| Some(handle.id()) != except)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut report = FanoutReport::default();
        for handle in targets {
            let outcome = handle.try_deliver(frame.clone());
            match outcome {
                DeliveryOutcome::Delivered => {}
                DeliveryOutcome::Dropped => {
                    debug!(connection_id = %handle.id(), event = frame.event(), "outbound buffer full; frame dropped");
                }
                DeliveryOutcome::Closed => {
                    debug!(connection_id = %handle.id(), event = frame.event(), "connection closed; frame skipped");
                }
            }
            report.record(outcome);
        }

        if report.attempted() > 0 {
            counter!("marketchat_fanout_frames_total", "outcome" => "delivered")
                .increment(report.delivered as u64);
            counter!("marketchat_fanout_frames_total", "outcome" => "dropped")
                .increment(report.dropped as u64);
            counter!("marketchat_fanout_frames_total", "outcome" => "closed")
                .increment(report.closed as u64);
        }
        report
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashMap::len)
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state.read().await.by_user.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> usize {
        self.state.read().await.by_user.len()
    }
}
