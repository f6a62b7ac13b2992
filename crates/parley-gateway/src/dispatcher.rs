use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// A broadcast frame. `origin` identifies the connection that produced the
/// event so its own send loop can skip the echo.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub origin: Option<Uuid>,
    pub event: GatewayEvent,
}

/// The presence registry: maps each online user to exactly one live
/// connection and fans presence events out to everyone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Fan-out channel for presence events — every connected client receives them
    broadcast_tx: broadcast::Sender<Broadcast>,

    /// user_id -> (conn_id, targeted sender). At most one entry per user;
    /// a new registration replaces the old one.
    connections: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast frames. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Fire-and-forget.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(Broadcast {
            origin: None,
            event,
        });
    }

    /// Broadcast to everyone except the originating connection.
    pub fn broadcast_from(&self, origin: Uuid, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(Broadcast {
            origin: Some(origin),
            event,
        });
    }

    /// Register a user's connection, unconditionally replacing any existing
    /// mapping for that user. The superseded sender is dropped, so a stale
    /// connection's receiver closes and can never be handed new events.
    /// Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove a user's mapping, but only if it still belongs to `conn_id`.
    /// A delayed teardown of a superseded connection must not evict the
    /// mapping a fresh reconnect just installed. Returns whether the mapping
    /// was removed.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        if let Some((stored_conn_id, _)) = connections.get(&user_id) {
            if *stored_conn_id == conn_id {
                connections.remove(&user_id);
                return true;
            }
        }
        false
    }

    /// Send a targeted event to a user's live connection, if any.
    /// An offline or stale recipient is silently skipped.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some((_, tx)) = connections.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    /// Snapshot of everyone currently online.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.inner
            .connections
            .read()
            .await
            .keys()
            .copied()
            .collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_event() -> GatewayEvent {
        GatewayEvent::UserOnline {
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn register_then_send_reaches_the_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_conn, mut rx) = dispatcher.register(user).await;
        assert!(dispatcher.is_online(user).await);

        dispatcher.send_to_user(user, online_event()).await;
        assert!(rx.try_recv().is_ok());

        // Offline target: silently dropped
        dispatcher.send_to_user(Uuid::new_v4(), online_event()).await;
    }

    #[tokio::test]
    async fn reregister_replaces_the_previous_mapping() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (_old_conn, mut old_rx) = dispatcher.register(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register(user).await;

        dispatcher.send_to_user(user, online_event()).await;

        // Only the new connection receives; the old channel is closed
        assert!(new_rx.try_recv().is_ok());
        assert!(matches!(
            old_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn stale_unregister_cannot_evict_a_newer_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        // Old connection drops late, after the user already reconnected
        let (old_conn, _old_rx) = dispatcher.register(user).await;
        let (new_conn, mut new_rx) = dispatcher.register(user).await;

        assert!(!dispatcher.unregister(user, old_conn).await);
        assert!(dispatcher.is_online(user).await);

        dispatcher.send_to_user(user, online_event()).await;
        assert!(new_rx.try_recv().is_ok());

        // The owning connection can still unregister itself
        assert!(dispatcher.unregister(user, new_conn).await);
        assert!(!dispatcher.is_online(user).await);
    }

    #[tokio::test]
    async fn online_snapshot_tracks_registrations() {
        let dispatcher = Dispatcher::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let (conn_a, _rx_a) = dispatcher.register(a).await;
        let (_conn_b, _rx_b) = dispatcher.register(b).await;

        let mut online = dispatcher.online_user_ids().await;
        online.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(online, expected);

        dispatcher.unregister(a, conn_a).await;
        assert_eq!(dispatcher.online_user_ids().await, vec![b]);
    }

    #[tokio::test]
    async fn broadcast_frames_carry_their_origin() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let origin = Uuid::new_v4();
        dispatcher.broadcast_from(origin, online_event());
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.origin, Some(origin));

        dispatcher.broadcast(online_event());
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.origin, None);
    }
}
