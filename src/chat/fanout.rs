//! Broadcast fan-out to live connections.
//!
//! Every connection owns one bounded FIFO queue, so events reach a
//! connection in the order they were handed to the fan-out. A connection
//! belongs to at most one group (the lobby or a single room).

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use super::{ConnectionId, ServerEvent};

/// Broadcast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Identified connections that are not in a room.
    Lobby,
    /// Occupants of a room, by room ID.
    Room(i64),
}

struct Subscriber {
    sender: mpsc::Sender<ServerEvent>,
    group: Option<Group>,
}

#[derive(Default)]
struct FanoutInner {
    subscribers: HashMap<ConnectionId, Subscriber>,
    groups: HashMap<Group, HashSet<ConnectionId>>,
}

impl FanoutInner {
    fn leave_group(&mut self, conn: ConnectionId, group: Group) {
        if let Some(members) = self.groups.get_mut(&group) {
            members.remove(&conn);
            if members.is_empty() {
                self.groups.remove(&group);
            }
        }
    }

    fn remove(&mut self, conn: ConnectionId) -> bool {
        match self.subscribers.remove(&conn) {
            Some(subscriber) => {
                if let Some(group) = subscriber.group {
                    self.leave_group(conn, group);
                }
                true
            }
            None => false,
        }
    }

    /// Returns false if the connection's queue is closed.
    fn deliver(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let Some(subscriber) = self.subscribers.get(&conn) else {
            return true;
        };

        match subscriber.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping event", conn);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Per-connection event delivery.
pub struct Fanout {
    capacity: usize,
    inner: RwLock<FanoutInner>,
}

impl Fanout {
    /// Create a fan-out whose queues hold up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(FanoutInner::default()),
        }
    }

    /// Register a connection and return the receiving end of its queue.
    ///
    /// Re-attaching a connection replaces its queue and drops its group.
    pub async fn attach(&self, conn: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut inner = self.inner.write().await;
        inner.remove(conn);
        inner.subscribers.insert(
            conn,
            Subscriber {
                sender,
                group: None,
            },
        );
        debug!("Attached {}", conn);
        receiver
    }

    /// Move a connection into `group`.
    ///
    /// Returns false if the connection is not attached.
    pub async fn subscribe(&self, conn: ConnectionId, group: Group) -> bool {
        let mut inner = self.inner.write().await;
        let previous = match inner.subscribers.get_mut(&conn) {
            Some(subscriber) => subscriber.group.replace(group),
            None => return false,
        };
        if let Some(previous) = previous {
            inner.leave_group(conn, previous);
        }
        inner.groups.entry(group).or_default().insert(conn);
        true
    }

    /// Deliver `event` to every member of `group`.
    ///
    /// Returns the number of connections the event was offered to.
    pub async fn broadcast(&self, event: ServerEvent, group: Group) -> usize {
        let (offered, closed) = {
            let inner = self.inner.read().await;
            let Some(members) = inner.groups.get(&group) else {
                return 0;
            };
            let closed: Vec<ConnectionId> = members
                .iter()
                .filter(|conn| !inner.deliver(**conn, event.clone()))
                .copied()
                .collect();
            (members.len(), closed)
        };

        self.drop_closed(closed).await;
        offered
    }

    /// Deliver `event` to a single connection.
    ///
    /// Returns false if the connection is not attached or its queue is closed.
    pub async fn unicast(&self, event: ServerEvent, conn: ConnectionId) -> bool {
        let delivered = {
            let inner = self.inner.read().await;
            if !inner.subscribers.contains_key(&conn) {
                return false;
            }
            inner.deliver(conn, event)
        };

        if !delivered {
            self.drop_closed(vec![conn]).await;
        }
        delivered
    }

    /// Remove a connection and all of its subscriptions. Idempotent.
    ///
    /// Dropping the queue's sender lets the receiver drain and finish.
    pub async fn detach(&self, conn: ConnectionId) -> bool {
        let removed = self.inner.write().await.remove(conn);
        if removed {
            debug!("Detached {}", conn);
        }
        removed
    }

    /// Current group of a connection.
    pub async fn group_of(&self, conn: ConnectionId) -> Option<Group> {
        self.inner
            .read()
            .await
            .subscribers
            .get(&conn)
            .and_then(|s| s.group)
    }

    /// Members of a group.
    pub async fn members(&self, group: Group) -> Vec<ConnectionId> {
        self.inner
            .read()
            .await
            .groups
            .get(&group)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of attached connections.
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }

    async fn drop_closed(&self, closed: Vec<ConnectionId>) {
        if closed.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for conn in closed {
            if inner.remove(conn) {
                debug!("Detached {} after its queue closed", conn);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerEvent {
        ServerEvent::Pong
    }

    #[tokio::test]
    async fn test_unicast_preserves_order() {
        let fanout = Fanout::new(8);
        let conn = ConnectionId::new();
        let mut rx = fanout.attach(conn).await;

        fanout.unicast(ServerEvent::error("a", "1"), conn).await;
        fanout.unicast(ServerEvent::error("b", "2"), conn).await;

        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("a", "1"));
        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("b", "2"));
    }

    #[tokio::test]
    async fn test_subscribe_moves_between_groups() {
        let fanout = Fanout::new(8);
        let conn = ConnectionId::new();
        let _rx = fanout.attach(conn).await;

        assert!(fanout.subscribe(conn, Group::Lobby).await);
        assert!(fanout.subscribe(conn, Group::Room(1)).await);

        assert_eq!(fanout.group_of(conn).await, Some(Group::Room(1)));
        assert!(fanout.members(Group::Lobby).await.is_empty());
        assert_eq!(fanout.members(Group::Room(1)).await, vec![conn]);
    }

    #[tokio::test]
    async fn test_subscribe_requires_attach() {
        let fanout = Fanout::new(8);
        assert!(!fanout.subscribe(ConnectionId::new(), Group::Lobby).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_group_only() {
        let fanout = Fanout::new(8);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let mut rx_a = fanout.attach(a).await;
        let mut rx_b = fanout.attach(b).await;
        fanout.subscribe(a, Group::Room(1)).await;
        fanout.subscribe(b, Group::Lobby).await;

        assert_eq!(fanout.broadcast(pong(), Group::Room(1)).await, 1);

        assert_eq!(rx_a.recv().await.unwrap(), pong());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_event() {
        let fanout = Fanout::new(1);
        let conn = ConnectionId::new();
        let mut rx = fanout.attach(conn).await;

        assert!(fanout.unicast(ServerEvent::error("first", ""), conn).await);
        assert!(fanout.unicast(ServerEvent::error("second", ""), conn).await);

        assert_eq!(rx.recv().await.unwrap(), ServerEvent::error("first", ""));
        assert!(rx.try_recv().is_err());
        assert_eq!(fanout.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_closed_queue_detaches() {
        let fanout = Fanout::new(4);
        let conn = ConnectionId::new();
        let rx = fanout.attach(conn).await;
        fanout.subscribe(conn, Group::Lobby).await;
        drop(rx);

        fanout.broadcast(pong(), Group::Lobby).await;

        assert_eq!(fanout.connection_count().await, 0);
        assert!(fanout.members(Group::Lobby).await.is_empty());
    }

    #[tokio::test]
    async fn test_detach_is_idempotent_and_closes_queue() {
        let fanout = Fanout::new(4);
        let conn = ConnectionId::new();
        let mut rx = fanout.attach(conn).await;
        fanout.subscribe(conn, Group::Room(2)).await;
        fanout.unicast(pong(), conn).await;

        assert!(fanout.detach(conn).await);
        assert!(!fanout.detach(conn).await);

        assert_eq!(rx.recv().await.unwrap(), pong());
        assert!(rx.recv().await.is_none());
        assert!(fanout.members(Group::Room(2)).await.is_empty());
    }
}
