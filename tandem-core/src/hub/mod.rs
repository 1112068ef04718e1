mod connection;
mod heartbeat;

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
};

use dashmap::DashMap;
use log::{info, warn};
use tokio::{sync::mpsc, time};

pub use connection::*;
use heartbeat::Heartbeat;

use crate::{Config, RoomId, UserId};

/// Owns every live connection, keyed by room and user.
///
/// There is at most one connection per user per room. Delivery never blocks:
/// each connection has its own bounded queue and a connection that can't keep up
/// is closed instead of holding up everyone else in the room.
pub struct Hub<M> {
    me: Weak<Self>,
    config: Config,
    rooms: DashMap<RoomId, HashMap<UserId, Connection<M>>>,
    live: Arc<LiveConnections>,
    shutting_down: AtomicBool,
}

impl<M> Hub<M>
where
    M: Clone + Send + Sync + 'static,
{
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            rooms: Default::default(),
            live: Default::default(),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a new connection for a user in a room.
    /// An existing connection for the same pair is closed and replaced.
    pub fn register(&self, room_id: &str, user_id: UserId) -> Registration<M> {
        let (sender, outbound) = mpsc::channel(self.config.outbound_capacity.max(1));
        let state = Arc::new(ConnectionState::new(self.live.clone()));

        let handle = ConnectionHandle {
            id: ConnectionId::next(),
            room_id: room_id.to_string(),
            user_id,
            state: state.clone(),
        };

        if self.shutting_down.load(Ordering::Acquire) {
            handle.close(CloseReason::ServerShutdown);
            return Registration { handle, outbound };
        }

        let connection = Connection::new(handle.id, sender.clone(), state.clone());

        let replaced = self
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id, connection);

        if let Some(previous) = replaced {
            info!(
                "Connection {} of user {} in room {} replaced by {}",
                previous.id, user_id, room_id, handle.id
            );

            previous.close(CloseReason::ReplacedByNewConnection);
        }

        let heartbeat = Heartbeat {
            hub: self.me.clone(),
            room_id: handle.room_id.clone(),
            user_id,
            connection_id: handle.id,
            sender,
            state,
            config: self.config.clone(),
        };

        tokio::spawn(heartbeat.run());

        Registration { handle, outbound }
    }

    /// Removes a connection, but only if it is still the one registered for the pair.
    /// Returns whether anything was removed.
    pub fn unregister(&self, room_id: &str, user_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                let is_current = room.get(&user_id).map(|c| c.id) == Some(connection_id);

                if is_current {
                    room.remove(&user_id);
                }

                is_current
            }
            None => false,
        };

        self.rooms.remove_if(room_id, |_, room| room.is_empty());
        removed
    }

    /// Closes and removes whatever connection a user has in a room.
    pub fn close_connection(&self, room_id: &str, user_id: UserId, reason: CloseReason) -> bool {
        let removed = self
            .rooms
            .get_mut(room_id)
            .and_then(|mut room| room.remove(&user_id));

        self.rooms.remove_if(room_id, |_, room| room.is_empty());

        match removed {
            Some(connection) => connection.close(reason),
            None => false,
        }
    }

    /// Closes and removes every connection in a room, returning how many there were.
    pub fn close_room(&self, room_id: &str, reason: CloseReason) -> usize {
        let Some((_, room)) = self.rooms.remove(room_id) else {
            return 0;
        };

        for connection in room.values() {
            connection.close(reason);
        }

        room.len()
    }

    /// Sends a message to everyone in the room except the excluded users.
    /// Returns how many connections accepted the message.
    pub fn broadcast(&self, room_id: &str, message: M, exclude: &[UserId]) -> usize {
        self.deliver(room_id, message, |user_id| !exclude.contains(&user_id))
    }

    /// Sends a message to the given users of a room, skipping those not connected.
    pub fn send_to_many(&self, room_id: &str, user_ids: &[UserId], message: M) -> usize {
        self.deliver(room_id, message, |user_id| user_ids.contains(&user_id))
    }

    /// Sends a message to a single user. Not being connected is not an error.
    pub fn send_to(&self, room_id: &str, user_id: UserId, message: M) -> bool {
        self.deliver(room_id, message, |id| id == user_id) > 0
    }

    /// The users currently connected to a room
    pub fn connected_users(&self, room_id: &str) -> Vec<UserId> {
        self.rooms
            .get(room_id)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, room_id: &str, user_id: UserId) -> bool {
        self.rooms
            .get(room_id)
            .map(|room| room.contains_key(&user_id))
            .unwrap_or(false)
    }

    /// The amount of registered connections across all rooms
    pub fn connection_count(&self) -> usize {
        self.rooms.iter().map(|room| room.len()).sum()
    }

    /// Sends a last message to every connection, closes them all, and waits
    /// until they are released or the grace period runs out.
    /// `farewell` builds the last message for each room.
    ///
    /// Returns true if every connection was released in time.
    pub async fn shutdown<F>(&self, farewell: F) -> bool
    where
        F: Fn(&str) -> Option<M>,
    {
        self.shutting_down.store(true, Ordering::Release);

        let room_ids: Vec<_> = self.rooms.iter().map(|r| r.key().clone()).collect();
        let mut closed = 0;

        for room_id in room_ids {
            let Some((_, room)) = self.rooms.remove(&room_id) else {
                continue;
            };

            let message = farewell(&room_id);

            for connection in room.values() {
                if let Some(message) = &message {
                    connection.send(Outbound::Message(message.clone()));
                }

                connection.close(CloseReason::ServerShutdown);
                closed += 1;
            }
        }

        info!("Closed {} connection(s), waiting for them to drain...", closed);

        let drained = time::timeout(self.config.shutdown_grace, self.live.drained())
            .await
            .is_ok();

        if !drained {
            warn!(
                "{} connection(s) were still alive after the shutdown grace period",
                self.live.count()
            );
        }

        drained
    }

    fn deliver<F>(&self, room_id: &str, message: M, filter: F) -> usize
    where
        F: Fn(UserId) -> bool,
    {
        let mut delivered = 0;
        let mut failed = Vec::new();

        if let Some(room) = self.rooms.get(room_id) {
            for (user_id, connection) in room.iter().filter(|(id, _)| filter(**id)) {
                match connection.send(Outbound::Message(message.clone())) {
                    SendOutcome::Sent => delivered += 1,
                    SendOutcome::Closing => {}
                    SendOutcome::Overflowed => {
                        failed.push((*user_id, connection.id, CloseReason::SlowConsumer))
                    }
                    SendOutcome::Disconnected => {
                        failed.push((*user_id, connection.id, CloseReason::ClientClosed))
                    }
                }
            }
        }

        // The room guard is released here, so removing entries can't deadlock
        for (user_id, connection_id, reason) in failed {
            warn!(
                "Dropping connection {} of user {} in room {}: {}",
                connection_id, user_id, room_id, reason
            );

            self.drop_connection(room_id, user_id, connection_id, reason);
        }

        delivered
    }

    fn drop_connection(
        &self,
        room_id: &str,
        user_id: UserId,
        connection_id: ConnectionId,
        reason: CloseReason,
    ) {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut room) if room.get(&user_id).map(|c| c.id) == Some(connection_id) => {
                room.remove(&user_id)
            }
            _ => None,
        };

        self.rooms.remove_if(room_id, |_, room| room.is_empty());

        if let Some(connection) = removed {
            connection.close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    fn make_hub() -> Arc<Hub<String>> {
        Hub::new(Config::default())
    }

    fn next_message(registration: &mut Registration<String>) -> Option<String> {
        loop {
            match registration.outbound.try_recv() {
                Ok(Outbound::Message(message)) => return Some(message),
                Ok(Outbound::Ping) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_second_registration_replaces_the_first() {
        let hub = make_hub();

        let first = hub.register("room", 1);
        let second = hub.register("room", 1);

        assert_eq!(
            first.handle.close_reason(),
            Some(CloseReason::ReplacedByNewConnection)
        );
        assert!(!second.handle.is_closed());
        assert_eq!(hub.connected_users("room"), vec![1]);
        assert_eq!(hub.connection_count(), 1);

        // The stale connection can't remove its successor
        assert!(!hub.unregister("room", 1, first.handle.id));
        assert!(hub.is_connected("room", 1));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = make_hub();
        let registration = hub.register("room", 7);

        assert!(hub.unregister("room", 7, registration.handle.id));
        assert!(!hub.unregister("room", 7, registration.handle.id));
        assert!(!hub.unregister("missing", 7, registration.handle.id));
        assert!(!hub.is_connected("room", 7));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_stays_in_room_and_honours_exclusions() {
        let hub = make_hub();

        let mut first = hub.register("a", 1);
        let mut second = hub.register("a", 2);
        let mut third = hub.register("a", 3);
        let mut outsider = hub.register("b", 1);

        let delivered = hub.broadcast("a", "hello".to_string(), &[2]);

        assert_eq!(delivered, 2);
        assert_eq!(next_message(&mut first).as_deref(), Some("hello"));
        assert_eq!(next_message(&mut second), None, "excluded user got a message");
        assert_eq!(next_message(&mut third).as_deref(), Some("hello"));
        assert_eq!(next_message(&mut outsider), None, "other room got a message");
    }

    #[tokio::test]
    async fn test_send_to_many_only_reaches_listed_users() {
        let hub = make_hub();

        let mut first = hub.register("a", 1);
        let mut second = hub.register("a", 2);

        assert_eq!(hub.send_to_many("a", &[2, 99], "sync".to_string()), 1);
        assert_eq!(next_message(&mut first), None);
        assert_eq!(next_message(&mut second).as_deref(), Some("sync"));
    }

    #[tokio::test]
    async fn test_send_to_offline_user_is_not_delivered() {
        let hub = make_hub();
        let _registration = hub.register("a", 1);

        assert!(!hub.send_to("a", 2, "hi".to_string()));
        assert!(!hub.send_to("b", 1, "hi".to_string()));
        assert!(hub.send_to("a", 1, "hi".to_string()));
    }

    #[tokio::test]
    async fn test_full_queue_drops_the_slow_consumer() {
        let hub = Hub::new(Config {
            outbound_capacity: 1,
            ..Config::default()
        });

        let slow = hub.register("a", 1);
        let mut fast = hub.register("a", 2);

        assert_eq!(hub.broadcast("a", "one".to_string(), &[]), 2);
        next_message(&mut fast);

        // The slow consumer never read "one", so "two" overflows its queue
        assert_eq!(hub.broadcast("a", "two".to_string(), &[]), 1);

        assert_eq!(slow.handle.close_reason(), Some(CloseReason::SlowConsumer));
        assert!(!hub.is_connected("a", 1));
        assert!(hub.is_connected("a", 2));
        assert_eq!(next_message(&mut fast).as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_close_room_closes_everyone_in_it() {
        let hub = make_hub();

        let first = hub.register("a", 1);
        let second = hub.register("a", 2);
        let other = hub.register("b", 3);

        assert_eq!(hub.close_room("a", CloseReason::RoomDisbanded), 2);
        assert_eq!(first.handle.close_reason(), Some(CloseReason::RoomDisbanded));
        assert_eq!(second.handle.close_reason(), Some(CloseReason::RoomDisbanded));
        assert!(!other.handle.is_closed());
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_pings_time_out() {
        let hub = Hub::<String>::new(Config {
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(1),
            max_missed_pongs: 2,
            ..Config::default()
        });

        let mut registration = hub.register("a", 1);

        let reason = registration.handle.closed().await;

        assert_eq!(reason, CloseReason::HeartbeatTimeout);
        assert!(!hub.is_connected("a", 1));
        assert!(
            matches!(registration.outbound.try_recv(), Ok(Outbound::Ping)),
            "the connection should have been pinged"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_pings_keep_the_connection() {
        let hub = Hub::<String>::new(Config {
            ping_interval: Duration::from_secs(1),
            pong_timeout: Duration::from_secs(1),
            max_missed_pongs: 2,
            ..Config::default()
        });

        let registration = hub.register("a", 1);

        for _ in 0..20 {
            time::sleep(Duration::from_millis(500)).await;
            registration.handle.mark_alive();
        }

        assert!(!registration.handle.is_closed());
        assert!(hub.is_connected("a", 1));
    }

    #[tokio::test]
    async fn test_shutdown_says_goodbye_and_drains() {
        let hub = make_hub();

        let owners: Vec<_> = [("a", 1), ("a", 2), ("b", 3)]
            .into_iter()
            .map(|(room, user)| {
                let mut registration = hub.register(room, user);

                tokio::spawn(async move {
                    let reason = registration.handle.closed().await;
                    let farewell = next_message(&mut registration);

                    (reason, farewell)
                })
            })
            .collect();

        assert!(hub.shutdown(|room| Some(format!("bye from {}", room))).await);
        assert_eq!(hub.connection_count(), 0);

        for owner in owners {
            let (reason, farewell) = owner.await.unwrap();

            assert_eq!(reason, CloseReason::ServerShutdown);
            assert!(farewell.unwrap().starts_with("bye from "));
        }

        let late = hub.register("a", 4);
        assert_eq!(late.handle.close_reason(), Some(CloseReason::ServerShutdown));
    }
}
