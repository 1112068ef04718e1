use std::{
    fmt::Display,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Notify,
};
use tokio_util::sync::CancellationToken;

use crate::{RoomId, UserId};

static NEXT_CONNECTION_ID: AtomicCell<u64> = AtomicCell::new(1);

/// Identifies one socket of a user in a room. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}
pub type OutboundReceiver<M> = mpsc::Receiver<Outbound<M>>;

/// Why a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The same user opened another connection to the same room
    ReplacedByNewConnection,
    /// The client stopped answering pings
    HeartbeatTimeout,
    /// The outbound queue filled up
    SlowConsumer,
    /// The client sent something that isn't a protocol frame
    MalformedFrame,
    /// The user explicitly left the room
    Left,
    /// The room was closed by its owner
    RoomDisbanded,
    /// The process is shutting down
    ServerShutdown,
    /// The client closed the socket
    ClientClosed,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReplacedByNewConnection => "replaced_by_new_connection",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::MalformedFrame => "malformed_frame",
            Self::Left => "left",
            Self::RoomDisbanded => "room_disbanded",
            Self::ServerShutdown => "server_shutdown",
            Self::ClientClosed => "client_closed",
        }
    }

    /// Whether losing the connection for this reason means the user is gone from the room.
    ///
    /// A superseded connection has a successor, an explicit leave was already handled,
    /// and disbanding or shutting down is handled for the whole room at once.
    pub fn ends_membership(&self) -> bool {
        matches!(
            self,
            Self::HeartbeatTimeout | Self::SlowConsumer | Self::MalformedFrame | Self::ClientClosed
        )
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item in a connection's outbound queue.
#[derive(Debug)]
pub enum Outbound<M> {
    Message(M),
    /// The writer should send a protocol level ping
    Ping,
}

/// Counts connections whose resources are still held somewhere.
#[derive(Debug, Default)]
pub(crate) struct LiveConnections {
    count: AtomicUsize,
    drained: Notify,
}

impl LiveConnections {
    fn acquire(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once no connection is alive anymore.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();

            if self.count() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// State shared between the hub, the heartbeat task, and the owner of a connection.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    alive: AtomicBool,
    reason: Mutex<Option<CloseReason>>,
    closed: CancellationToken,
    live: Arc<LiveConnections>,
}

impl ConnectionState {
    pub fn new(live: Arc<LiveConnections>) -> Self {
        live.acquire();

        Self {
            alive: AtomicBool::new(true),
            reason: Mutex::new(None),
            closed: CancellationToken::new(),
            live,
        }
    }

    /// Closes the connection. Only the first reason is kept.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut current = self.reason.lock();

            if current.is_some() {
                return false;
            }

            *current = Some(reason);
        }

        self.closed.cancel();
        true
    }

    pub fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Returns whether the connection was marked alive since the last call.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn reset_alive(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }
}

impl Drop for ConnectionState {
    fn drop(&mut self) {
        self.live.release()
    }
}

/// Held by whoever owns the socket of a registered connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub(crate) state: Arc<ConnectionState>,
}

impl ConnectionHandle {
    /// Records that the client showed signs of life.
    pub fn mark_alive(&self) {
        self.state.mark_alive()
    }

    /// Closes the connection, returning false if it was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.state.close(reason)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.reason()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Resolves when the connection is closed, by anyone, and returns why.
    pub async fn closed(&self) -> CloseReason {
        self.state.closed().await;
        self.close_reason().unwrap_or(CloseReason::ClientClosed)
    }
}

/// The result of registering a connection.
#[derive(Debug)]
pub struct Registration<M> {
    pub handle: ConnectionHandle,
    /// Messages the hub wants written to the socket
    pub outbound: OutboundReceiver<M>,
}

pub(crate) enum SendOutcome {
    Sent,
    /// The connection is already closing, nothing to do
    Closing,
    Overflowed,
    Disconnected,
}

/// The hub's side of a registered connection.
pub(crate) struct Connection<M> {
    pub id: ConnectionId,
    sender: mpsc::Sender<Outbound<M>>,
    state: Arc<ConnectionState>,
}

impl<M> Connection<M> {
    pub fn new(
        id: ConnectionId,
        sender: mpsc::Sender<Outbound<M>>,
        state: Arc<ConnectionState>,
    ) -> Self {
        Self { id, sender, state }
    }

    pub fn send(&self, item: Outbound<M>) -> SendOutcome {
        if self.state.is_closed() {
            return SendOutcome::Closing;
        }

        match self.sender.try_send(item) {
            Ok(_) => SendOutcome::Sent,
            Err(TrySendError::Full(_)) => SendOutcome::Overflowed,
            Err(TrySendError::Closed(_)) => SendOutcome::Disconnected,
        }
    }

    pub fn close(&self, reason: CloseReason) -> bool {
        self.state.close(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> (Arc<LiveConnections>, Arc<ConnectionState>) {
        let live = Arc::new(LiveConnections::default());
        let state = Arc::new(ConnectionState::new(live.clone()));

        (live, state)
    }

    #[test]
    fn test_connection_ids_are_never_reused() {
        let first = ConnectionId::next();
        let second = ConnectionId::next();

        assert_ne!(first, second);
        assert!(second.0 > first.0);
        assert_eq!(format!("{}", ConnectionId(7)), "c7");
    }

    #[test]
    fn test_first_close_reason_wins() {
        let (_, state) = make_state();

        assert!(state.close(CloseReason::HeartbeatTimeout));
        assert!(!state.close(CloseReason::ClientClosed));
        assert_eq!(state.reason(), Some(CloseReason::HeartbeatTimeout));
        assert!(state.is_closed());
    }

    #[test]
    fn test_alive_flag_is_consumed() {
        let (_, state) = make_state();

        assert!(state.take_alive(), "new connections start alive");
        assert!(!state.take_alive());

        state.mark_alive();
        assert!(state.take_alive());
    }

    #[test]
    fn test_live_count_follows_state_lifetime() {
        let (live, state) = make_state();
        let other = Arc::new(ConnectionState::new(live.clone()));

        assert_eq!(live.count(), 2);
        drop(state);
        assert_eq!(live.count(), 1);
        drop(other);
        assert_eq!(live.count(), 0);
    }

    #[test]
    fn test_only_client_side_reasons_end_membership() {
        assert!(CloseReason::HeartbeatTimeout.ends_membership());
        assert!(CloseReason::ClientClosed.ends_membership());
        assert!(!CloseReason::ReplacedByNewConnection.ends_membership());
        assert!(!CloseReason::Left.ends_membership());
        assert!(!CloseReason::ServerShutdown.ends_membership());
        assert_eq!(
            CloseReason::ReplacedByNewConnection.to_string(),
            "replaced_by_new_connection"
        );
    }
}
