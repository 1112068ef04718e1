use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use log::{debug, info};
use tokio::{sync::mpsc, time};

use crate::{Config, RoomId, UserId};

use super::{CloseReason, ConnectionId, ConnectionState, Hub, Outbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatResult {
    /// The client stopped answering and was closed
    TimedOut,
    /// The connection was closed for another reason
    Cancelled,
}

/// Everything a heartbeat task needs to watch a single connection.
pub(crate) struct Heartbeat<M> {
    pub hub: Weak<Hub<M>>,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub sender: mpsc::Sender<Outbound<M>>,
    pub state: Arc<ConnectionState>,
    pub config: Config,
}

impl<M> Heartbeat<M>
where
    M: Clone + Send + Sync + 'static,
{
    /// Pings the connection every interval and closes it once
    /// too many pings in a row went unanswered.
    pub async fn run(self) -> HeartbeatResult {
        let max_missed = self.config.max_missed_pongs.max(1);
        let mut missed = 0;

        loop {
            if !self.wait(self.config.ping_interval).await {
                return HeartbeatResult::Cancelled;
            }

            self.state.reset_alive();

            // A full queue counts as an unanswered ping, overflow is the broadcaster's business
            let _ = self.sender.try_send(Outbound::Ping);

            if !self.wait(self.config.pong_timeout).await {
                return HeartbeatResult::Cancelled;
            }

            if self.state.take_alive() {
                missed = 0;
                continue;
            }

            missed += 1;
            debug!(
                "User {} missed {} pong(s) in room {}",
                self.user_id, missed, self.room_id
            );

            if missed >= max_missed {
                info!(
                    "Connection {} of user {} in room {} timed out",
                    self.connection_id, self.user_id, self.room_id
                );

                self.state.close(CloseReason::HeartbeatTimeout);

                if let Some(hub) = self.hub.upgrade() {
                    hub.unregister(&self.room_id, self.user_id, self.connection_id);
                }

                return HeartbeatResult::TimedOut;
            }
        }
    }

    /// Returns false if the connection closed while waiting
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.state.closed() => false,
            _ = time::sleep(duration) => true,
        }
    }
}
