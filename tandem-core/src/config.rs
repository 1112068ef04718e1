use std::time::Duration;

/// The configuration of the connection hub
#[derive(Debug, Clone)]
pub struct Config {
    /// How often every connection is pinged
    pub ping_interval: Duration,
    /// How long a connection has to answer a ping
    pub pong_timeout: Duration,
    /// How many pings in a row can go unanswered before the connection is closed
    pub max_missed_pongs: u32,
    /// How many outbound messages can be queued for a single connection
    pub outbound_capacity: usize,
    /// How long shutdown waits for connections to be released
    pub shutdown_grace: Duration,
}

impl Config {
    /// The longest a dead connection can stay registered before the heartbeat notices it
    pub fn max_detection_delay(&self) -> Duration {
        (self.ping_interval + self.pong_timeout) * self.max_missed_pongs
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(10),
            // Two misses so a single dropped packet doesn't kick anyone
            max_missed_pongs: 2,
            outbound_capacity: 64,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}
