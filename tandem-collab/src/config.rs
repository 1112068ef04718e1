use std::time::Duration;

/// The configuration of the room orchestrator
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// The capacity of a room when none is requested
    pub default_max_members: u32,
    /// The largest capacity a room can be created with
    pub max_members_limit: u32,
    /// The maximum length of a chat message, in characters
    pub max_message_length: usize,
    /// How often the master is expected to report its position
    pub report_interval: Duration,
    /// The length of generated room ids
    pub room_id_length: usize,
    /// The most messages a single history page can contain
    pub history_page_limit: u32,
}

impl CollabConfig {
    pub const MIN_MEMBERS: u32 = 2;

    /// Clamps a requested capacity into the allowed range, falling back to the default.
    pub fn room_capacity(&self, requested: Option<u32>) -> u32 {
        let limit = self.max_members_limit.max(Self::MIN_MEMBERS);

        requested
            .unwrap_or(self.default_max_members)
            .clamp(Self::MIN_MEMBERS, limit)
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            default_max_members: 10,
            max_members_limit: 50,
            max_message_length: 2000,
            report_interval: Duration::from_secs(3),
            room_id_length: 8,
            history_page_limit: 100,
        }
    }
}
