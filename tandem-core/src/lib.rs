//! The connection hub: every live room connection, fan-out delivery and liveness.

mod config;
mod hub;
mod util;

pub use config::*;
pub use hub::{
    CloseReason, ConnectionHandle, ConnectionId, Hub, Outbound, OutboundReceiver, Registration,
};
pub use util::*;

pub type RoomId = String;
pub type UserId = i64;
