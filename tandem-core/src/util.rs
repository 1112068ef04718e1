/// Milliseconds since the unix epoch, the timestamp unit used on the wire.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
