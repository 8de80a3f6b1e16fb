//! Timestamp helpers

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

pub const MS_PER_SECOND: u64 = 1_000;
pub const MS_PER_HOUR: u64 = 3_600_000;
pub const MS_PER_DAY: u64 = 86_400_000;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Whole seconds elapsed between two timestamps, zero if `to` precedes `from`
pub fn elapsed_secs(from: Timestamp, to: Timestamp) -> u64 {
    to.saturating_sub(from) / MS_PER_SECOND
}
