//! Connection statistics (spec §3 / §6). Plain counters updated in-place
//! by whichever component observes the event; snapshotted by `getInfo()`.

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct Stats {
    pub bytes_read: u64,
    pub bytes_sent: u64,
    pub frames_read: u64,
    pub frames_sent: u64,
    pub messages_read: u64,
    pub messages_sent: u64,
    pub connected_at: Instant,
    /// `None` until the local side has sent a Close frame — the Rust
    /// rendition of the reference's `closedAt == 0` sentinel.
    pub closed_at: Option<Instant>,
    pub last_read_at: Option<Instant>,
    pub last_sent_at: Option<Instant>,
    pub last_data_read_at: Option<Instant>,
    pub last_data_sent_at: Option<Instant>,
}

impl Stats {
    pub fn new(connected_at: Instant) -> Self {
        Self {
            bytes_read: 0,
            bytes_sent: 0,
            frames_read: 0,
            frames_sent: 0,
            messages_read: 0,
            messages_sent: 0,
            connected_at,
            closed_at: None,
            last_read_at: None,
            last_sent_at: None,
            last_data_read_at: None,
            last_data_sent_at: None,
        }
    }
}

/// Snapshot returned by `Endpoint::get_info`.
pub type ConnectionStats = Stats;
