//! Channel state, notification and metrics types
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PortState {
    Closed,
    Open,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Closed => f.write_str("closed"),
            PortState::Open => f.write_str("open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SerialEvent {
    /// Raised once for every transport push that landed at least one byte
    DataReceived { bytes_to_read: usize },
    /// Raised once when an overrun episode begins; `dropped` counts the bytes lost
    /// by the push that started it
    BufferOverrun { dropped: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelMetrics {
    pub opens: u64,
    pub bytes_received: u64,
    pub bytes_dropped: u64,
    pub overrun_episodes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_timeouts: u64,
    pub write_timeouts: u64,
    pub last_activity: Option<DateTime<Utc>>,
}
