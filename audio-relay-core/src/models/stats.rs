use serde::{Deserialize, Serialize};

/// Byte accounting for a relay buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub bytes_written: u64,
    pub bytes_read: u64,
    /// Unread bytes dropped to make room for newer audio.
    pub bytes_evicted: u64,
    /// Number of writes that had to evict.
    pub overruns: u64,
}

/// Frame accounting for a pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpStats {
    pub reads_completed: u64,
    pub frames_committed: u64,
    /// Completions that were shorter than requested and zero-filled.
    pub frames_padded: u64,
    pub frames_forwarded: u64,
    pub frames_discarded: u64,
    pub sink_write_failures: u64,
}
