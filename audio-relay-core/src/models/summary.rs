use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::StreamEnd;
use super::stats::{PumpStats, RelayStats};

/// Record of one finished relay session.
///
/// Serializable for log export; produced when the controller consumes the
/// session after its relay-ended notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub format: String,
    pub frame_ms: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end: Option<StreamEnd>,
    pub buffer: RelayStats,
    pub pump: PumpStats,
}

impl SessionSummary {
    pub fn duration_secs(&self) -> f64 {
        (self.ended_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }
}
