use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::ConnectionStatus;

/// Statistics about the current (or last) conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Id of the active session, if any
    pub session_id: Option<String>,

    pub status: ConnectionStatus,

    /// When the active session started
    pub started_at: Option<DateTime<Utc>>,

    /// Time since start in seconds (0 when idle)
    pub duration_secs: f64,

    /// Completed user/AI exchanges in the active session
    pub turns_completed: usize,

    /// Messages delivered since the controller was created
    pub messages_count: usize,
}
