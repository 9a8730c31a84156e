use crate::{SessionId, SessionInfo, UserId};

/// Presence record for a single session within a group.
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub user_name: String,
    /// Round-trip latency estimate in milliseconds.
    pub ping_ms: f64,
    pub is_buffering: bool,
    /// Opts out of blocking group readiness. Commands are still delivered.
    pub ignore_wait: bool,
}

impl GroupMember {
    pub fn new(session: &SessionInfo, default_ping_ms: f64) -> Self {
        Self {
            session_id: session.id.clone(),
            user_id: session.user_id,
            user_name: session.user_name.clone(),
            ping_ms: default_ping_ms,
            is_buffering: false,
            ignore_wait: false,
        }
    }
}
