use async_trait::async_trait;
use syncplay_core::ItemId;
use thiserror::Error;

use crate::{OutboundMessage, SessionId, UserId};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Session {0} is not connected")]
    SessionGone(SessionId),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Represents a type that tracks connected client sessions and can deliver
/// messages to them.
///
/// Delivery is the only awaitable operation in the coordinator; everything
/// else is resolved synchronously under the relevant lock.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    fn session_by_id(&self, session_id: &SessionId) -> Option<SessionInfo>;

    /// Resolves a session from its transport token.
    fn session_by_token(&self, token: &str) -> Option<SessionInfo>;

    fn active_sessions(&self) -> Vec<SessionInfo>;

    /// Delivers a message to a client session.
    async fn deliver(
        &self,
        session_id: &SessionId,
        message: OutboundMessage,
    ) -> Result<(), DeliveryError>;
}

/// A snapshot of a connected session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user_id: UserId,
    pub user_name: String,
    pub device_name: String,
    /// What the session is playing on its own, if anything. Used to seed a
    /// group created mid-playback.
    pub now_playing: Option<NowPlaying>,
}

/// A session's local playback state at the time it was observed.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub queue: Vec<ItemId>,
    pub playing_item_index: usize,
    pub position_ticks: i64,
    pub is_paused: bool,
}
