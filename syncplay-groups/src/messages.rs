use chrono::{DateTime, Utc};
use serde::Serialize;
use syncplay_core::{PlaylistItemId, QueueItem, RepeatMode, ShuffleMode};

use crate::{GroupId, GroupStateType, RequestType, SessionId};

/// A message bound for a client session.
///
/// Messages are composed under the group lock and dispatched through the
/// session registry after the lock is released.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "MessageType")]
pub enum OutboundMessage {
    GroupUpdate(GroupUpdate),
    SyncPlayCommand(SyncPlayCommand),
}

/// A group-scoped notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupUpdate {
    pub group_id: GroupId,
    #[serde(flatten)]
    pub update: GroupUpdateKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "Type", content = "Data")]
pub enum GroupUpdateKind {
    GroupDoesNotExist(String),
    CreateGroupDenied(String),
    JoinGroupDenied(String),
    LibraryAccessDenied(String),
    NotInGroup(String),
    GroupJoined(GroupInfo),
    GroupLeft,
    UserJoined(String),
    UserLeft(String),
    /// A group's settings changed.
    #[serde(rename = "GroupUpdate")]
    SettingsUpdate(GroupInfo),
    StateUpdate(StateUpdate),
    PlayQueue(PlayQueueUpdate),
    #[serde(rename = "WebRTC")]
    WebRtc(WebRtcSignal),
}

/// A snapshot of a group, as sent to clients and returned by listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GroupInfo {
    pub group_id: GroupId,
    pub group_name: String,
    pub state: GroupStateType,
    pub participants: Vec<String>,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateUpdate {
    pub state: GroupStateType,
    pub reason: RequestType,
}

/// Why a play queue update was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlayQueueUpdateReason {
    NewPlaylist,
    SetCurrentItem,
    RemoveItems,
    MoveItem,
    Queue,
    QueueNext,
    NextItem,
    PreviousItem,
    RepeatMode,
    ShuffleMode,
}

/// Everything a client needs to reconcile its local queue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayQueueUpdate {
    pub reason: PlayQueueUpdateReason,
    pub last_update: DateTime<Utc>,
    pub playlist: Vec<QueueItem>,
    /// Index of the playing item in the visible order, -1 when none.
    pub playing_item_index: i32,
    pub start_position_ticks: i64,
    pub is_playing: bool,
    pub shuffle_mode: ShuffleMode,
    pub repeat_mode: RepeatMode,
}

/// A scheduled playback command.
///
/// Clients compare their synchronized clock to `when` to time the action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncPlayCommand {
    pub group_id: GroupId,
    pub playlist_item_id: Option<PlaylistItemId>,
    pub when: DateTime<Utc>,
    pub position_ticks: i64,
    pub command: CommandType,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandType {
    Unpause,
    Pause,
    Stop,
    Seek,
    PlaybackRateChange,
}

/// A relayed WebRTC signaling payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebRtcSignal {
    pub from_session_id: SessionId,
    pub is_new_session: bool,
    pub is_leaving: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ice_candidate: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offer: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<serde_json::Value>,
}

/// Which members of a group receive a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastAudience {
    CurrentSession,
    AllGroup,
    AllExceptCurrentSession,
    /// Members that are not buffering, plus those opting out of waiting.
    AllReady,
}

/// Messages composed during one logical request, in order.
#[derive(Debug, Default)]
pub struct Outbox {
    messages: Vec<(SessionId, OutboundMessage)>,
}

impl Outbox {
    pub fn push(&mut self, to: SessionId, message: OutboundMessage) {
        self.messages.push((to, message));
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[(SessionId, OutboundMessage)] {
        &self.messages
    }

    /// Groups messages per recipient, preserving composition order within
    /// each batch. Dispatch is concurrent across recipients but ordered for
    /// any single one.
    pub fn into_batches(self) -> Vec<(SessionId, Vec<OutboundMessage>)> {
        let mut batches: Vec<(SessionId, Vec<OutboundMessage>)> = vec![];

        for (to, message) in self.messages {
            match batches.iter_mut().find(|(session, _)| session == &to) {
                Some((_, batch)) => batch.push(message),
                None => batches.push((to, vec![message])),
            }
        }

        batches
    }
}
