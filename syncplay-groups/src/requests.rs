use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use syncplay_core::{ItemId, PlaylistItemId, RepeatMode, ShuffleMode};

use crate::{SessionId, UserId};

/// Who may see and join a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupVisibility {
    #[default]
    Public,
    InviteOnly,
    Private,
}

/// Parameters for creating a new group.
#[derive(Debug, Clone)]
pub struct NewGroupRequest {
    pub group_name: String,
    pub visibility: GroupVisibility,
    pub invited_users: Vec<UserId>,
    pub open_playback_access: bool,
    pub open_playlist_access: bool,
}

/// An explicit permission row in a settings update.
#[derive(Debug, Clone)]
pub struct UserPermissionRow {
    pub user_id: UserId,
    pub playback: bool,
    pub playlist: bool,
}

/// Parameters for an administrator updating a group's settings.
#[derive(Debug, Clone, Default)]
pub struct GroupSettingsRequest {
    pub group_name: Option<String>,
    pub visibility: Option<GroupVisibility>,
    pub invited_users: Option<Vec<UserId>>,
    pub open_playback_access: Option<bool>,
    pub open_playlist_access: Option<bool>,
    pub user_permissions: Vec<UserPermissionRow>,
}

/// Where queued items are inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMode {
    Queue,
    QueueNext,
}

/// A WebRTC signaling payload to relay through the group.
#[derive(Debug, Clone, Default)]
pub struct WebRtcRequest {
    /// The session to relay to. Empty means everyone except the sender.
    pub to: Option<SessionId>,
    pub new_session: bool,
    pub session_leaving: bool,
    pub ice_candidate: Option<serde_json::Value>,
    pub offer: Option<serde_json::Value>,
    pub answer: Option<serde_json::Value>,
}

/// A playback request from a client session, dispatched to the group's
/// current state.
#[derive(Debug, Clone)]
pub enum PlaybackRequest {
    Play {
        queue: Vec<ItemId>,
        playing_item_position: usize,
        start_position_ticks: i64,
    },
    SetPlaylistItem {
        playlist_item_id: PlaylistItemId,
    },
    RemoveFromPlaylist {
        playlist_item_ids: Vec<PlaylistItemId>,
    },
    MovePlaylistItem {
        playlist_item_id: PlaylistItemId,
        new_index: usize,
    },
    Queue {
        item_ids: Vec<ItemId>,
        mode: QueueMode,
    },
    Unpause,
    Pause,
    Stop,
    Seek {
        position_ticks: i64,
    },
    /// A member reports it is loading and cannot keep up.
    Buffering {
        when: DateTime<Utc>,
        position_ticks: i64,
        is_playing: bool,
        playlist_item_id: PlaylistItemId,
    },
    /// A member reports local playback can resume at the given position.
    Ready {
        when: DateTime<Utc>,
        position_ticks: i64,
        is_playing: bool,
        playlist_item_id: PlaylistItemId,
    },
    SetIgnoreWait {
        ignore_wait: bool,
    },
    NextTrack {
        playlist_item_id: PlaylistItemId,
    },
    PreviousTrack {
        playlist_item_id: PlaylistItemId,
    },
    SetRepeatMode {
        mode: RepeatMode,
    },
    SetShuffleMode {
        mode: ShuffleMode,
    },
    Ping {
        ping_ms: f64,
    },
}

/// Type tag of a [PlaybackRequest], used in state updates and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestType {
    Play,
    SetPlaylistItem,
    RemoveFromPlaylist,
    MovePlaylistItem,
    Queue,
    Unpause,
    Pause,
    Stop,
    Seek,
    Buffering,
    Ready,
    SetIgnoreWait,
    NextTrack,
    PreviousTrack,
    SetRepeatMode,
    SetShuffleMode,
    Ping,
}

/// The permission a request requires from a non-administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredPermission {
    Playback,
    Playlist,
}

impl PlaybackRequest {
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Play { .. } => RequestType::Play,
            Self::SetPlaylistItem { .. } => RequestType::SetPlaylistItem,
            Self::RemoveFromPlaylist { .. } => RequestType::RemoveFromPlaylist,
            Self::MovePlaylistItem { .. } => RequestType::MovePlaylistItem,
            Self::Queue { .. } => RequestType::Queue,
            Self::Unpause => RequestType::Unpause,
            Self::Pause => RequestType::Pause,
            Self::Stop => RequestType::Stop,
            Self::Seek { .. } => RequestType::Seek,
            Self::Buffering { .. } => RequestType::Buffering,
            Self::Ready { .. } => RequestType::Ready,
            Self::SetIgnoreWait { .. } => RequestType::SetIgnoreWait,
            Self::NextTrack { .. } => RequestType::NextTrack,
            Self::PreviousTrack { .. } => RequestType::PreviousTrack,
            Self::SetRepeatMode { .. } => RequestType::SetRepeatMode,
            Self::SetShuffleMode { .. } => RequestType::SetShuffleMode,
            Self::Ping { .. } => RequestType::Ping,
        }
    }

    /// What a non-administrator needs to issue this request. Ping is exempt.
    pub fn required_permission(&self) -> Option<RequiredPermission> {
        match self {
            Self::Play { .. }
            | Self::Unpause
            | Self::Pause
            | Self::Stop
            | Self::Seek { .. }
            | Self::Buffering { .. }
            | Self::Ready { .. }
            | Self::SetIgnoreWait { .. }
            | Self::NextTrack { .. }
            | Self::PreviousTrack { .. } => Some(RequiredPermission::Playback),
            Self::SetPlaylistItem { .. }
            | Self::Queue { .. }
            | Self::RemoveFromPlaylist { .. }
            | Self::MovePlaylistItem { .. }
            | Self::SetRepeatMode { .. }
            | Self::SetShuffleMode { .. } => Some(RequiredPermission::Playlist),
            Self::Ping { .. } => None,
        }
    }
}
