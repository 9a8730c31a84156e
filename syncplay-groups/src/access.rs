use std::collections::{HashMap, HashSet};

use crate::{PlaybackRequest, RequiredPermission, UserId};

/// A user's resolved permission pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub playback: bool,
    pub playlist: bool,
}

/// Per-group access control.
///
/// Users without an explicit entry fall back to the open defaults;
/// administrators always pass.
#[derive(Debug)]
pub struct AccessList {
    administrators: HashSet<UserId>,
    entries: HashMap<UserId, Permissions>,
    open_playback_access: bool,
    open_playlist_access: bool,
}

impl AccessList {
    pub fn new(open_playback_access: bool, open_playlist_access: bool) -> Self {
        Self {
            administrators: Default::default(),
            entries: Default::default(),
            open_playback_access,
            open_playlist_access,
        }
    }

    pub fn add_administrator(&mut self, user_id: UserId) {
        self.administrators.insert(user_id);
    }

    pub fn is_administrator(&self, user_id: UserId) -> bool {
        self.administrators.contains(&user_id)
    }

    pub fn set_open_access(&mut self, playback: Option<bool>, playlist: Option<bool>) {
        if let Some(playback) = playback {
            self.open_playback_access = playback;
        }

        if let Some(playlist) = playlist {
            self.open_playlist_access = playlist;
        }
    }

    /// Materializes an entry with the current defaults for a user that has
    /// joined at least once. Existing entries are left alone.
    pub fn touch_permissions(&mut self, user_id: UserId) {
        let defaults = Permissions {
            playback: self.open_playback_access,
            playlist: self.open_playlist_access,
        };

        self.entries.entry(user_id).or_insert(defaults);
    }

    /// Explicitly overrides a user's permissions.
    pub fn set_permissions(&mut self, user_id: UserId, playback: bool, playlist: bool) {
        self.entries.insert(user_id, Permissions { playback, playlist });
    }

    /// Drops a user's entry, reverting to the defaults on the next touch.
    pub fn clear_permissions(&mut self, user_id: UserId) {
        self.entries.remove(&user_id);
    }

    /// A user's effective permissions.
    pub fn resolve(&self, user_id: UserId) -> Permissions {
        if self.is_administrator(user_id) {
            return Permissions {
                playback: true,
                playlist: true,
            };
        }

        self.entries.get(&user_id).copied().unwrap_or(Permissions {
            playback: self.open_playback_access,
            playlist: self.open_playlist_access,
        })
    }

    /// Whether a user may issue the given request.
    pub fn check_request(&self, user_id: UserId, request: &PlaybackRequest) -> bool {
        let permissions = self.resolve(user_id);

        match request.required_permission() {
            Some(RequiredPermission::Playback) => permissions.playback,
            Some(RequiredPermission::Playlist) => permissions.playlist,
            None => true,
        }
    }
}
