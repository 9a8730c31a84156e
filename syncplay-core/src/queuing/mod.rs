mod play_queue;

use std::fmt::Display;

pub use play_queue::*;
use serde::{Deserialize, Serialize};

use crate::ItemId;

/// A stable handle for an item-position pair in a play queue.
///
/// Assigned at insertion and never reused within the queue's lifetime,
/// so it survives reorder and shuffle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaylistItemId(String);

impl PlaylistItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PlaylistItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PlaylistItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for PlaylistItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// A single entry in a play queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueItem {
    pub item_id: ItemId,
    pub playlist_item_id: PlaylistItemId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShuffleMode {
    #[default]
    Sorted,
    Shuffle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    RepeatOne,
    RepeatAll,
    #[default]
    RepeatNone,
}
