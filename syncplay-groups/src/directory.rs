use syncplay_core::ItemId;

use crate::{FolderId, UserId};

/// Represents a type that can resolve users and library items.
///
/// Groups consult this lazily for item access checks and runtime lookups;
/// nothing from it is cached across requests.
pub trait Catalog: Send + Sync {
    fn user_by_id(&self, user_id: UserId) -> Option<UserProfile>;

    /// All known users.
    fn users(&self) -> Vec<UserProfile>;

    fn item_by_id(&self, item_id: ItemId) -> Option<ItemInfo>;
}

/// A user record as seen by the coordinator.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    /// Whether the user's policy allows joining synchronized playback at all.
    pub allows_sync_play: bool,
    /// The highest parental rating the user may play, if capped.
    pub parental_rating_cap: Option<u32>,
    pub enable_all_folders: bool,
    pub enabled_folders: Vec<FolderId>,
}

/// The subset of item metadata the coordinator needs.
#[derive(Debug, Clone)]
pub struct ItemInfo {
    pub id: ItemId,
    pub name: String,
    pub run_time_ticks: Option<i64>,
    pub parental_rating: Option<u32>,
    /// The collection folder the item lives in, if it belongs to one.
    pub collection_folder: Option<FolderId>,
}
