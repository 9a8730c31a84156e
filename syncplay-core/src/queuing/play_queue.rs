use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use rand::seq::SliceRandom;

use super::{PlaylistItemId, QueueItem, RepeatMode, ShuffleMode};
use crate::{Clock, ItemId};

/// An ordered playlist with a cursor, shuffle and repeat modes, and a
/// monotonic change version.
///
/// The canonical (sorted) order is kept in `items`; shuffling overlays a
/// permutation of playlist item ids on top of it instead of discarding the
/// original order, so restoring [ShuffleMode::Sorted] recovers it exactly.
pub struct PlayQueue {
    clock: Arc<dyn Clock>,
    /// Entries in canonical order.
    items: Vec<QueueItem>,
    /// The visible order while shuffled. Empty in sorted mode.
    shuffled: Vec<PlaylistItemId>,
    /// Cursor into the visible order.
    current: Option<usize>,
    shuffle_mode: ShuffleMode,
    repeat_mode: RepeatMode,
    id_counter: AtomicCell<u64>,
    change_version: u64,
    last_change: DateTime<Utc>,
}

impl PlayQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();

        Self {
            clock,
            items: vec![],
            shuffled: vec![],
            current: None,
            shuffle_mode: Default::default(),
            repeat_mode: Default::default(),
            id_counter: AtomicCell::new(1),
            change_version: 0,
            last_change: now,
        }
    }

    /// Empties the queue. Playlist item ids are not reused afterwards.
    pub fn reset(&mut self) {
        self.items.clear();
        self.shuffled.clear();
        self.current = None;
        self.touch();
    }

    /// Replaces the queue contents. The cursor moves to the first visible item.
    pub fn set_playlist(&mut self, item_ids: &[ItemId]) {
        self.items = self.mint(item_ids);

        if self.shuffle_mode == ShuffleMode::Shuffle {
            self.shuffled = self.items.iter().map(|i| i.playlist_item_id.clone()).collect();
            self.shuffled.shuffle(&mut rand::thread_rng());
        }

        self.current = (!self.items.is_empty()).then_some(0);
        self.touch();
    }

    /// Moves the cursor to the given visible index.
    pub fn set_playing_item_by_index(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }

        self.current = Some(index);
        self.touch();
        true
    }

    /// Moves the cursor to the entry with the given playlist item id.
    pub fn set_playing_item_by_playlist_id(&mut self, playlist_item_id: &PlaylistItemId) -> bool {
        match self.visible_position(playlist_item_id) {
            Some(index) => {
                self.current = Some(index);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Moves the cursor to the first visible occurrence of the given item.
    pub fn set_playing_item_by_item_id(&mut self, item_id: ItemId) -> bool {
        let found = (0..self.items.len()).find(|i| self.entry_at(*i).item_id == item_id);

        match found {
            Some(index) => {
                self.current = Some(index);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Appends items to the end of the queue.
    pub fn queue(&mut self, item_ids: &[ItemId]) {
        let minted = self.mint(item_ids);

        if self.shuffle_mode == ShuffleMode::Shuffle {
            self.shuffled
                .extend(minted.iter().map(|i| i.playlist_item_id.clone()));
        }

        self.items.extend(minted);

        if self.current.is_none() && !self.items.is_empty() {
            self.current = Some(0);
        }

        self.touch();
    }

    /// Inserts items immediately after the current one in the visible order.
    ///
    /// Without a current item this behaves like [PlayQueue::queue].
    pub fn queue_next(&mut self, item_ids: &[ItemId]) {
        let Some(current) = self.current else {
            self.queue(item_ids);
            return;
        };

        let minted = self.mint(item_ids);
        let current_id = self.entry_at(current).playlist_item_id.clone();

        // The canonical list inserts after the current item's canonical slot,
        // so sorted mode sees the new items in the same relative spot.
        let canonical = self
            .canonical_position(&current_id)
            .expect("current item exists in canonical order");

        if self.shuffle_mode == ShuffleMode::Shuffle {
            let ids = minted.iter().map(|i| i.playlist_item_id.clone());
            self.shuffled.splice(current + 1..current + 1, ids);
        }

        self.items.splice(canonical + 1..canonical + 1, minted);
        self.touch();
    }

    /// Moves an entry to a new visible index. The cursor keeps following the
    /// item it was on.
    pub fn move_playlist_item(&mut self, playlist_item_id: &PlaylistItemId, new_index: usize) -> bool {
        let Some(from) = self.visible_position(playlist_item_id) else {
            return false;
        };

        let current_id = self.current.map(|i| self.entry_at(i).playlist_item_id.clone());
        let to = new_index.min(self.items.len() - 1);

        match self.shuffle_mode {
            ShuffleMode::Sorted => {
                let entry = self.items.remove(from);
                self.items.insert(to, entry);
            }
            ShuffleMode::Shuffle => {
                let id = self.shuffled.remove(from);
                self.shuffled.insert(to, id);
            }
        }

        self.current = current_id.and_then(|id| self.visible_position(&id));
        self.touch();
        true
    }

    /// Removes all matching entries. Returns true iff the currently playing
    /// item was among them.
    ///
    /// When the playing item is removed the cursor advances to the next
    /// surviving item, wrapping to the start if there is none after it.
    pub fn remove_from_playlist(&mut self, playlist_item_ids: &[PlaylistItemId]) -> bool {
        let old_order: Vec<PlaylistItemId> = (0..self.items.len())
            .map(|i| self.entry_at(i).playlist_item_id.clone())
            .collect();

        let current_id = self.current.map(|i| old_order[i].clone());
        let playing_removed = current_id
            .as_ref()
            .map(|id| playlist_item_ids.contains(id))
            .unwrap_or(false);

        self.items
            .retain(|i| !playlist_item_ids.contains(&i.playlist_item_id));
        self.shuffled.retain(|id| !playlist_item_ids.contains(id));

        if self.items.is_empty() {
            self.current = None;
        } else if playing_removed {
            let old_index = self.current.unwrap_or(0);

            let next_surviving = old_order[old_index + 1..]
                .iter()
                .find(|id| !playlist_item_ids.contains(id));

            self.current = next_surviving
                .and_then(|id| self.visible_position(id))
                .or(Some(0));
        } else {
            self.current = current_id.and_then(|id| self.visible_position(&id));
        }

        self.touch();
        playing_removed
    }

    /// Advances the cursor, honoring the repeat mode. Returns false at the end
    /// under [RepeatMode::RepeatNone], leaving the queue untouched.
    pub fn next(&mut self) -> bool {
        let Some(current) = self.current else {
            return false;
        };

        match self.repeat_mode {
            RepeatMode::RepeatOne => {}
            RepeatMode::RepeatAll => {
                self.current = Some((current + 1) % self.items.len());
            }
            RepeatMode::RepeatNone => {
                if current + 1 >= self.items.len() {
                    return false;
                }

                self.current = Some(current + 1);
            }
        }

        self.touch();
        true
    }

    /// Backtracks the cursor, honoring the repeat mode.
    pub fn previous(&mut self) -> bool {
        let Some(current) = self.current else {
            return false;
        };

        match self.repeat_mode {
            RepeatMode::RepeatOne => {}
            RepeatMode::RepeatAll => {
                self.current = Some(current.checked_sub(1).unwrap_or(self.items.len() - 1));
            }
            RepeatMode::RepeatNone => match current.checked_sub(1) {
                Some(previous) => self.current = Some(previous),
                None => return false,
            },
        }

        self.touch();
        true
    }

    /// Switches between sorted and shuffled views, keeping the currently
    /// playing item selected.
    ///
    /// Entering shuffle places the playing item first in the shuffled view.
    pub fn set_shuffle_mode(&mut self, mode: ShuffleMode) {
        let current_id = self.current.map(|i| self.entry_at(i).playlist_item_id.clone());

        self.shuffle_mode = mode;

        match mode {
            ShuffleMode::Shuffle => {
                let mut rest: Vec<PlaylistItemId> = self
                    .items
                    .iter()
                    .map(|i| i.playlist_item_id.clone())
                    .filter(|id| Some(id) != current_id.as_ref())
                    .collect();

                rest.shuffle(&mut rand::thread_rng());

                self.shuffled = current_id.clone().into_iter().chain(rest).collect();
                self.current = current_id.map(|_| 0);
            }
            ShuffleMode::Sorted => {
                self.shuffled.clear();
                self.current = current_id.and_then(|id| self.canonical_position(&id));
            }
        }

        self.touch();
    }

    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
        self.touch();
    }

    /// The queue in its current visible order.
    pub fn playlist(&self) -> Vec<QueueItem> {
        (0..self.items.len()).map(|i| self.entry_at(i).clone()).collect()
    }

    pub fn current_item(&self) -> Option<&QueueItem> {
        self.current.map(|i| self.entry_at(i))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn shuffle_mode(&self) -> ShuffleMode {
        self.shuffle_mode
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    pub fn change_version(&self) -> u64 {
        self.change_version
    }

    pub fn last_change(&self) -> DateTime<Utc> {
        self.last_change
    }

    /// Creates queue entries with fresh playlist item ids.
    fn mint(&self, item_ids: &[ItemId]) -> Vec<QueueItem> {
        item_ids
            .iter()
            .map(|item_id| QueueItem {
                item_id: *item_id,
                playlist_item_id: self.id_counter.fetch_add(1).to_string().into(),
            })
            .collect()
    }

    /// The entry at a visible index.
    fn entry_at(&self, index: usize) -> &QueueItem {
        match self.shuffle_mode {
            ShuffleMode::Sorted => &self.items[index],
            ShuffleMode::Shuffle => {
                let id = &self.shuffled[index];

                self.items
                    .iter()
                    .find(|i| &i.playlist_item_id == id)
                    .expect("shuffled view only holds ids of existing entries")
            }
        }
    }

    fn visible_position(&self, playlist_item_id: &PlaylistItemId) -> Option<usize> {
        match self.shuffle_mode {
            ShuffleMode::Sorted => self.canonical_position(playlist_item_id),
            ShuffleMode::Shuffle => self.shuffled.iter().position(|id| id == playlist_item_id),
        }
    }

    fn canonical_position(&self, playlist_item_id: &PlaylistItemId) -> Option<usize> {
        self.items
            .iter()
            .position(|i| &i.playlist_item_id == playlist_item_id)
    }

    fn touch(&mut self) {
        self.change_version += 1;
        self.last_change = self.clock.now();
    }
}
