//! In-memory doubles for the external collaborators, driven by a manual
//! clock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use syncplay_core::{ItemId, ManualClock, SyncPlayConfig};
use uuid::Uuid;

use crate::{
    Catalog, DeliveryError, GroupUpdate, ItemInfo, NowPlaying, OutboundMessage, PlayQueueUpdate,
    SessionId, SessionInfo, SessionRegistry, SyncPlayCommand, SyncPlayManager, UserProfile,
};

#[derive(Default)]
pub(crate) struct MockCatalog {
    users: Mutex<HashMap<Uuid, UserProfile>>,
    items: Mutex<HashMap<ItemId, ItemInfo>>,
}

impl MockCatalog {
    pub fn add_user(&self, name: &str, allows_sync_play: bool) -> UserProfile {
        let user = UserProfile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            allows_sync_play,
            parental_rating_cap: None,
            enable_all_folders: true,
            enabled_folders: vec![],
        };

        self.users.lock().insert(user.id, user.clone());
        user
    }

    pub fn add_restricted_user(&self, name: &str, parental_rating_cap: u32) -> UserProfile {
        let mut user = self.add_user(name, true);
        user.parental_rating_cap = Some(parental_rating_cap);

        self.users.lock().insert(user.id, user.clone());
        user
    }

    pub fn add_item(&self, run_time_ticks: i64) -> ItemInfo {
        let item = ItemInfo {
            id: Uuid::new_v4(),
            name: format!("item-{}", self.items.lock().len()),
            run_time_ticks: Some(run_time_ticks),
            parental_rating: None,
            collection_folder: None,
        };

        self.items.lock().insert(item.id, item.clone());
        item
    }

    pub fn add_rated_item(&self, run_time_ticks: i64, parental_rating: u32) -> ItemInfo {
        let mut item = self.add_item(run_time_ticks);
        item.parental_rating = Some(parental_rating);

        self.items.lock().insert(item.id, item.clone());
        item
    }
}

impl Catalog for MockCatalog {
    fn user_by_id(&self, user_id: Uuid) -> Option<UserProfile> {
        self.users.lock().get(&user_id).cloned()
    }

    fn users(&self) -> Vec<UserProfile> {
        self.users.lock().values().cloned().collect()
    }

    fn item_by_id(&self, item_id: ItemId) -> Option<ItemInfo> {
        self.items.lock().get(&item_id).cloned()
    }
}

#[derive(Default)]
pub(crate) struct MockRegistry {
    sessions: Mutex<HashMap<SessionId, SessionInfo>>,
    delivered: Mutex<Vec<(SessionId, OutboundMessage)>>,
}

impl MockRegistry {
    pub fn add_session(&self, user: &UserProfile, session_id: &str) -> SessionInfo {
        self.add_playing_session(user, session_id, None)
    }

    pub fn add_playing_session(
        &self,
        user: &UserProfile,
        session_id: &str,
        now_playing: Option<NowPlaying>,
    ) -> SessionInfo {
        let session = SessionInfo {
            id: session_id.to_string(),
            user_id: user.id,
            user_name: user.name.clone(),
            device_name: format!("{}'s device", user.name),
            now_playing,
        };

        self.sessions.lock().insert(session.id.clone(), session.clone());
        session
    }

    pub fn delivered(&self) -> Vec<(SessionId, OutboundMessage)> {
        self.delivered.lock().clone()
    }

    pub fn clear_delivered(&self) {
        self.delivered.lock().clear();
    }

    /// Commands delivered to the given session, in order.
    pub fn commands_to(&self, session_id: &str) -> Vec<SyncPlayCommand> {
        self.delivered()
            .into_iter()
            .filter_map(|(to, message)| match message {
                OutboundMessage::SyncPlayCommand(command) if to == session_id => Some(command),
                _ => None,
            })
            .collect()
    }

    /// Group updates delivered to the given session, in order.
    pub fn updates_to(&self, session_id: &str) -> Vec<GroupUpdate> {
        self.delivered()
            .into_iter()
            .filter_map(|(to, message)| match message {
                OutboundMessage::GroupUpdate(update) if to == session_id => Some(update),
                _ => None,
            })
            .collect()
    }

    /// Play queue updates delivered to the given session, in order.
    pub fn play_queue_updates_to(&self, session_id: &str) -> Vec<PlayQueueUpdate> {
        self.updates_to(session_id)
            .into_iter()
            .filter_map(|update| match update.update {
                crate::GroupUpdateKind::PlayQueue(update) => Some(update),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SessionRegistry for MockRegistry {
    fn session_by_id(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).cloned()
    }

    fn session_by_token(&self, token: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(token).cloned()
    }

    fn active_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().values().cloned().collect()
    }

    async fn deliver(
        &self,
        session_id: &SessionId,
        message: OutboundMessage,
    ) -> Result<(), DeliveryError> {
        self.delivered.lock().push((session_id.clone(), message));
        Ok(())
    }
}

pub(crate) struct TestEnv {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<MockRegistry>,
    pub catalog: Arc<MockCatalog>,
    pub manager: Arc<SyncPlayManager>,
}

impl TestEnv {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let registry = Arc::new(MockRegistry::default());
        let catalog = Arc::new(MockCatalog::default());

        let manager = SyncPlayManager::new(
            registry.clone(),
            catalog.clone(),
            clock.clone(),
            SyncPlayConfig::default(),
        );

        Self {
            clock,
            registry,
            catalog,
            manager,
        }
    }
}
