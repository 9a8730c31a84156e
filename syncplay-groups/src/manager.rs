use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use syncplay_core::{ArcedStore, Clock, SyncPlayConfig};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    user_has_access_to_items, BroadcastAudience, Catalog, GroupController, GroupId, GroupInfo,
    GroupSettingsRequest, GroupState, GroupUpdate, GroupUpdateKind, NewGroupRequest, Outbox,
    OutboundMessage, PlayQueueUpdateReason, PlaybackRequest, RequestType, SessionId, SessionInfo,
    SessionRegistry, UserProfile, WebRtcRequest,
};

/// The registry of groups, routing top-level session operations to the right
/// group under the right locks.
///
/// The membership map is the coarse lock: every map update happens under it,
/// which keeps a session in at most one group. Controllers are only reachable
/// behind their per-group mutex. Lock order is always membership, then group.
pub struct SyncPlayManager {
    registry: Arc<dyn SessionRegistry>,
    catalog: Arc<dyn Catalog>,
    clock: Arc<dyn Clock>,
    config: SyncPlayConfig,
    groups: ArcedStore<GroupId, Mutex<GroupController>>,
    membership: Mutex<HashMap<SessionId, GroupId>>,
}

impl SyncPlayManager {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        catalog: Arc<dyn Catalog>,
        clock: Arc<dyn Clock>,
        config: SyncPlayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            catalog,
            clock,
            config,
            groups: Default::default(),
            membership: Default::default(),
        })
    }

    /// The session registry this manager resolves sessions from.
    pub fn sessions(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    /// Creates a new group with the session's user as administrator.
    ///
    /// If the session is playing media on its own, the group's queue and
    /// position are seeded from it and the group starts waiting.
    pub async fn new_group(
        &self,
        session: &SessionInfo,
        request: NewGroupRequest,
        cancel: &CancellationToken,
    ) {
        let mut out = Outbox::default();
        self.create_group(session, request, &mut out);
        self.dispatch(out, cancel).await;
    }

    fn create_group(&self, session: &SessionInfo, request: NewGroupRequest, out: &mut Outbox) {
        let Some(user) = self.catalog.user_by_id(session.user_id) else {
            deny(out, session, GroupUpdateKind::CreateGroupDenied("Unknown user".into()));
            return;
        };

        if !user.allows_sync_play {
            deny(
                out,
                session,
                GroupUpdateKind::CreateGroupDenied("User is not allowed to use SyncPlay".into()),
            );
            return;
        }

        if let Some(now_playing) = &session.now_playing {
            if !user_has_access_to_items(self.catalog.as_ref(), user.id, &now_playing.queue) {
                deny(
                    out,
                    session,
                    GroupUpdateKind::LibraryAccessDenied(
                        "User cannot access an item in the current queue".into(),
                    ),
                );
                return;
            }
        }

        let mut membership = self.membership.lock();

        if membership.contains_key(&session.id) {
            deny(
                out,
                session,
                GroupUpdateKind::CreateGroupDenied("Session is already in a group".into()),
            );
            return;
        }

        let mut controller = GroupController::new(
            request,
            user.id,
            self.clock.clone(),
            self.catalog.clone(),
            self.config.clone(),
        );

        controller.add_session(session, out);

        if let Some(now_playing) = &session.now_playing {
            let seeded = controller.set_play_queue(
                &now_playing.queue,
                now_playing.playing_item_index,
                now_playing.position_ticks,
            );

            if seeded.is_ok() && !now_playing.queue.is_empty() {
                controller.set_all_buffering(true);
                controller.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::AllGroup,
                    PlayQueueUpdateReason::NewPlaylist,
                    out,
                );
                controller.set_state(
                    GroupState::Waiting {
                        resume_playing: !now_playing.is_paused,
                    },
                    RequestType::Play,
                    &session.id,
                    out,
                );
            }
        }

        let group_id = controller.group_id();

        self.groups.insert(group_id, Arc::new(Mutex::new(controller)));
        membership.insert(session.id.clone(), group_id);

        info!("Session {} created group {}", session.id, group_id);
    }

    /// Joins a session to a group, leaving its current group first if it is
    /// in a different one. Re-joining the same group restores the session.
    pub async fn join_group(
        &self,
        session: &SessionInfo,
        group_id: GroupId,
        cancel: &CancellationToken,
    ) {
        let mut out = Outbox::default();
        self.join_group_internal(session, group_id, &mut out);
        self.dispatch(out, cancel).await;
    }

    fn join_group_internal(&self, session: &SessionInfo, group_id: GroupId, out: &mut Outbox) {
        let Some(user) = self.catalog.user_by_id(session.user_id) else {
            deny(out, session, GroupUpdateKind::JoinGroupDenied("Unknown user".into()));
            return;
        };

        if !user.allows_sync_play {
            deny(
                out,
                session,
                GroupUpdateKind::JoinGroupDenied("User is not allowed to use SyncPlay".into()),
            );
            return;
        }

        let mut membership = self.membership.lock();

        let Some(group) = self.groups.get(&group_id).map(|g| g.clone()) else {
            deny(
                out,
                session,
                GroupUpdateKind::GroupDoesNotExist(group_id.to_string()),
            );
            return;
        };

        match membership.get(&session.id) {
            Some(current) if *current == group_id => {
                // The same session reconnected; rebind without re-running
                // join acceptance
                group.lock().restore_session(session, out);
                return;
            }
            Some(_) => {
                self.leave_locked(&mut membership, &session.id, out);
            }
            None => {}
        }

        {
            let mut controller = group.lock();

            if !controller.can_join(user.id) {
                deny(
                    out,
                    session,
                    GroupUpdateKind::JoinGroupDenied("Group is not open to this user".into()),
                );
                return;
            }

            controller.add_session(session, out);
        }

        membership.insert(session.id.clone(), group_id);
    }

    /// Removes a session from its group. A no-op on non-members apart from a
    /// notification to the session.
    pub async fn leave_group(&self, session: &SessionInfo, cancel: &CancellationToken) {
        let mut out = Outbox::default();

        {
            let mut membership = self.membership.lock();

            if !self.leave_locked(&mut membership, &session.id, &mut out) {
                debug!("Session {} left no group: it is not in one", session.id);
                deny(
                    &mut out,
                    session,
                    GroupUpdateKind::NotInGroup("Session is not in a group".into()),
                );
            }
        }

        self.dispatch(out, cancel).await;
    }

    /// Handles a session disappearing from the registry.
    pub async fn on_session_ended(&self, session_id: &SessionId, cancel: &CancellationToken) {
        let mut out = Outbox::default();

        {
            let mut membership = self.membership.lock();
            self.leave_locked(&mut membership, session_id, &mut out);
        }

        self.dispatch(out, cancel).await;
    }

    /// Removes a session from whatever group it is in, deleting the group
    /// when it empties and the grace period is zero. Returns whether the
    /// session was in a group.
    fn leave_locked(
        &self,
        membership: &mut HashMap<SessionId, GroupId>,
        session_id: &SessionId,
        out: &mut Outbox,
    ) -> bool {
        let Some(group_id) = membership.remove(session_id) else {
            return false;
        };

        let Some(group) = self.groups.get(&group_id).map(|g| g.clone()) else {
            return true;
        };

        let empty = {
            let mut controller = group.lock();
            controller.remove_session(session_id, out);
            controller.member_count() == 0
        };

        if empty && self.config.empty_group_grace.is_zero() {
            self.groups.remove(&group_id);
            info!("Group {} is empty and was removed", group_id);
        }

        true
    }

    /// Updates a group's settings. Administrators only.
    pub async fn update_group_settings(
        &self,
        session: &SessionInfo,
        request: GroupSettingsRequest,
        cancel: &CancellationToken,
    ) {
        let mut out = Outbox::default();

        match self.group_of(&session.id) {
            Some(group) => {
                let mut controller = group.lock();

                if controller.is_administrator(session.user_id) {
                    controller.update_settings(&request, &mut out);
                } else {
                    warn!(
                        "Session {} tried to change settings of group {} without being an administrator",
                        session.id,
                        controller.group_id()
                    );
                }
            }
            None => deny(
                &mut out,
                session,
                GroupUpdateKind::NotInGroup("Session is not in a group".into()),
            ),
        }

        self.dispatch(out, cancel).await;
    }

    /// All groups the session's user could see, not excluding joined ones.
    pub fn list_groups(&self, session: &SessionInfo) -> Vec<GroupInfo> {
        let Some(user) = self.catalog.user_by_id(session.user_id) else {
            return vec![];
        };

        if !user.allows_sync_play {
            return vec![];
        }

        self.groups
            .iter()
            .filter_map(|entry| {
                let controller = entry.value().lock();
                controller.visible_to(user.id).then(|| controller.group_info())
            })
            .collect()
    }

    /// Users that hold the SyncPlay policy and have a reachable session.
    pub fn list_available_users(&self) -> Vec<UserProfile> {
        let reachable: Vec<Uuid> = self
            .registry
            .active_sessions()
            .into_iter()
            .map(|s| s.user_id)
            .collect();

        self.catalog
            .users()
            .into_iter()
            .filter(|user| user.allows_sync_play && reachable.contains(&user.id))
            .collect()
    }

    /// Forwards a playback request to the session's group. Dropped silently
    /// when the session is not in one.
    pub async fn handle_request(
        &self,
        session: &SessionInfo,
        request: PlaybackRequest,
        cancel: &CancellationToken,
    ) {
        let Some(group) = self.group_of(&session.id) else {
            debug!(
                "Dropping {:?} from session {}: not in a group",
                request.request_type(),
                session.id
            );
            return;
        };

        let mut out = Outbox::default();
        group.lock().handle_request(session, request, &mut out);
        self.dispatch(out, cancel).await;
    }

    /// Relays WebRTC signaling through the session's group.
    pub async fn handle_webrtc(
        &self,
        session: &SessionInfo,
        request: WebRtcRequest,
        cancel: &CancellationToken,
    ) {
        let Some(group) = self.group_of(&session.id) else {
            debug!("Dropping WebRTC signal from session {}: not in a group", session.id);
            return;
        };

        let mut out = Outbox::default();
        group.lock().handle_webrtc(session, request, &mut out);
        self.dispatch(out, cancel).await;
    }

    /// Disbands every group, notifying their members.
    pub async fn shutdown(&self) {
        let mut out = Outbox::default();

        {
            let mut membership = self.membership.lock();
            membership.clear();

            for entry in self.groups.iter() {
                let controller = entry.value().lock();
                controller.send_group_update(
                    &SessionId::default(),
                    BroadcastAudience::AllGroup,
                    GroupUpdateKind::GroupLeft,
                    &mut out,
                );
            }

            self.groups.clear();
        }

        info!("Disbanded all groups");
        self.dispatch(out, &CancellationToken::new()).await;
    }

    /// Spawns the periodic sweep that removes groups which stayed empty past
    /// the grace period.
    pub fn start_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);

            loop {
                timer.tick().await;

                let Some(manager) = manager.upgrade() else {
                    break;
                };

                manager.sweep();
            }
        })
    }

    fn sweep(&self) {
        let _membership = self.membership.lock();

        let grace = chrono::Duration::from_std(self.config.empty_group_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let now = self.clock.now();

        let expired: Vec<GroupId> = self
            .groups
            .iter()
            .filter_map(|entry| {
                let controller = entry.value().lock();

                controller
                    .empty_since()
                    .filter(|since| now - *since >= grace)
                    .map(|_| controller.group_id())
            })
            .collect();

        for group_id in expired {
            self.groups.remove(&group_id);
            info!("Swept empty group {}", group_id);
        }
    }

    fn group_of(&self, session_id: &SessionId) -> Option<Arc<Mutex<GroupController>>> {
        let group_id = *self.membership.lock().get(session_id)?;
        self.groups.get(&group_id).map(|g| g.clone())
    }

    /// Delivers composed messages after all locks are released. Fan-out is
    /// concurrent across recipients, ordered within each one, and failures
    /// never roll back group state.
    async fn dispatch(&self, out: Outbox, cancel: &CancellationToken) {
        if out.is_empty() {
            return;
        }

        let sends = out.into_batches().into_iter().map(|(session_id, messages)| {
            let registry = self.registry.clone();
            let cancel = cancel.clone();

            async move {
                for message in messages {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = registry.deliver(&session_id, message) => {
                            if let Err(err) = result {
                                warn!("Failed to deliver to session {}: {}", session_id, err);
                            }
                        }
                    }
                }
            }
        });

        join_all(sends).await;
    }
}

/// Sends an out-of-band refusal to the requesting session. The group id is
/// nil because no group applies.
fn deny(out: &mut Outbox, session: &SessionInfo, update: GroupUpdateKind) {
    out.push(
        session.id.clone(),
        OutboundMessage::GroupUpdate(GroupUpdate {
            group_id: GroupId::nil(),
            update,
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnv;
    use crate::{CommandType, GroupStateType, GroupVisibility, NowPlaying, QueueMode};
    use chrono::Duration;
    use syncplay_core::{ItemId, PlaylistItemId, TICKS_PER_SECOND};

    fn new_group_request(name: &str) -> NewGroupRequest {
        NewGroupRequest {
            group_name: name.to_string(),
            visibility: GroupVisibility::Public,
            invited_users: vec![],
            open_playback_access: true,
            open_playlist_access: true,
        }
    }

    fn items(env: &TestEnv, amount: usize, run_time_ticks: i64) -> Vec<ItemId> {
        (0..amount).map(|_| env.catalog.add_item(run_time_ticks).id).collect()
    }

    /// Creates a group for the session, plays the items, and reports ready,
    /// leaving the group playing with a clean delivery log.
    async fn playing_group(
        env: &TestEnv,
        cancel: &CancellationToken,
        session: &SessionInfo,
        queue: &[ItemId],
    ) -> PlaylistItemId {
        env.manager
            .new_group(session, new_group_request("listen along"), cancel)
            .await;
        env.manager
            .handle_request(
                session,
                PlaybackRequest::Play {
                    queue: queue.to_vec(),
                    playing_item_position: 0,
                    start_position_ticks: 0,
                },
                cancel,
            )
            .await;

        let update = env
            .registry
            .play_queue_updates_to(&session.id)
            .pop()
            .expect("a play queue update was sent");
        let playing = update.playlist[0].playlist_item_id.clone();

        env.manager
            .handle_request(
                session,
                PlaybackRequest::Ready {
                    when: env.clock.now(),
                    position_ticks: 0,
                    is_playing: true,
                    playlist_item_id: playing.clone(),
                },
                cancel,
            )
            .await;

        env.registry.clear_delivered();
        playing
    }

    fn group_state(env: &TestEnv, session: &SessionInfo) -> GroupStateType {
        env.manager.list_groups(session)[0].state
    }

    #[tokio::test]
    async fn test_create_and_solo_play() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");
        let queue = items(&env, 3, 5 * 60 * TICKS_PER_SECOND);

        env.manager
            .new_group(&session, new_group_request("movie night"), &cancel)
            .await;

        let groups = env.manager.list_groups(&session);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].state, GroupStateType::Idle, "starts idle without a queue");

        env.manager
            .handle_request(
                &session,
                PlaybackRequest::Play {
                    queue: queue.clone(),
                    playing_item_position: 0,
                    start_position_ticks: 0,
                },
                &cancel,
            )
            .await;

        assert_eq!(group_state(&env, &session), GroupStateType::Waiting);

        let update = env
            .registry
            .play_queue_updates_to("a1")
            .pop()
            .expect("the new playlist was broadcast");
        assert_eq!(update.playlist.len(), 3);
        assert_eq!(update.playing_item_index, 0);

        let playing = update.playlist[0].playlist_item_id.clone();
        env.registry.clear_delivered();

        let now = env.clock.now();
        env.manager
            .handle_request(
                &session,
                PlaybackRequest::Ready {
                    when: now,
                    position_ticks: 0,
                    is_playing: true,
                    playlist_item_id: playing,
                },
                &cancel,
            )
            .await;

        assert_eq!(group_state(&env, &session), GroupStateType::Playing);

        let command = env
            .registry
            .commands_to("a1")
            .pop()
            .expect("a start command was scheduled");
        assert_eq!(command.command, CommandType::Unpause);
        assert_eq!(command.position_ticks, 0);
        assert_eq!(
            command.when,
            now + Duration::milliseconds(2500),
            "start is delayed by the time sync offset plus the highest ping"
        );
    }

    #[tokio::test]
    async fn test_synchronized_pause() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");
        let queue = items(&env, 1, 5 * 60 * TICKS_PER_SECOND);

        playing_group(&env, &cancel, &session, &queue).await;

        // Playback was scheduled 2.5s out, so 10s later it has run for 7.5s
        env.clock.advance(Duration::seconds(10));
        env.manager
            .handle_request(&session, PlaybackRequest::Pause, &cancel)
            .await;

        assert_eq!(group_state(&env, &session), GroupStateType::Paused);

        let command = env.registry.commands_to("a1").pop().expect("pause was broadcast");
        assert_eq!(command.command, CommandType::Pause);
        assert_eq!(command.when, env.clock.now());
        assert_eq!(
            command.position_ticks,
            (7.5 * TICKS_PER_SECOND as f64) as i64,
            "position accounts for time since the scheduled start"
        );
    }

    #[tokio::test]
    async fn test_seek_rebuffers_and_resynchronizes() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");
        let queue = items(&env, 1, 10 * 60 * TICKS_PER_SECOND);

        let current = playing_group(&env, &cancel, &a1, &queue).await;

        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;
        env.registry.clear_delivered();

        let seek_to = 60 * TICKS_PER_SECOND;
        env.manager
            .handle_request(&a1, PlaybackRequest::Seek { position_ticks: seek_to }, &cancel)
            .await;

        assert_eq!(group_state(&env, &a1), GroupStateType::Waiting);
        assert_eq!(
            env.registry.commands_to("b1").pop().unwrap().command,
            CommandType::Seek,
            "everyone is told to seek"
        );

        env.registry.clear_delivered();

        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::Ready {
                    when: env.clock.now(),
                    position_ticks: seek_to,
                    is_playing: true,
                    playlist_item_id: current.clone(),
                },
                &cancel,
            )
            .await;

        assert_eq!(
            group_state(&env, &a1),
            GroupStateType::Waiting,
            "still waiting on the second member"
        );

        let now = env.clock.now();
        env.manager
            .handle_request(
                &b1,
                PlaybackRequest::Ready {
                    when: now,
                    position_ticks: seek_to,
                    is_playing: true,
                    playlist_item_id: current,
                },
                &cancel,
            )
            .await;

        assert_eq!(group_state(&env, &a1), GroupStateType::Playing);

        for session in ["a1", "b1"] {
            let command = env
                .registry
                .commands_to(session)
                .pop()
                .expect("both members get the start command");
            assert_eq!(command.command, CommandType::Unpause);
            assert_eq!(command.position_ticks, seek_to);
            assert_eq!(command.when, now + Duration::milliseconds(2500));
        }
    }

    #[tokio::test]
    async fn test_restricted_member_blocks_queue_changes() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let carol = env.catalog.add_restricted_user("carol", 12);
        let a1 = env.registry.add_session(&alice, "a1");
        let c1 = env.registry.add_session(&carol, "c1");

        let harmless = env.catalog.add_item(5 * 60 * TICKS_PER_SECOND).id;
        let adult = env.catalog.add_rated_item(5 * 60 * TICKS_PER_SECOND, 18).id;

        env.manager
            .new_group(&a1, new_group_request("movie night"), &cancel)
            .await;
        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::Play {
                    queue: vec![harmless, adult],
                    playing_item_position: 0,
                    start_position_ticks: 0,
                },
                &cancel,
            )
            .await;

        let adult_id = env.registry.play_queue_updates_to("a1").pop().unwrap().playlist[1]
            .playlist_item_id
            .clone();

        // Joining is allowed even though the queue holds an item past the cap
        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&c1, group_id, &cancel).await;

        assert!(
            env.registry
                .updates_to("c1")
                .iter()
                .any(|u| matches!(u.update, GroupUpdateKind::GroupJoined(_))),
            "join itself succeeds"
        );

        env.registry.clear_delivered();

        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::SetPlaylistItem {
                    playlist_item_id: adult_id,
                },
                &cancel,
            )
            .await;

        assert!(
            env.registry
                .updates_to("a1")
                .iter()
                .any(|u| matches!(u.update, GroupUpdateKind::LibraryAccessDenied(_))),
            "the requester is told why"
        );
        assert!(
            env.registry.play_queue_updates_to("a1").is_empty(),
            "no queue change was broadcast"
        );
    }

    #[tokio::test]
    async fn test_removing_playing_item_advances_and_rebuffers() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");
        let queue = items(&env, 2, 5 * 60 * TICKS_PER_SECOND);

        let playing = playing_group(&env, &cancel, &session, &queue).await;

        env.manager
            .handle_request(
                &session,
                PlaybackRequest::RemoveFromPlaylist {
                    playlist_item_ids: vec![playing],
                },
                &cancel,
            )
            .await;

        assert_eq!(
            group_state(&env, &session),
            GroupStateType::Waiting,
            "the new item has to be loaded"
        );

        let update = env.registry.play_queue_updates_to("a1").pop().unwrap();
        assert_eq!(update.reason, PlayQueueUpdateReason::RemoveItems);
        assert_eq!(update.playlist.len(), 1);
        assert_eq!(update.playing_item_index, 0, "cursor advanced to the survivor");
        assert_eq!(update.start_position_ticks, 0, "the new item starts over");
    }

    #[tokio::test]
    async fn test_webrtc_relay() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let carol = env.catalog.add_user("carol", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");
        let c1 = env.registry.add_session(&carol, "c1");

        env.manager
            .new_group(&a1, new_group_request("call"), &cancel)
            .await;
        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;
        env.manager.join_group(&c1, group_id, &cancel).await;
        env.registry.clear_delivered();

        env.manager
            .handle_webrtc(
                &a1,
                WebRtcRequest {
                    to: Some("b1".to_string()),
                    offer: Some(serde_json::json!({"sdp": "..."})),
                    ..Default::default()
                },
                &cancel,
            )
            .await;

        let delivered = env.registry.delivered();
        assert_eq!(delivered.len(), 1, "an addressed signal goes to one session");
        assert_eq!(delivered[0].0, "b1");

        match &delivered[0].1 {
            OutboundMessage::GroupUpdate(update) => match &update.update {
                GroupUpdateKind::WebRtc(signal) => {
                    assert_eq!(signal.from_session_id, "a1");
                    assert!(signal.offer.is_some());
                }
                other => panic!("expected a WebRTC update, got {other:?}"),
            },
            other => panic!("expected a group update, got {other:?}"),
        }

        env.registry.clear_delivered();

        // Unaddressed signals fan out to everyone else
        env.manager
            .handle_webrtc(&c1, WebRtcRequest::default(), &cancel)
            .await;

        let recipients: Vec<_> = env.registry.delivered().into_iter().map(|(to, _)| to).collect();
        assert!(recipients.contains(&"a1".to_string()));
        assert!(recipients.contains(&"b1".to_string()));
        assert!(!recipients.contains(&"c1".to_string()), "the sender is excluded");

        env.registry.clear_delivered();

        // Unknown recipients are dropped
        env.manager
            .handle_webrtc(
                &a1,
                WebRtcRequest {
                    to: Some("nope".to_string()),
                    ..Default::default()
                },
                &cancel,
            )
            .await;
        assert!(env.registry.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_session_is_in_at_most_one_group() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");

        env.manager
            .new_group(&a1, new_group_request("first"), &cancel)
            .await;
        env.manager
            .new_group(&b1, new_group_request("second"), &cancel)
            .await;

        assert_eq!(env.manager.list_groups(&a1).len(), 2);

        let second = env
            .manager
            .list_groups(&a1)
            .into_iter()
            .find(|g| g.group_name == "second")
            .unwrap();

        // Joining another group leaves the first, which empties and is removed
        env.manager.join_group(&a1, second.group_id, &cancel).await;

        let groups = env.manager.list_groups(&a1);
        assert_eq!(groups.len(), 1, "the emptied group is gone");
        assert_eq!(groups[0].participants.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");

        env.manager
            .new_group(&session, new_group_request("short lived"), &cancel)
            .await;
        env.manager.leave_group(&session, &cancel).await;

        assert!(env.manager.list_groups(&session).is_empty());
        assert!(env
            .registry
            .updates_to("a1")
            .iter()
            .any(|u| matches!(u.update, GroupUpdateKind::GroupLeft)));

        env.registry.clear_delivered();
        env.manager.leave_group(&session, &cancel).await;

        assert!(
            env.registry
                .updates_to("a1")
                .iter()
                .all(|u| matches!(u.update, GroupUpdateKind::NotInGroup(_))),
            "a second leave only reports the session is not in a group"
        );
    }

    #[tokio::test]
    async fn test_new_group_seeds_from_now_playing() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let queue = items(&env, 2, 5 * 60 * TICKS_PER_SECOND);

        let session = env.registry.add_playing_session(
            &alice,
            "a1",
            Some(NowPlaying {
                queue: queue.clone(),
                playing_item_index: 1,
                position_ticks: 30 * TICKS_PER_SECOND,
                is_paused: false,
            }),
        );

        env.manager
            .new_group(&session, new_group_request("continue watching"), &cancel)
            .await;

        assert_eq!(
            group_state(&env, &session),
            GroupStateType::Waiting,
            "a playing session starts the group waiting"
        );

        let update = env.registry.play_queue_updates_to("a1").pop().unwrap();
        assert_eq!(update.playing_item_index, 1);
        assert_eq!(update.start_position_ticks, 30 * TICKS_PER_SECOND);
    }

    #[tokio::test]
    async fn test_playback_permission_is_enforced() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");
        let queue = items(&env, 1, 5 * 60 * TICKS_PER_SECOND);

        let mut request = new_group_request("strict");
        request.open_playback_access = false;

        env.manager.new_group(&a1, request, &cancel).await;
        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::Play {
                    queue,
                    playing_item_position: 0,
                    start_position_ticks: 0,
                },
                &cancel,
            )
            .await;

        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;
        env.registry.clear_delivered();

        env.manager
            .handle_request(&b1, PlaybackRequest::Pause, &cancel)
            .await;

        assert!(env.registry.delivered().is_empty(), "the request is dropped");
        assert_eq!(
            group_state(&env, &a1),
            GroupStateType::Waiting,
            "nothing changed"
        );
    }

    #[tokio::test]
    async fn test_rejoining_same_group_restores_session() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");

        env.manager
            .new_group(&session, new_group_request("sticky"), &cancel)
            .await;
        let group_id = env.manager.list_groups(&session)[0].group_id;
        env.registry.clear_delivered();

        env.manager.join_group(&session, group_id, &cancel).await;

        assert!(
            env.registry
                .updates_to("a1")
                .iter()
                .any(|u| matches!(u.update, GroupUpdateKind::GroupJoined(_))),
            "the snapshot is re-sent"
        );
        assert_eq!(
            env.manager.list_groups(&session)[0].participants.len(),
            1,
            "no duplicate member appears"
        );
    }

    #[tokio::test]
    async fn test_list_available_users() {
        let env = TestEnv::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", false);
        let _offline = env.catalog.add_user("carol", true);

        env.registry.add_session(&alice, "a1");
        env.registry.add_session(&bob, "b1");

        let available = env.manager.list_available_users();

        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "alice", "policy and reachability are both required");
    }

    #[tokio::test]
    async fn test_update_settings_requires_administrator() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");

        env.manager
            .new_group(&a1, new_group_request("before"), &cancel)
            .await;
        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;
        env.registry.clear_delivered();

        let rename = GroupSettingsRequest {
            group_name: Some("after".to_string()),
            ..Default::default()
        };

        env.manager
            .update_group_settings(&b1, rename.clone(), &cancel)
            .await;
        assert_eq!(
            env.manager.list_groups(&a1)[0].group_name,
            "before",
            "non-administrators cannot change settings"
        );

        env.manager.update_group_settings(&a1, rename, &cancel).await;
        assert_eq!(env.manager.list_groups(&a1)[0].group_name, "after");
        assert!(
            env.registry
                .updates_to("b1")
                .iter()
                .any(|u| matches!(u.update, GroupUpdateKind::SettingsUpdate(_))),
            "everyone hears about the change"
        );
    }

    #[tokio::test]
    async fn test_buffering_member_pauses_playing_group() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");
        let queue = items(&env, 1, 10 * 60 * TICKS_PER_SECOND);

        let playing = playing_group(&env, &cancel, &a1, &queue).await;
        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;
        env.registry.clear_delivered();

        let reported = 42 * TICKS_PER_SECOND;
        env.manager
            .handle_request(
                &b1,
                PlaybackRequest::Buffering {
                    when: env.clock.now(),
                    position_ticks: reported,
                    is_playing: true,
                    playlist_item_id: playing,
                },
                &cancel,
            )
            .await;

        assert_eq!(group_state(&env, &a1), GroupStateType::Waiting);

        let command = env.registry.commands_to("a1").pop().expect("the group pauses");
        assert_eq!(command.command, CommandType::Pause);
        assert_eq!(
            command.position_ticks, reported,
            "the group pauses where the report fell behind"
        );
    }

    #[tokio::test]
    async fn test_ignore_wait_member_does_not_block_readiness() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let bob = env.catalog.add_user("bob", true);
        let a1 = env.registry.add_session(&alice, "a1");
        let b1 = env.registry.add_session(&bob, "b1");
        let queue = items(&env, 1, 10 * 60 * TICKS_PER_SECOND);

        let playing = playing_group(&env, &cancel, &a1, &queue).await;
        let group_id = env.manager.list_groups(&a1)[0].group_id;
        env.manager.join_group(&b1, group_id, &cancel).await;

        // Everyone starts loading again
        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::Seek {
                    position_ticks: 60 * TICKS_PER_SECOND,
                },
                &cancel,
            )
            .await;
        env.registry.clear_delivered();

        env.manager
            .handle_request(&b1, PlaybackRequest::SetIgnoreWait { ignore_wait: true }, &cancel)
            .await;

        assert_eq!(
            group_state(&env, &a1),
            GroupStateType::Waiting,
            "the other member still blocks"
        );

        env.manager
            .handle_request(
                &a1,
                PlaybackRequest::Ready {
                    when: env.clock.now(),
                    position_ticks: 60 * TICKS_PER_SECOND,
                    is_playing: true,
                    playlist_item_id: playing,
                },
                &cancel,
            )
            .await;

        assert_eq!(
            group_state(&env, &a1),
            GroupStateType::Playing,
            "the slow member opted out of blocking"
        );
        assert!(
            !env.registry.commands_to("b1").is_empty(),
            "opted out members still receive commands"
        );
    }

    #[tokio::test]
    async fn test_queue_edits_while_idle() {
        let env = TestEnv::new();
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");
        let queue = items(&env, 2, 5 * 60 * TICKS_PER_SECOND);

        env.manager
            .new_group(&session, new_group_request("prep"), &cancel)
            .await;
        env.registry.clear_delivered();

        env.manager
            .handle_request(
                &session,
                PlaybackRequest::Queue {
                    item_ids: queue,
                    mode: QueueMode::Queue,
                },
                &cancel,
            )
            .await;

        assert_eq!(
            group_state(&env, &session),
            GroupStateType::Idle,
            "queueing does not start playback"
        );

        let update = env.registry.play_queue_updates_to("a1").pop().unwrap();
        assert_eq!(update.reason, PlayQueueUpdateReason::Queue);
        assert_eq!(update.playlist.len(), 2);
    }

    #[tokio::test]
    async fn test_sweeper_respects_grace_period() {
        let mut config = SyncPlayConfig::default();
        config.empty_group_grace = std::time::Duration::from_secs(60);

        let env = TestEnv::new();
        let manager = SyncPlayManager::new(
            env.registry.clone(),
            env.catalog.clone(),
            env.clock.clone(),
            config,
        );
        let cancel = CancellationToken::new();

        let alice = env.catalog.add_user("alice", true);
        let session = env.registry.add_session(&alice, "a1");

        manager
            .new_group(&session, new_group_request("lingering"), &cancel)
            .await;
        manager.leave_group(&session, &cancel).await;

        assert_eq!(
            manager.list_groups(&session).len(),
            1,
            "the empty group lingers within the grace period"
        );

        manager.sweep();
        assert_eq!(manager.list_groups(&session).len(), 1, "not yet expired");

        env.clock.advance(Duration::seconds(61));
        manager.sweep();
        assert!(manager.list_groups(&session).is_empty(), "expired and swept");
    }
}
