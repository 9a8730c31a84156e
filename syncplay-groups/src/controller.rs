use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use syncplay_core::{
    ticks_from_duration, Clock, ItemId, PlayQueue, PlaylistItemId, QueueItem, SyncPlayConfig,
};
use uuid::Uuid;

use crate::{
    AccessList, BroadcastAudience, Catalog, CommandType, GroupId, GroupInfo, GroupMember,
    GroupSettingsRequest, GroupState, GroupStateType, GroupUpdate, GroupUpdateKind,
    GroupVisibility, NewGroupRequest, Outbox, OutboundMessage, PlayQueueUpdate,
    PlayQueueUpdateReason, PlaybackRequest, QueueMode, RequestType, SessionId, SessionInfo,
    StateUpdate, SyncPlayCommand, UserId, WebRtcRequest, WebRtcSignal,
};

/// Why a queue mutation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueOpError {
    /// A member's user cannot access an item in the resulting queue.
    AccessDenied,
    /// The referenced entry no longer exists.
    NotFound,
}

/// Whether a user may play every one of the given items.
pub(crate) fn user_has_access_to_items(
    catalog: &dyn Catalog,
    user_id: UserId,
    item_ids: &[ItemId],
) -> bool {
    let Some(user) = catalog.user_by_id(user_id) else {
        return false;
    };

    item_ids.iter().all(|item_id| {
        let Some(item) = catalog.item_by_id(*item_id) else {
            return false;
        };

        let rating_ok = match (user.parental_rating_cap, item.parental_rating) {
            (Some(cap), Some(rating)) => rating <= cap,
            _ => true,
        };

        let folder_ok = user.enable_all_folders
            || item
                .collection_folder
                .map(|folder| user.enabled_folders.contains(&folder))
                .unwrap_or(true);

        rating_ok && folder_ok
    })
}

/// The mutable heart of a group: members, access list, queue, and state.
///
/// Not internally synchronized. The manager exposes controllers only behind
/// a per-group lock, so every method here runs with that lock held.
pub struct GroupController {
    group_id: GroupId,
    name: String,
    visibility: GroupVisibility,
    invited_users: HashSet<UserId>,
    access: AccessList,
    members: HashMap<SessionId, GroupMember>,
    queue: PlayQueue,
    /// Runtime of the current item, in ticks.
    run_time_ticks: i64,
    pub(crate) position_ticks: i64,
    pub(crate) last_activity: DateTime<Utc>,
    /// When the group lost its last member, for the sweeper.
    empty_since: Option<DateTime<Utc>>,
    state: GroupState,
    clock: Arc<dyn Clock>,
    catalog: Arc<dyn Catalog>,
    pub(crate) config: SyncPlayConfig,
}

impl GroupController {
    pub(crate) fn new(
        request: NewGroupRequest,
        creator: UserId,
        clock: Arc<dyn Clock>,
        catalog: Arc<dyn Catalog>,
        config: SyncPlayConfig,
    ) -> Self {
        let mut access = AccessList::new(request.open_playback_access, request.open_playlist_access);
        access.add_administrator(creator);

        let now = clock.now();

        Self {
            group_id: Uuid::new_v4(),
            name: request.group_name,
            visibility: request.visibility,
            invited_users: request.invited_users.into_iter().collect(),
            access,
            members: Default::default(),
            queue: PlayQueue::new(clock.clone()),
            run_time_ticks: 0,
            position_ticks: 0,
            last_activity: now,
            empty_since: None,
            state: Default::default(),
            clock,
            catalog,
            config,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn state_type(&self) -> GroupStateType {
        self.state.state_type()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn empty_since(&self) -> Option<DateTime<Utc>> {
        self.empty_since
    }

    pub fn is_administrator(&self, user_id: UserId) -> bool {
        self.access.is_administrator(user_id)
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn group_info(&self) -> GroupInfo {
        GroupInfo {
            group_id: self.group_id,
            group_name: self.name.clone(),
            state: self.state.state_type(),
            participants: self.members.values().map(|m| m.user_name.clone()).collect(),
            last_updated_at: self.last_activity,
        }
    }

    /// Whether a user passes the group's visibility and invite rules.
    pub(crate) fn can_join(&self, user_id: UserId) -> bool {
        match self.visibility {
            GroupVisibility::Public => true,
            GroupVisibility::InviteOnly | GroupVisibility::Private => {
                self.invited_users.contains(&user_id)
                    || self.access.is_administrator(user_id)
                    || self.members.values().any(|m| m.user_id == user_id)
            }
        }
    }

    /// Whether a group appears in a user's listing.
    pub(crate) fn visible_to(&self, user_id: UserId) -> bool {
        match self.visibility {
            GroupVisibility::Public => true,
            GroupVisibility::InviteOnly => self.can_join(user_id),
            GroupVisibility::Private => self.members.values().any(|m| m.user_id == user_id),
        }
    }

    // Membership

    pub(crate) fn add_session(&mut self, session: &SessionInfo, out: &mut Outbox) {
        let member = GroupMember::new(session, self.config.default_ping_ms);

        self.members.insert(session.id.clone(), member);
        self.access.touch_permissions(session.user_id);
        self.empty_since = None;

        self.send_group_update(
            &session.id,
            BroadcastAudience::CurrentSession,
            GroupUpdateKind::GroupJoined(self.group_info()),
            out,
        );
        self.send_group_update(
            &session.id,
            BroadcastAudience::AllExceptCurrentSession,
            GroupUpdateKind::UserJoined(session.user_name.clone()),
            out,
        );

        info!(
            "Session {} ({}) joined group {}",
            session.id, session.user_name, self.group_id
        );

        self.on_session_joined(session, out);
    }

    /// Per-state follow-up after a session joins: sync it with the group's
    /// current target.
    fn on_session_joined(&mut self, session: &SessionInfo, out: &mut Outbox) {
        match self.state.state_type() {
            GroupStateType::Idle => {}
            GroupStateType::Waiting => {
                // The newcomer has to load the current item like everyone else
                self.set_buffering(&session.id, true);
                self.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::CurrentSession,
                    PlayQueueUpdateReason::NewPlaylist,
                    out,
                );
            }
            GroupStateType::Playing => {
                self.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::CurrentSession,
                    PlayQueueUpdateReason::NewPlaylist,
                    out,
                );
                self.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Unpause, out);
            }
            GroupStateType::Paused => {
                self.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::CurrentSession,
                    PlayQueueUpdateReason::NewPlaylist,
                    out,
                );
                self.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Pause, out);
            }
        }
    }

    pub(crate) fn remove_session(&mut self, session_id: &SessionId, out: &mut Outbox) {
        let Some(member) = self.members.remove(session_id) else {
            return;
        };

        out.push(
            session_id.clone(),
            OutboundMessage::GroupUpdate(GroupUpdate {
                group_id: self.group_id,
                update: GroupUpdateKind::GroupLeft,
            }),
        );
        self.send_group_update(
            session_id,
            BroadcastAudience::AllGroup,
            GroupUpdateKind::UserLeft(member.user_name.clone()),
            out,
        );

        info!(
            "Session {} ({}) left group {}",
            session_id, member.user_name, self.group_id
        );

        if self.members.is_empty() {
            self.empty_since = Some(self.clock.now());
            self.state = GroupState::Idle;
            return;
        }

        // A departing member may have been the last one the group waited on
        let previous = self.state.state_type();
        let state = std::mem::take(&mut self.state);
        self.state = state.session_left(session_id, self, out);

        if previous != self.state.state_type() {
            self.send_state_update(session_id, RequestType::Ready, out);
        }
    }

    /// Re-binds a reconnecting session to the group it already belongs to,
    /// sending a fresh snapshot so the client can reconcile.
    pub(crate) fn restore_session(&mut self, session: &SessionInfo, out: &mut Outbox) {
        self.send_group_update(
            &session.id,
            BroadcastAudience::CurrentSession,
            GroupUpdateKind::GroupJoined(self.group_info()),
            out,
        );

        self.on_session_joined(session, out);

        info!("Session {} restored in group {}", session.id, self.group_id);
    }

    pub(crate) fn update_settings(&mut self, request: &GroupSettingsRequest, out: &mut Outbox) {
        if let Some(name) = &request.group_name {
            self.name = name.clone();
        }

        if let Some(visibility) = request.visibility {
            self.visibility = visibility;
        }

        if let Some(invited) = &request.invited_users {
            self.invited_users = invited.iter().copied().collect();
        }

        self.access
            .set_open_access(request.open_playback_access, request.open_playlist_access);

        for row in &request.user_permissions {
            self.access.set_permissions(row.user_id, row.playback, row.playlist);
        }

        let from = SessionId::default();
        self.send_group_update(
            &from,
            BroadcastAudience::AllGroup,
            GroupUpdateKind::SettingsUpdate(self.group_info()),
            out,
        );
    }

    // Buffering and pings

    pub(crate) fn set_buffering(&mut self, session_id: &SessionId, buffering: bool) {
        if let Some(member) = self.members.get_mut(session_id) {
            member.is_buffering = buffering;
        }
    }

    pub(crate) fn set_all_buffering(&mut self, buffering: bool) {
        for member in self.members.values_mut() {
            member.is_buffering = buffering;
        }
    }

    /// True iff any member that has not opted out of waiting is buffering.
    pub fn is_buffering(&self) -> bool {
        self.members
            .values()
            .any(|m| m.is_buffering && !m.ignore_wait)
    }

    pub(crate) fn set_ignore_wait(&mut self, session_id: &SessionId, ignore_wait: bool) {
        if let Some(member) = self.members.get_mut(session_id) {
            member.ignore_wait = ignore_wait;
        }
    }

    pub(crate) fn update_ping(&mut self, session_id: &SessionId, ping_ms: f64) {
        if let Some(member) = self.members.get_mut(session_id) {
            member.ping_ms = ping_ms;
        }
    }

    pub fn highest_ping(&self) -> f64 {
        self.members
            .values()
            .map(|m| m.ping_ms)
            .fold(self.config.default_ping_ms, f64::max)
    }

    // Time

    /// Clamps a position report into the current item's runtime.
    pub fn sanitize_position_ticks(&self, ticks: i64) -> i64 {
        ticks.clamp(0, self.run_time_ticks.max(0))
    }

    /// Clamps a client supplied timestamp to server time when it deviates
    /// more than the time sync offset.
    pub(crate) fn clamp_when(&self, when: DateTime<Utc>) -> DateTime<Utc> {
        let now = self.clock.now();
        let offset = self.config.time_sync_offset();

        if when < now - offset || when > now + offset {
            now
        } else {
            when
        }
    }

    /// The position the group has reached, assuming playback since the last
    /// activity timestamp. May exceed the runtime; callers sanitize.
    pub(crate) fn playback_position(&self) -> i64 {
        let elapsed = self.clock.now() - self.last_activity;
        self.position_ticks + ticks_from_duration(elapsed)
    }

    pub fn run_time_ticks(&self) -> i64 {
        self.run_time_ticks
    }

    // Queue

    pub(crate) fn current_playlist_item_id(&self) -> Option<PlaylistItemId> {
        self.queue.current_item().map(|i| i.playlist_item_id.clone())
    }

    /// Verifies that every member's user can access every one of the items.
    fn verify_queue_access(&self, item_ids: &[ItemId]) -> Result<(), QueueOpError> {
        let users: HashSet<UserId> = self.members.values().map(|m| m.user_id).collect();

        for user_id in users {
            if !user_has_access_to_items(self.catalog.as_ref(), user_id, item_ids) {
                warn!(
                    "Blocked queue change in group {}: user {} lacks access",
                    self.group_id, user_id
                );
                return Err(QueueOpError::AccessDenied);
            }
        }

        Ok(())
    }

    /// Item ids of the effective queue.
    fn queue_item_ids(&self) -> Vec<ItemId> {
        self.queue.playlist().into_iter().map(|i| i.item_id).collect()
    }

    /// Reloads the runtime of the new current item and restarts it.
    fn refresh_current_item(&mut self) {
        self.run_time_ticks = self
            .queue
            .current_item()
            .and_then(|item| self.catalog.item_by_id(item.item_id))
            .and_then(|item| item.run_time_ticks)
            .unwrap_or(0);

        self.restart_current_item();
    }

    /// Rewinds the current item to its beginning.
    pub(crate) fn restart_current_item(&mut self) {
        self.position_ticks = 0;
        self.last_activity = self.clock.now();
    }

    pub(crate) fn set_play_queue(
        &mut self,
        item_ids: &[ItemId],
        starting_index: usize,
        start_position_ticks: i64,
    ) -> Result<(), QueueOpError> {
        self.verify_queue_access(item_ids)?;

        self.queue.set_playlist(item_ids);
        self.queue.set_playing_item_by_index(starting_index);
        self.refresh_current_item();
        self.position_ticks = self.sanitize_position_ticks(start_position_ticks);

        Ok(())
    }

    pub(crate) fn set_playing_item(
        &mut self,
        playlist_item_id: &PlaylistItemId,
    ) -> Result<(), QueueOpError> {
        self.verify_queue_access(&self.queue_item_ids())?;

        if !self.queue.set_playing_item_by_playlist_id(playlist_item_id) {
            return Err(QueueOpError::NotFound);
        }

        self.refresh_current_item();
        Ok(())
    }

    pub(crate) fn add_to_play_queue(
        &mut self,
        item_ids: &[ItemId],
        mode: QueueMode,
    ) -> Result<(), QueueOpError> {
        let mut prospective = self.queue_item_ids();
        prospective.extend_from_slice(item_ids);
        self.verify_queue_access(&prospective)?;

        let had_current = self.queue.current_item().is_some();

        match mode {
            QueueMode::Queue => self.queue.queue(item_ids),
            QueueMode::QueueNext => self.queue.queue_next(item_ids),
        }

        // Queueing into an empty queue selects a current item
        if !had_current && self.queue.current_item().is_some() {
            self.refresh_current_item();
        }

        Ok(())
    }

    /// Returns whether the playing item was among the removed ones.
    pub(crate) fn remove_from_play_queue(
        &mut self,
        playlist_item_ids: &[PlaylistItemId],
    ) -> Result<bool, QueueOpError> {
        let remaining: Vec<ItemId> = self
            .queue
            .playlist()
            .into_iter()
            .filter(|i| !playlist_item_ids.contains(&i.playlist_item_id))
            .map(|i| i.item_id)
            .collect();
        self.verify_queue_access(&remaining)?;

        let playing_removed = self.queue.remove_from_playlist(playlist_item_ids);

        if playing_removed {
            self.refresh_current_item();
        }

        Ok(playing_removed)
    }

    pub(crate) fn move_item_in_play_queue(
        &mut self,
        playlist_item_id: &PlaylistItemId,
        new_index: usize,
    ) -> Result<(), QueueOpError> {
        self.verify_queue_access(&self.queue_item_ids())?;

        if !self.queue.move_playlist_item(playlist_item_id, new_index) {
            return Err(QueueOpError::NotFound);
        }

        Ok(())
    }

    /// Advances to the next queue entry. Ok(false) means the queue ended
    /// under RepeatNone.
    pub(crate) fn next_item_in_queue(&mut self) -> Result<bool, QueueOpError> {
        self.verify_queue_access(&self.queue_item_ids())?;

        if !self.queue.next() {
            return Ok(false);
        }

        self.refresh_current_item();
        Ok(true)
    }

    pub(crate) fn previous_item_in_queue(&mut self) -> Result<bool, QueueOpError> {
        self.verify_queue_access(&self.queue_item_ids())?;

        if !self.queue.previous() {
            return Ok(false);
        }

        self.refresh_current_item();
        Ok(true)
    }

    pub(crate) fn set_repeat_mode(&mut self, mode: syncplay_core::RepeatMode) {
        self.queue.set_repeat_mode(mode);
    }

    pub(crate) fn set_shuffle_mode(&mut self, mode: syncplay_core::ShuffleMode) {
        self.queue.set_shuffle_mode(mode);
    }

    pub fn playlist(&self) -> Vec<QueueItem> {
        self.queue.playlist()
    }

    // Broadcasts

    /// Resolves an audience filter to concrete recipients.
    fn recipients(&self, from: &SessionId, audience: BroadcastAudience) -> Vec<SessionId> {
        match audience {
            BroadcastAudience::CurrentSession => vec![from.clone()],
            BroadcastAudience::AllGroup => self.members.keys().cloned().collect(),
            BroadcastAudience::AllExceptCurrentSession => self
                .members
                .keys()
                .filter(|id| *id != from)
                .cloned()
                .collect(),
            BroadcastAudience::AllReady => self
                .members
                .values()
                .filter(|m| !m.is_buffering || m.ignore_wait)
                .map(|m| m.session_id.clone())
                .collect(),
        }
    }

    pub(crate) fn send_group_update(
        &self,
        from: &SessionId,
        audience: BroadcastAudience,
        update: GroupUpdateKind,
        out: &mut Outbox,
    ) {
        for recipient in self.recipients(from, audience) {
            out.push(
                recipient,
                OutboundMessage::GroupUpdate(GroupUpdate {
                    group_id: self.group_id,
                    update: update.clone(),
                }),
            );
        }
    }

    pub(crate) fn send_command(
        &self,
        from: &SessionId,
        audience: BroadcastAudience,
        command: CommandType,
        out: &mut Outbox,
    ) {
        let command = self.new_command(command);

        for recipient in self.recipients(from, audience) {
            out.push(recipient, OutboundMessage::SyncPlayCommand(command.clone()));
        }
    }

    /// A command snapshot of the group's current target.
    pub fn new_command(&self, command: CommandType) -> SyncPlayCommand {
        SyncPlayCommand {
            group_id: self.group_id,
            playlist_item_id: self.current_playlist_item_id(),
            when: self.last_activity,
            position_ticks: self.position_ticks,
            command,
            emitted_at: self.clock.now(),
        }
    }

    pub(crate) fn send_play_queue_update(
        &self,
        from: &SessionId,
        audience: BroadcastAudience,
        reason: PlayQueueUpdateReason,
        out: &mut Outbox,
    ) {
        let update = self.play_queue_update(reason);
        self.send_group_update(from, audience, GroupUpdateKind::PlayQueue(update), out);
    }

    pub fn play_queue_update(&self, reason: PlayQueueUpdateReason) -> PlayQueueUpdate {
        PlayQueueUpdate {
            reason,
            last_update: self.queue.last_change(),
            playlist: self.queue.playlist(),
            playing_item_index: self
                .queue
                .current_index()
                .map(|i| i as i32)
                .unwrap_or(-1),
            start_position_ticks: self.position_ticks,
            is_playing: self.state.state_type() == GroupStateType::Playing,
            shuffle_mode: self.queue.shuffle_mode(),
            repeat_mode: self.queue.repeat_mode(),
        }
    }

    fn send_state_update(&self, from: &SessionId, reason: RequestType, out: &mut Outbox) {
        self.send_group_update(
            from,
            BroadcastAudience::AllGroup,
            GroupUpdateKind::StateUpdate(StateUpdate {
                state: self.state.state_type(),
                reason,
            }),
            out,
        );
    }

    // Request dispatch

    /// Authorizes and dispatches a request to the current state's handler.
    pub(crate) fn handle_request(
        &mut self,
        session: &SessionInfo,
        request: PlaybackRequest,
        out: &mut Outbox,
    ) {
        if let PlaybackRequest::Ping { ping_ms } = request {
            self.update_ping(&session.id, ping_ms);
            return;
        }

        if !self.access.check_request(session.user_id, &request) {
            warn!(
                "Session {} is not allowed to issue {:?} in group {}",
                session.id,
                request.request_type(),
                self.group_id
            );
            return;
        }

        let request_type = request.request_type();
        let previous = self.state.state_type();

        let state = std::mem::take(&mut self.state);
        self.state = state.handle(session, request, self, out);

        if previous != self.state.state_type() {
            self.send_state_update(&session.id, request_type, out);
        }
    }

    /// Replaces the group state outside of request dispatch, announcing the
    /// transition when the type changes.
    pub(crate) fn set_state(
        &mut self,
        state: GroupState,
        reason: RequestType,
        from: &SessionId,
        out: &mut Outbox,
    ) {
        let changed = self.state.state_type() != state.state_type();
        self.state = state;

        if changed {
            self.send_state_update(from, reason, out);
        }
    }

    // WebRTC relay

    /// Relays a signaling payload: unicast when addressed to a member,
    /// broadcast to everyone else when unaddressed.
    pub(crate) fn handle_webrtc(
        &mut self,
        session: &SessionInfo,
        request: WebRtcRequest,
        out: &mut Outbox,
    ) {
        let signal = WebRtcSignal {
            from_session_id: session.id.clone(),
            is_new_session: request.new_session,
            is_leaving: request.session_leaving,
            ice_candidate: request.ice_candidate,
            offer: request.offer,
            answer: request.answer,
        };

        match request.to {
            Some(to) => {
                if self.members.contains_key(&to) {
                    out.push(
                        to,
                        OutboundMessage::GroupUpdate(GroupUpdate {
                            group_id: self.group_id,
                            update: GroupUpdateKind::WebRtc(signal),
                        }),
                    );
                } else {
                    warn!(
                        "Dropping WebRTC signal from {}: {} is not in group {}",
                        session.id, to, self.group_id
                    );
                }
            }
            None => self.send_group_update(
                &session.id,
                BroadcastAudience::AllExceptCurrentSession,
                GroupUpdateKind::WebRtc(signal),
                out,
            ),
        }
    }
}
