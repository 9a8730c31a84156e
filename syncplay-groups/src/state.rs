use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::{
    BroadcastAudience, CommandType, GroupController, GroupUpdateKind, Outbox,
    PlayQueueUpdateReason, PlaybackRequest, QueueMode, QueueOpError, SessionId, SessionInfo,
};

/// The state a group holds, exactly one at a time.
///
/// Every state handles the full request vocabulary; unexpected requests are
/// acknowledged with a corrective message or dropped with a log line.
#[derive(Debug, Default)]
pub enum GroupState {
    /// No playback target.
    #[default]
    Idle,
    /// A playback decision was made and the group waits for every member
    /// that has not opted out to report ready.
    Waiting { resume_playing: bool },
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupStateType {
    Idle,
    Waiting,
    Playing,
    Paused,
}

impl GroupState {
    pub fn state_type(&self) -> GroupStateType {
        match self {
            Self::Idle => GroupStateType::Idle,
            Self::Waiting { .. } => GroupStateType::Waiting,
            Self::Playing => GroupStateType::Playing,
            Self::Paused => GroupStateType::Paused,
        }
    }

    /// Dispatches a request, returning the state the group transitions to.
    pub(crate) fn handle(
        self,
        session: &SessionInfo,
        request: PlaybackRequest,
        ctx: &mut GroupController,
        out: &mut Outbox,
    ) -> GroupState {
        match self {
            Self::Idle => handle_idle(session, request, ctx, out),
            Self::Waiting { resume_playing } => {
                handle_waiting(resume_playing, session, request, ctx, out)
            }
            Self::Playing => handle_playing(session, request, ctx, out),
            Self::Paused => handle_paused(session, request, ctx, out),
        }
    }

    /// Reacts to a member leaving. A waiting group may become unblocked.
    pub(crate) fn session_left(
        self,
        departed: &SessionId,
        ctx: &mut GroupController,
        out: &mut Outbox,
    ) -> GroupState {
        match self {
            Self::Waiting { resume_playing } if !ctx.is_buffering() => {
                finish_waiting(resume_playing, ctx.now(), departed, ctx, out)
            }
            state => state,
        }
    }
}

fn handle_idle(
    session: &SessionInfo,
    request: PlaybackRequest,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    match request {
        PlaybackRequest::Play {
            queue,
            playing_item_position,
            start_position_ticks,
        } => start_playback(session, &queue, playing_item_position, start_position_ticks, ctx, out)
            .unwrap_or(GroupState::Idle),
        request
        @ (PlaybackRequest::SetPlaylistItem { .. }
        | PlaybackRequest::RemoveFromPlaylist { .. }
        | PlaybackRequest::MovePlaylistItem { .. }
        | PlaybackRequest::Queue { .. }
        | PlaybackRequest::SetRepeatMode { .. }
        | PlaybackRequest::SetShuffleMode { .. }) => {
            handle_queue_request(session, request, ctx, out);
            GroupState::Idle
        }
        PlaybackRequest::Ready { .. } => {
            // The session thinks something is playing; tell it to stop
            ctx.set_buffering(&session.id, false);
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Stop, out);
            GroupState::Idle
        }
        PlaybackRequest::SetIgnoreWait { ignore_wait } => {
            ctx.set_ignore_wait(&session.id, ignore_wait);
            GroupState::Idle
        }
        PlaybackRequest::Stop => GroupState::Idle,
        other => {
            debug!("Ignoring {:?} while idle", other.request_type());
            GroupState::Idle
        }
    }
}

fn handle_waiting(
    resume_playing: bool,
    session: &SessionInfo,
    request: PlaybackRequest,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    match request {
        PlaybackRequest::Play {
            queue,
            playing_item_position,
            start_position_ticks,
        } => start_playback(session, &queue, playing_item_position, start_position_ticks, ctx, out)
            .unwrap_or(GroupState::Waiting { resume_playing }),
        PlaybackRequest::Ready {
            when,
            position_ticks: _,
            is_playing: _,
            playlist_item_id,
        } => {
            if ctx.current_playlist_item_id().as_ref() != Some(&playlist_item_id) {
                // The session reports an item the group moved away from
                ctx.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::CurrentSession,
                    PlayQueueUpdateReason::SetCurrentItem,
                    out,
                );
                return GroupState::Waiting { resume_playing };
            }

            ctx.set_buffering(&session.id, false);

            if ctx.is_buffering() {
                return GroupState::Waiting { resume_playing };
            }

            let base = ctx.clamp_when(when);
            finish_waiting(resume_playing, base, &session.id, ctx, out)
        }
        PlaybackRequest::Buffering { .. } => {
            ctx.set_buffering(&session.id, true);
            // Remind the session what the group is waiting at
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Pause, out);
            GroupState::Waiting { resume_playing }
        }
        PlaybackRequest::Pause => {
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Pause, out);
            GroupState::Waiting {
                resume_playing: false,
            }
        }
        PlaybackRequest::Unpause => GroupState::Waiting {
            resume_playing: true,
        },
        PlaybackRequest::Stop => {
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Stop, out);
            GroupState::Idle
        }
        PlaybackRequest::Seek { position_ticks } => {
            ctx.position_ticks = ctx.sanitize_position_ticks(position_ticks);
            ctx.last_activity = ctx.now();
            ctx.set_all_buffering(true);
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Seek, out);
            GroupState::Waiting { resume_playing }
        }
        PlaybackRequest::NextTrack { playlist_item_id } => advance_track(
            GroupState::Waiting { resume_playing },
            resume_playing,
            session,
            &playlist_item_id,
            Direction::Next,
            ctx,
            out,
        ),
        PlaybackRequest::PreviousTrack { playlist_item_id } => advance_track(
            GroupState::Waiting { resume_playing },
            resume_playing,
            session,
            &playlist_item_id,
            Direction::Previous,
            ctx,
            out,
        ),
        PlaybackRequest::SetIgnoreWait { ignore_wait } => {
            ctx.set_ignore_wait(&session.id, ignore_wait);

            if !ctx.is_buffering() {
                finish_waiting(resume_playing, ctx.now(), &session.id, ctx, out)
            } else {
                GroupState::Waiting { resume_playing }
            }
        }
        request
        @ (PlaybackRequest::SetPlaylistItem { .. }
        | PlaybackRequest::RemoveFromPlaylist { .. }
        | PlaybackRequest::MovePlaylistItem { .. }
        | PlaybackRequest::Queue { .. }
        | PlaybackRequest::SetRepeatMode { .. }
        | PlaybackRequest::SetShuffleMode { .. }) => {
            if let Some((_, current_changed)) = handle_queue_request(session, request, ctx, out) {
                if current_changed {
                    // Readiness resets for the new target
                    ctx.set_all_buffering(true);
                }
            }

            GroupState::Waiting { resume_playing }
        }
        PlaybackRequest::Ping { .. } => GroupState::Waiting { resume_playing },
    }
}

fn handle_playing(
    session: &SessionInfo,
    request: PlaybackRequest,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    match request {
        PlaybackRequest::Play {
            queue,
            playing_item_position,
            start_position_ticks,
        } => start_playback(session, &queue, playing_item_position, start_position_ticks, ctx, out)
            .unwrap_or(GroupState::Playing),
        PlaybackRequest::Pause => {
            // Freeze the position playback has reached
            let position = ctx.playback_position();
            ctx.position_ticks = ctx.sanitize_position_ticks(position);
            ctx.last_activity = ctx.now();
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Pause, out);
            GroupState::Paused
        }
        PlaybackRequest::Unpause => {
            // Already playing; restate the target for the requester
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Unpause, out);
            GroupState::Playing
        }
        PlaybackRequest::Seek { position_ticks } => {
            ctx.position_ticks = ctx.sanitize_position_ticks(position_ticks);
            ctx.last_activity = ctx.now();
            ctx.set_all_buffering(true);
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Seek, out);
            GroupState::Waiting {
                resume_playing: true,
            }
        }
        PlaybackRequest::Buffering {
            when: _,
            position_ticks,
            is_playing: _,
            playlist_item_id: _,
        } => {
            ctx.set_buffering(&session.id, true);

            if !ctx.is_buffering() {
                // An ignore-wait member is catching up on its own
                ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Unpause, out);
                return GroupState::Playing;
            }

            if position_ticks > ctx.run_time_ticks() {
                // The report ran past the end of the item
                return advance_queue_or_stop(true, &session.id, ctx, out);
            }

            ctx.position_ticks = ctx.sanitize_position_ticks(position_ticks);
            ctx.last_activity = ctx.now();
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Pause, out);
            GroupState::Waiting {
                resume_playing: true,
            }
        }
        PlaybackRequest::Ready { .. } => {
            ctx.set_buffering(&session.id, false);
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Unpause, out);
            GroupState::Playing
        }
        PlaybackRequest::NextTrack { playlist_item_id } => advance_track(
            GroupState::Playing,
            true,
            session,
            &playlist_item_id,
            Direction::Next,
            ctx,
            out,
        ),
        PlaybackRequest::PreviousTrack { playlist_item_id } => advance_track(
            GroupState::Playing,
            true,
            session,
            &playlist_item_id,
            Direction::Previous,
            ctx,
            out,
        ),
        PlaybackRequest::Stop => {
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Stop, out);
            GroupState::Idle
        }
        PlaybackRequest::SetIgnoreWait { ignore_wait } => {
            ctx.set_ignore_wait(&session.id, ignore_wait);
            GroupState::Playing
        }
        request
        @ (PlaybackRequest::SetPlaylistItem { .. }
        | PlaybackRequest::RemoveFromPlaylist { .. }
        | PlaybackRequest::MovePlaylistItem { .. }
        | PlaybackRequest::Queue { .. }
        | PlaybackRequest::SetRepeatMode { .. }
        | PlaybackRequest::SetShuffleMode { .. }) => {
            match handle_queue_request(session, request, ctx, out) {
                Some((_, true)) => {
                    // The playing item changed under us; reload everywhere
                    ctx.set_all_buffering(true);
                    GroupState::Waiting {
                        resume_playing: true,
                    }
                }
                _ => GroupState::Playing,
            }
        }
        PlaybackRequest::Ping { .. } => GroupState::Playing,
    }
}

fn handle_paused(
    session: &SessionInfo,
    request: PlaybackRequest,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    match request {
        PlaybackRequest::Play {
            queue,
            playing_item_position,
            start_position_ticks,
        } => start_playback(session, &queue, playing_item_position, start_position_ticks, ctx, out)
            .unwrap_or(GroupState::Paused),
        PlaybackRequest::Unpause => {
            ctx.set_all_buffering(true);
            GroupState::Waiting {
                resume_playing: true,
            }
        }
        PlaybackRequest::Pause => {
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Pause, out);
            GroupState::Paused
        }
        PlaybackRequest::Seek { position_ticks } => {
            ctx.position_ticks = ctx.sanitize_position_ticks(position_ticks);
            ctx.last_activity = ctx.now();
            ctx.set_all_buffering(true);
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Seek, out);
            GroupState::Waiting {
                resume_playing: false,
            }
        }
        PlaybackRequest::Buffering { .. } => {
            ctx.set_buffering(&session.id, true);
            GroupState::Paused
        }
        PlaybackRequest::Ready { .. } => {
            ctx.set_buffering(&session.id, false);
            ctx.send_command(&session.id, BroadcastAudience::CurrentSession, CommandType::Pause, out);
            GroupState::Paused
        }
        PlaybackRequest::NextTrack { playlist_item_id } => advance_track(
            GroupState::Paused,
            false,
            session,
            &playlist_item_id,
            Direction::Next,
            ctx,
            out,
        ),
        PlaybackRequest::PreviousTrack { playlist_item_id } => advance_track(
            GroupState::Paused,
            false,
            session,
            &playlist_item_id,
            Direction::Previous,
            ctx,
            out,
        ),
        PlaybackRequest::Stop => {
            ctx.send_command(&session.id, BroadcastAudience::AllGroup, CommandType::Stop, out);
            GroupState::Idle
        }
        PlaybackRequest::SetIgnoreWait { ignore_wait } => {
            ctx.set_ignore_wait(&session.id, ignore_wait);
            GroupState::Paused
        }
        request
        @ (PlaybackRequest::SetPlaylistItem { .. }
        | PlaybackRequest::RemoveFromPlaylist { .. }
        | PlaybackRequest::MovePlaylistItem { .. }
        | PlaybackRequest::Queue { .. }
        | PlaybackRequest::SetRepeatMode { .. }
        | PlaybackRequest::SetShuffleMode { .. }) => {
            match handle_queue_request(session, request, ctx, out) {
                Some((_, true)) => {
                    ctx.set_all_buffering(true);
                    GroupState::Waiting {
                        resume_playing: false,
                    }
                }
                _ => GroupState::Paused,
            }
        }
        PlaybackRequest::Ping { .. } => GroupState::Paused,
    }
}

/// Replaces the queue from a Play request, entering a fresh waiting round on
/// success. Returns None when the queue was refused.
fn start_playback(
    session: &SessionInfo,
    queue: &[syncplay_core::ItemId],
    playing_item_position: usize,
    start_position_ticks: i64,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> Option<GroupState> {
    match ctx.set_play_queue(queue, playing_item_position, start_position_ticks) {
        Ok(()) => {
            ctx.set_all_buffering(true);
            ctx.send_play_queue_update(
                &session.id,
                BroadcastAudience::AllGroup,
                PlayQueueUpdateReason::NewPlaylist,
                out,
            );
            Some(GroupState::Waiting {
                resume_playing: true,
            })
        }
        Err(_) => {
            ctx.send_group_update(
                &session.id,
                BroadcastAudience::CurrentSession,
                GroupUpdateKind::LibraryAccessDenied(
                    "A member of the group cannot access an item in the queue".to_string(),
                ),
                out,
            );
            None
        }
    }
}

/// Applies a queue-editing request and broadcasts the resulting queue.
///
/// Returns the update reason and whether the playing item changed, or None
/// when the request was refused or stale.
fn handle_queue_request(
    session: &SessionInfo,
    request: PlaybackRequest,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> Option<(PlayQueueUpdateReason, bool)> {
    let request_type = request.request_type();

    let result = match request {
        PlaybackRequest::SetPlaylistItem { playlist_item_id } => ctx
            .set_playing_item(&playlist_item_id)
            .map(|_| (PlayQueueUpdateReason::SetCurrentItem, true)),
        PlaybackRequest::RemoveFromPlaylist { playlist_item_ids } => ctx
            .remove_from_play_queue(&playlist_item_ids)
            .map(|playing_removed| (PlayQueueUpdateReason::RemoveItems, playing_removed)),
        PlaybackRequest::MovePlaylistItem {
            playlist_item_id,
            new_index,
        } => ctx
            .move_item_in_play_queue(&playlist_item_id, new_index)
            .map(|_| (PlayQueueUpdateReason::MoveItem, false)),
        PlaybackRequest::Queue { item_ids, mode } => {
            let reason = match mode {
                QueueMode::Queue => PlayQueueUpdateReason::Queue,
                QueueMode::QueueNext => PlayQueueUpdateReason::QueueNext,
            };

            ctx.add_to_play_queue(&item_ids, mode).map(|_| (reason, false))
        }
        PlaybackRequest::SetRepeatMode { mode } => {
            ctx.set_repeat_mode(mode);
            Ok((PlayQueueUpdateReason::RepeatMode, false))
        }
        PlaybackRequest::SetShuffleMode { mode } => {
            ctx.set_shuffle_mode(mode);
            Ok((PlayQueueUpdateReason::ShuffleMode, false))
        }
        _ => return None,
    };

    match result {
        Ok((reason, current_changed)) => {
            ctx.send_play_queue_update(&session.id, BroadcastAudience::AllGroup, reason, out);
            Some((reason, current_changed))
        }
        Err(QueueOpError::AccessDenied) => {
            ctx.send_group_update(
                &session.id,
                BroadcastAudience::CurrentSession,
                GroupUpdateKind::LibraryAccessDenied(
                    "A member of the group cannot access an item in the queue".to_string(),
                ),
                out,
            );
            None
        }
        Err(QueueOpError::NotFound) => {
            debug!(
                "Dropping stale {:?} from session {}",
                request_type, session.id
            );
            None
        }
    }
}

enum Direction {
    Next,
    Previous,
}

/// Handles a track navigation request, guarding against stale reports that
/// refer to an item the group already moved away from.
///
/// `stay` is the state to remain in when the request is a no-op.
fn advance_track(
    stay: GroupState,
    resume_playing: bool,
    session: &SessionInfo,
    playlist_item_id: &syncplay_core::PlaylistItemId,
    direction: Direction,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    let current = ctx.current_playlist_item_id();

    if current.as_ref() != Some(playlist_item_id) {
        debug!(
            "Dropping stale track change from session {}: {} is not current",
            session.id, playlist_item_id
        );
        return stay;
    }

    match direction {
        Direction::Next => advance_queue_or_stop(resume_playing, &session.id, ctx, out),
        Direction::Previous => match ctx.previous_item_in_queue() {
            Ok(true) => {
                ctx.set_all_buffering(true);
                ctx.send_play_queue_update(
                    &session.id,
                    BroadcastAudience::AllGroup,
                    PlayQueueUpdateReason::PreviousItem,
                    out,
                );
                GroupState::Waiting { resume_playing }
            }
            _ => stay,
        },
    }
}

/// Moves to the next queue entry, stopping the group when the queue ends.
fn advance_queue_or_stop(
    resume_playing: bool,
    from: &SessionId,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    match ctx.next_item_in_queue() {
        Ok(true) => {
            ctx.set_all_buffering(true);
            ctx.send_play_queue_update(
                from,
                BroadcastAudience::AllGroup,
                PlayQueueUpdateReason::NextItem,
                out,
            );
            GroupState::Waiting { resume_playing }
        }
        _ => {
            ctx.send_command(from, BroadcastAudience::AllGroup, CommandType::Stop, out);
            GroupState::Idle
        }
    }
}

/// Schedules the synchronized start once every blocking member is ready.
///
/// The scheduled time is `max(now, base + time sync offset + highest ping)`,
/// which may land in the future; elapsed time against it is then negative
/// until the group actually starts, assuming client drift stays within the
/// time sync offset.
fn finish_waiting(
    resume_playing: bool,
    base: DateTime<Utc>,
    from: &SessionId,
    ctx: &mut GroupController,
    out: &mut Outbox,
) -> GroupState {
    let now = ctx.now();
    let ping = chrono::Duration::milliseconds(ctx.highest_ping().round() as i64);
    let ready_time = (base + ctx.config.time_sync_offset() + ping).max(now);

    ctx.last_activity = ready_time;

    if resume_playing {
        ctx.send_command(from, BroadcastAudience::AllReady, CommandType::Unpause, out);
        GroupState::Playing
    } else {
        ctx.send_command(from, BroadcastAudience::AllReady, CommandType::Pause, out);
        GroupState::Paused
    }
}
