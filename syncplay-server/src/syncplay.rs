use axum::{
    http::StatusCode,
    routing::{get, post},
    Json,
};
use tokio_util::sync::CancellationToken;

use syncplay_groups::{PlaybackRequest, QueueMode};

use crate::{
    auth::Session,
    context::ServerContext,
    errors::ServerResult,
    schemas::{
        BufferingSchema, IgnoreWaitSchema, JoinGroupSchema, MovePlaylistItemSchema, NewGroupSchema,
        PingSchema, PlaySchema, PlaylistItemSchema, QueueSchema, RemoveFromPlaylistSchema,
        RepeatModeSchema, SeekSchema, SettingsSchema, ShuffleModeSchema, ValidatedQuery,
        WebRtcSchema,
    },
    serialized::{GroupInfo, ToSerialized, UserInfo},
    Router,
};

#[utoipa::path(
    post,
    path = "/SyncPlay/New",
    tag = "syncplay",
    params(NewGroupSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The group was created")
    )
)]
async fn new_group(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<NewGroupSchema>,
) -> ServerResult<StatusCode> {
    let request = query.into_request()?;
    let cancel = CancellationToken::new();

    context.syncplay.new_group(&session, request, &cancel).await;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Join",
    tag = "syncplay",
    params(JoinGroupSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The join request was accepted for processing")
    )
)]
async fn join_group(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<JoinGroupSchema>,
) -> ServerResult<StatusCode> {
    let cancel = CancellationToken::new();

    context
        .syncplay
        .join_group(&session, query.group_id, &cancel)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Leave",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The session left its group")
    )
)]
async fn leave_group(session: Session, context: ServerContext) -> ServerResult<StatusCode> {
    let cancel = CancellationToken::new();

    context.syncplay.leave_group(&session, &cancel).await;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Settings",
    tag = "syncplay",
    params(SettingsSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The settings update was accepted for processing")
    )
)]
async fn update_settings(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<SettingsSchema>,
) -> ServerResult<StatusCode> {
    let request = query.into_request()?;
    let cancel = CancellationToken::new();

    context
        .syncplay
        .update_group_settings(&session, request, &cancel)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/SyncPlay/List",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<GroupInfo>)
    )
)]
async fn list_groups(session: Session, context: ServerContext) -> Json<Vec<GroupInfo>> {
    let groups = context.syncplay.list_groups(&session);

    Json(groups.to_serialized())
}

#[utoipa::path(
    get,
    path = "/SyncPlay/ListAvailableUsers",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<UserInfo>)
    )
)]
async fn list_available_users(_session: Session, context: ServerContext) -> Json<Vec<UserInfo>> {
    let users = context.syncplay.list_available_users();

    Json(users.to_serialized())
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Play",
    tag = "syncplay",
    params(PlaySchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The play request was accepted for processing")
    )
)]
async fn play(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<PlaySchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::Play {
        queue: query.queue()?,
        playing_item_position: query.playing_item_position.unwrap_or(0),
        start_position_ticks: query.start_position_ticks.unwrap_or(0),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/SetPlaylistItem",
    tag = "syncplay",
    params(PlaylistItemSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn set_playlist_item(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<PlaylistItemSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::SetPlaylistItem {
        playlist_item_id: query.id(),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/RemoveFromPlaylist",
    tag = "syncplay",
    params(RemoveFromPlaylistSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn remove_from_playlist(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<RemoveFromPlaylistSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::RemoveFromPlaylist {
        playlist_item_ids: query.ids(),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/MovePlaylistItem",
    tag = "syncplay",
    params(MovePlaylistItemSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn move_playlist_item(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<MovePlaylistItemSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::MovePlaylistItem {
        playlist_item_id: query.playlist_item_id.clone().into(),
        new_index: query.new_index,
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Queue",
    tag = "syncplay",
    params(QueueSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn queue(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<QueueSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::Queue {
        item_ids: query.items()?,
        mode: query.mode.unwrap_or(QueueMode::Queue),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Unpause",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn unpause(session: Session, context: ServerContext) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::Unpause).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Pause",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn pause(session: Session, context: ServerContext) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::Pause).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Stop",
    tag = "syncplay",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn stop(session: Session, context: ServerContext) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::Stop).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Seek",
    tag = "syncplay",
    params(SeekSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn seek(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<SeekSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::Seek {
        position_ticks: query.position_ticks,
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Buffering",
    tag = "syncplay",
    params(BufferingSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The report was accepted for processing")
    )
)]
async fn buffering(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<BufferingSchema>,
) -> ServerResult<StatusCode> {
    let playlist_item_id = query.playlist_item_id.clone().into();

    // A finished buffering report is a readiness report
    let request = if query.buffering_done.unwrap_or(false) {
        PlaybackRequest::Ready {
            when: query.when,
            position_ticks: query.position_ticks,
            is_playing: query.is_playing,
            playlist_item_id,
        }
    } else {
        PlaybackRequest::Buffering {
            when: query.when,
            position_ticks: query.position_ticks,
            is_playing: query.is_playing,
            playlist_item_id,
        }
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/SetIgnoreWait",
    tag = "syncplay",
    params(IgnoreWaitSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn set_ignore_wait(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<IgnoreWaitSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::SetIgnoreWait {
        ignore_wait: query.ignore_wait,
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/NextTrack",
    tag = "syncplay",
    params(PlaylistItemSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn next_track(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<PlaylistItemSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::NextTrack {
        playlist_item_id: query.id(),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/PreviousTrack",
    tag = "syncplay",
    params(PlaylistItemSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn previous_track(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<PlaylistItemSchema>,
) -> ServerResult<StatusCode> {
    let request = PlaybackRequest::PreviousTrack {
        playlist_item_id: query.id(),
    };

    dispatch(session, context, request).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/SetRepeatMode",
    tag = "syncplay",
    params(RepeatModeSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn set_repeat_mode(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<RepeatModeSchema>,
) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::SetRepeatMode { mode: query.mode }).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/SetShuffleMode",
    tag = "syncplay",
    params(ShuffleModeSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The request was accepted for processing")
    )
)]
async fn set_shuffle_mode(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<ShuffleModeSchema>,
) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::SetShuffleMode { mode: query.mode }).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/Ping",
    tag = "syncplay",
    params(PingSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The ping was recorded")
    )
)]
async fn ping(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<PingSchema>,
) -> ServerResult<StatusCode> {
    dispatch(session, context, PlaybackRequest::Ping { ping_ms: query.ping }).await
}

#[utoipa::path(
    post,
    path = "/SyncPlay/WebRTC",
    tag = "syncplay",
    params(WebRtcSchema),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The signal was accepted for relaying")
    )
)]
async fn webrtc(
    session: Session,
    context: ServerContext,
    ValidatedQuery(query): ValidatedQuery<WebRtcSchema>,
) -> ServerResult<StatusCode> {
    let cancel = CancellationToken::new();

    context
        .syncplay
        .handle_webrtc(&session, query.into_request(), &cancel)
        .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Forwards a playback request to the session's group and acknowledges it.
/// Semantic outcomes travel out-of-band through the session's message
/// channel.
async fn dispatch(
    session: Session,
    context: ServerContext,
    request: PlaybackRequest,
) -> ServerResult<StatusCode> {
    let cancel = CancellationToken::new();

    context.syncplay.handle_request(&session, request, &cancel).await;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/New", post(new_group))
        .route("/Join", post(join_group))
        .route("/Leave", post(leave_group))
        .route("/Settings", post(update_settings))
        .route("/List", get(list_groups))
        .route("/ListAvailableUsers", get(list_available_users))
        .route("/Play", post(play))
        .route("/SetPlaylistItem", post(set_playlist_item))
        .route("/RemoveFromPlaylist", post(remove_from_playlist))
        .route("/MovePlaylistItem", post(move_playlist_item))
        .route("/Queue", post(queue))
        .route("/Unpause", post(unpause))
        .route("/Pause", post(pause))
        .route("/Stop", post(stop))
        .route("/Seek", post(seek))
        .route("/Buffering", post(buffering))
        .route("/SetIgnoreWait", post(set_ignore_wait))
        .route("/NextTrack", post(next_track))
        .route("/PreviousTrack", post(previous_track))
        .route("/SetRepeatMode", post(set_repeat_mode))
        .route("/SetShuffleMode", post(set_shuffle_mode))
        .route("/Ping", post(ping))
        .route("/WebRTC", post(webrtc))
}
