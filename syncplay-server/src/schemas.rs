use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use syncplay_core::{PlaylistItemId, RepeatMode, ShuffleMode};
use syncplay_groups::{
    GroupSettingsRequest, GroupVisibility, NewGroupRequest, QueueMode, UserPermissionRow,
    WebRtcRequest,
};
use utoipa::IntoParams;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ServerError, ServerResult};

/// Parses a comma separated list of ids, as sent in query strings.
fn parse_id_list(value: &Option<String>, name: &'static str) -> ServerResult<Vec<Uuid>> {
    let Some(raw) = value else {
        return Ok(vec![]);
    };

    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().map_err(|_| ServerError::InvalidParameter(name)))
        .collect()
}

fn parse_bool_list(value: &Option<String>, name: &'static str) -> ServerResult<Vec<bool>> {
    let Some(raw) = value else {
        return Ok(vec![]);
    };

    raw.split(',')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().map_err(|_| ServerError::InvalidParameter(name)))
        .collect()
}

/// Wraps an opaque signaling payload. Clients send either raw JSON or a
/// plain string; both pass through untouched.
fn opaque_payload(value: Option<String>) -> Option<serde_json::Value> {
    value.map(|v| serde_json::from_str(&v).unwrap_or_else(|_| serde_json::Value::String(v)))
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewGroupSchema {
    #[validate(length(min = 1, max = 64))]
    pub group_name: String,
    #[param(value_type = Option<String>)]
    pub visibility: Option<GroupVisibility>,
    /// Comma separated user ids.
    pub invited_users: Option<String>,
    pub open_playback_access: Option<bool>,
    pub open_playlist_access: Option<bool>,
}

impl NewGroupSchema {
    pub fn into_request(self) -> ServerResult<NewGroupRequest> {
        Ok(NewGroupRequest {
            visibility: self.visibility.unwrap_or_default(),
            invited_users: parse_id_list(&self.invited_users, "invitedUsers")?,
            open_playback_access: self.open_playback_access.unwrap_or(true),
            open_playlist_access: self.open_playlist_access.unwrap_or(true),
            group_name: self.group_name,
        })
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JoinGroupSchema {
    pub group_id: Uuid,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsSchema {
    #[validate(length(min = 1, max = 64))]
    pub group_name: Option<String>,
    #[param(value_type = Option<String>)]
    pub visibility: Option<GroupVisibility>,
    /// Comma separated user ids.
    pub invited_users: Option<String>,
    pub open_playback_access: Option<bool>,
    pub open_playlist_access: Option<bool>,
    /// Comma separated user ids, paired with the two lists below.
    pub access_list_user_ids: Option<String>,
    pub access_list_playback: Option<String>,
    pub access_list_playlist: Option<String>,
}

impl SettingsSchema {
    pub fn into_request(self) -> ServerResult<GroupSettingsRequest> {
        let user_ids = parse_id_list(&self.access_list_user_ids, "accessListUserIds")?;
        let playback = parse_bool_list(&self.access_list_playback, "accessListPlayback")?;
        let playlist = parse_bool_list(&self.access_list_playlist, "accessListPlaylist")?;

        if playback.len() != user_ids.len() {
            return Err(ServerError::InvalidParameter("accessListPlayback"));
        }

        if playlist.len() != user_ids.len() {
            return Err(ServerError::InvalidParameter("accessListPlaylist"));
        }

        let user_permissions = user_ids
            .into_iter()
            .zip(playback)
            .zip(playlist)
            .map(|((user_id, playback), playlist)| UserPermissionRow {
                user_id,
                playback,
                playlist,
            })
            .collect();

        let invited_users = match &self.invited_users {
            Some(_) => Some(parse_id_list(&self.invited_users, "invitedUsers")?),
            None => None,
        };

        Ok(GroupSettingsRequest {
            group_name: self.group_name,
            visibility: self.visibility,
            invited_users,
            open_playback_access: self.open_playback_access,
            open_playlist_access: self.open_playlist_access,
            user_permissions,
        })
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaySchema {
    /// Comma separated item ids to play.
    pub playing_queue: String,
    pub playing_item_position: Option<usize>,
    pub start_position_ticks: Option<i64>,
}

impl PlaySchema {
    pub fn queue(&self) -> ServerResult<Vec<Uuid>> {
        parse_id_list(&Some(self.playing_queue.clone()), "playingQueue")
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaylistItemSchema {
    pub playlist_item_id: String,
}

impl PlaylistItemSchema {
    pub fn id(&self) -> PlaylistItemId {
        self.playlist_item_id.clone().into()
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveFromPlaylistSchema {
    /// Comma separated playlist item ids.
    pub playlist_item_ids: String,
}

impl RemoveFromPlaylistSchema {
    pub fn ids(&self) -> Vec<PlaylistItemId> {
        self.playlist_item_ids
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(Into::into)
            .collect()
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MovePlaylistItemSchema {
    pub playlist_item_id: String,
    pub new_index: usize,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueSchema {
    /// Comma separated item ids.
    pub item_ids: String,
    #[param(value_type = Option<String>)]
    pub mode: Option<QueueMode>,
}

impl QueueSchema {
    pub fn items(&self) -> ServerResult<Vec<Uuid>> {
        parse_id_list(&Some(self.item_ids.clone()), "itemIds")
    }
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SeekSchema {
    pub position_ticks: i64,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferingSchema {
    /// The client's UTC timestamp for the report.
    pub when: DateTime<Utc>,
    pub position_ticks: i64,
    pub is_playing: bool,
    pub playlist_item_id: String,
    pub buffering_done: Option<bool>,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IgnoreWaitSchema {
    pub ignore_wait: bool,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepeatModeSchema {
    #[param(value_type = String)]
    pub mode: RepeatMode,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShuffleModeSchema {
    #[param(value_type = String)]
    pub mode: ShuffleMode,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PingSchema {
    /// Round-trip latency in milliseconds.
    pub ping: f64,
}

#[derive(Debug, Validate, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebRtcSchema {
    pub to: Option<String>,
    pub new_session: Option<bool>,
    pub session_leaving: Option<bool>,
    pub ice_candidate: Option<String>,
    pub offer: Option<String>,
    pub answer: Option<String>,
}

impl WebRtcSchema {
    pub fn into_request(self) -> WebRtcRequest {
        WebRtcRequest {
            to: self.to.filter(|to| !to.is_empty()),
            new_session: self.new_session.unwrap_or(false),
            session_leaving: self.session_leaving.unwrap_or(false),
            ice_candidate: opaque_payload(self.ice_candidate),
            offer: opaque_payload(self.offer),
            answer: opaque_payload(self.answer),
        }
    }
}

pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let extracted: Query<T> = Query::from_request_parts(parts, state)
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Query parse failed"))?;

        extracted
            .0
            .validate()
            .map_err(|_| (StatusCode::BAD_REQUEST, "Request query is invalid"))?;

        Ok(Self(extracted.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_list() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let parsed = parse_id_list(&Some(format!("{first}, {second}")), "ids").unwrap();
        assert_eq!(parsed, vec![first, second]);

        assert!(parse_id_list(&None, "ids").unwrap().is_empty());
        assert!(parse_id_list(&Some("".to_string()), "ids").unwrap().is_empty());
        assert!(parse_id_list(&Some("not-a-uuid".to_string()), "ids").is_err());
    }

    #[test]
    fn test_settings_schema_requires_matching_lists() {
        let schema = SettingsSchema {
            group_name: None,
            visibility: None,
            invited_users: None,
            open_playback_access: None,
            open_playlist_access: None,
            access_list_user_ids: Some(Uuid::new_v4().to_string()),
            access_list_playback: Some("true,false".to_string()),
            access_list_playlist: Some("true".to_string()),
        };

        assert!(
            schema.into_request().is_err(),
            "mismatched permission rows are rejected"
        );
    }

    #[test]
    fn test_opaque_payload_passes_json_and_strings() {
        let json = opaque_payload(Some("{\"sdp\":\"x\"}".to_string())).unwrap();
        assert!(json.is_object());

        let plain = opaque_payload(Some("candidate:1".to_string())).unwrap();
        assert_eq!(plain, serde_json::Value::String("candidate:1".to_string()));
    }
}
