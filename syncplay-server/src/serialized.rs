//! All schemas that are exposed from endpoints are defined here
//! along with the conversions from the coordinator's types

use chrono::{DateTime, Utc};
use serde::Serialize;
use syncplay_groups::{GroupInfo as CoordinatorGroupInfo, GroupStateType, UserProfile};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    group_id: Uuid,
    group_name: String,
    state: GroupState,
    participants: Vec<String>,
    last_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub enum GroupState {
    Idle,
    Waiting,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    user_id: Uuid,
    user_name: String,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<GroupState> for GroupStateType {
    fn to_serialized(&self) -> GroupState {
        match self {
            GroupStateType::Idle => GroupState::Idle,
            GroupStateType::Waiting => GroupState::Waiting,
            GroupStateType::Playing => GroupState::Playing,
            GroupStateType::Paused => GroupState::Paused,
        }
    }
}

impl ToSerialized<GroupInfo> for CoordinatorGroupInfo {
    fn to_serialized(&self) -> GroupInfo {
        GroupInfo {
            group_id: self.group_id,
            group_name: self.group_name.clone(),
            state: self.state.to_serialized(),
            participants: self.participants.clone(),
            last_updated_at: self.last_updated_at,
        }
    }
}

impl ToSerialized<UserInfo> for UserProfile {
    fn to_serialized(&self) -> UserInfo {
        UserInfo {
            user_id: self.id,
            user_name: self.name.clone(),
        }
    }
}
