use std::ops::Deref;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
};
use syncplay_groups::SessionInfo;

use crate::context::ServerContext;

/// Wraps [SessionInfo] so [FromRequestParts] can be implemented for it.
///
/// Authentication itself lives in the session registry; this only resolves
/// the bearer token into a session.
pub struct Session(SessionInfo);

impl Deref for Session {
    type Target = SessionInfo;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl FromRequestParts<ServerContext> for Session {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|x| x.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing authorization"))?;

        let parts: Vec<_> = token.split_ascii_whitespace().collect();

        if parts.first() != Some(&"Bearer") {
            return Err((StatusCode::BAD_REQUEST, "Authorization must be Bearer"));
        }

        let token = parts.last().cloned().unwrap_or_default();

        let session = context
            .syncplay
            .sessions()
            .session_by_token(token)
            .ok_or((StatusCode::UNAUTHORIZED, "Session does not exist"))?;

        Ok(Self(session))
    }
}
