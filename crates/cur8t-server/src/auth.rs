//! Who is calling.
//!
//! The upstream auth gateway forwards the stable user id in `x-user-id`.
//! Everything else about the user (notably the verified email used by the
//! visibility policy) is read from the `users` table, never from headers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use cur8t_shared::constants::USER_ID_HEADER;
use cur8t_shared::visibility::Viewer;
use cur8t_shared::{ActionError, UserId};
use cur8t_store::{Database, StoreError};

use crate::api::AppState;
use crate::rate_limit::client_ip;

/// Request context for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<UserId>,
    pub client_ip: String,
}

impl Caller {
    pub fn anonymous(client_ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            client_ip: client_ip.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(UserId::new(id)),
            client_ip: "unknown".to_string(),
        }
    }

    /// Rate limit identifier: `user:<id>` when signed in, else `ip:<addr>`.
    pub fn identifier(&self) -> String {
        match &self.user_id {
            Some(id) => format!("user:{id}"),
            None => format!("ip:{}", self.client_ip),
        }
    }

    pub fn require_user(&self) -> Result<&UserId, ActionError> {
        self.user_id.as_ref().ok_or(ActionError::AuthRequired)
    }

    /// Viewer identity for the visibility policy, with the email loaded from
    /// the user record.
    pub fn viewer(&self, db: &Database) -> Result<Viewer, StoreError> {
        match &self.user_id {
            Some(id) => Ok(Viewer::authenticated(id.clone(), db.user_email(id)?)),
            None => Ok(Viewer::anonymous()),
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(UserId::new);

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);

        Ok(Caller {
            user_id,
            client_ip: client_ip(&parts.headers, peer, state.config.trust_proxy_headers),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_prefers_user() {
        assert_eq!(Caller::user("u1").identifier(), "user:u1");
        assert_eq!(Caller::anonymous("1.2.3.4").identifier(), "ip:1.2.3.4");
    }

    #[test]
    fn anonymous_requires_auth() {
        assert_eq!(
            Caller::anonymous("x").require_user(),
            Err(ActionError::AuthRequired)
        );
    }

    #[test]
    fn viewer_email_comes_from_store() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_user(&UserId::new("u1"), "U", "u1@x.com", None)
            .unwrap();

        let viewer = Caller::user("u1").viewer(&db).unwrap();
        assert_eq!(viewer.email.as_deref(), Some("u1@x.com"));

        let unknown = Caller::user("ghost").viewer(&db).unwrap();
        assert!(unknown.is_authenticated());
        assert_eq!(unknown.email, None);
    }
}
