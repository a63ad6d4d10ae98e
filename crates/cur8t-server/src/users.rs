//! User sync from the auth gateway.

use serde::Deserialize;
use tracing::info;

use cur8t_shared::validate;
use cur8t_shared::ActionError;
use cur8t_store::{StoreError, User};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;
use crate::rate_limit::ActionClass;

#[derive(Debug, Clone, Deserialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Create or refresh the caller's user record. The email stored here is
/// the one the visibility policy matches against shared lists.
pub async fn sync_user(
    state: &AppState,
    caller: &Caller,
    profile: &UserProfile,
) -> Result<User, ActionError> {
    let id = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::UserUpdate, &caller.identifier())
        .await?;

    let email = validate::email(&profile.email)?;
    let name = profile.name.trim();
    if name.is_empty() {
        return Err(ActionError::validation("Name is required"));
    }
    let username = profile
        .username
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let db = state.db.lock().await;
    match db.upsert_user(id, name, &email, username) {
        Ok(user) => {
            info!(user = %id, "user synced");
            Ok(user)
        }
        Err(StoreError::Duplicate) => Err(ActionError::invalid_state(
            "Email or username is already in use",
        )),
        Err(e) => Err(internal("Failed to update user")(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_state;

    fn profile(email: &str) -> UserProfile {
        UserProfile {
            name: "Ada".into(),
            email: email.into(),
            username: None,
        }
    }

    #[tokio::test]
    async fn email_is_normalized() {
        let state = test_state();
        let user = sync_user(&state, &Caller::user("u1"), &profile(" Ada@X.com "))
            .await
            .unwrap();
        assert_eq!(user.email, "ada@x.com");
    }

    #[tokio::test]
    async fn email_conflict_is_invalid_state() {
        let state = test_state();
        sync_user(&state, &Caller::user("u1"), &profile("a@x.com"))
            .await
            .unwrap();
        assert!(matches!(
            sync_user(&state, &Caller::user("u2"), &profile("a@x.com")).await,
            Err(ActionError::InvalidState(_))
        ));
        assert!(matches!(
            sync_user(&state, &Caller::user("u3"), &profile("nope")).await,
            Err(ActionError::Validation(_))
        ));
    }
}
