//! Per-user bookmarked URLs, kept apart from collections.

use tracing::debug;
use uuid::Uuid;

use cur8t_shared::validate;
use cur8t_shared::ActionError;
use cur8t_store::{Favorite, StoreError};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;
use crate::rate_limit::ActionClass;

const NOT_FOUND: ActionError = ActionError::NotFound("Favorite");

pub async fn create(
    state: &AppState,
    caller: &Caller,
    title: &str,
    url: &str,
) -> Result<Favorite, ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Favorite, &caller.identifier())
        .await?;
    let title = validate::title(title)?;
    let url = validate::url(url)?;

    let db = state.db.lock().await;
    match db.add_favorite(user, &title, &url) {
        Ok(favorite) => {
            debug!(favorite_id = %favorite.id, user = %user, "favorite added");
            Ok(favorite)
        }
        Err(StoreError::Duplicate) => Err(ActionError::invalid_state(
            "This URL is already in your favorites",
        )),
        Err(e) => Err(internal("Failed to create favorite")(e)),
    }
}

/// Newest first.
pub async fn list(state: &AppState, caller: &Caller) -> Result<Vec<Favorite>, ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Favorite, &caller.identifier())
        .await?;

    let db = state.db.lock().await;
    db.list_favorites(user)
        .map_err(internal("Failed to fetch favorites"))
}

pub async fn rename(
    state: &AppState,
    caller: &Caller,
    id: Uuid,
    title: &str,
) -> Result<Favorite, ActionError> {
    const FAILED: &str = "Failed to update favorite";

    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Favorite, &caller.identifier())
        .await?;
    let title = validate::title(title)?;

    let db = state.db.lock().await;
    if !db
        .rename_favorite(id, user, &title)
        .map_err(internal(FAILED))?
    {
        return Err(NOT_FOUND);
    }
    db.get_favorite(id).map_err(internal(FAILED))
}

pub async fn delete(state: &AppState, caller: &Caller, id: Uuid) -> Result<(), ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Favorite, &caller.identifier())
        .await?;

    let db = state.db.lock().await;
    if !db
        .delete_favorite(id, user)
        .map_err(internal("Failed to delete favorite"))?
    {
        return Err(NOT_FOUND);
    }
    Ok(())
}
