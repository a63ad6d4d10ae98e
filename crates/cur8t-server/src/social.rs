//! Likes, saves and pins.

use tracing::debug;

use cur8t_shared::constants::MAX_PINNED_COLLECTIONS;
use cur8t_shared::visibility::{can_view, AccessDecision};
use cur8t_shared::{ActionError, CollectionId, UserId};
use cur8t_store::{Collection, Database, PinOutcome};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;
use crate::rate_limit::ActionClass;

#[derive(Debug, Clone, Copy)]
enum Toggle {
    Like,
    Unlike,
    Save,
    Unsave,
}

impl Toggle {
    fn failed(self) -> &'static str {
        match self {
            Toggle::Like => "Failed to like collection",
            Toggle::Unlike => "Failed to unlike collection",
            Toggle::Save => "Failed to save collection",
            Toggle::Unsave => "Failed to unsave collection",
        }
    }

    fn noop(self) -> &'static str {
        match self {
            Toggle::Like => "Collection already liked",
            Toggle::Unlike => "Collection not liked yet",
            Toggle::Save => "Collection already saved",
            Toggle::Unsave => "Collection not saved",
        }
    }
}

pub async fn like(state: &AppState, caller: &Caller, id: CollectionId) -> Result<(), ActionError> {
    toggle(state, caller, id, Toggle::Like).await
}

pub async fn unlike(
    state: &AppState,
    caller: &Caller,
    id: CollectionId,
) -> Result<(), ActionError> {
    toggle(state, caller, id, Toggle::Unlike).await
}

pub async fn save(state: &AppState, caller: &Caller, id: CollectionId) -> Result<(), ActionError> {
    toggle(state, caller, id, Toggle::Save).await
}

pub async fn unsave(
    state: &AppState,
    caller: &Caller,
    id: CollectionId,
) -> Result<(), ActionError> {
    toggle(state, caller, id, Toggle::Unsave).await
}

async fn toggle(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    op: Toggle,
) -> Result<(), ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Social, &caller.identifier())
        .await?;

    let mut db = state.db.lock().await;
    // Removing a like or save is always allowed, even after the collection
    // stopped being visible to the user.
    if matches!(op, Toggle::Like | Toggle::Save) {
        ensure_viewable(&db, caller, collection_id, op.failed())?;
    }

    let changed = match op {
        Toggle::Like => db.like_collection(user, collection_id),
        Toggle::Unlike => db.unlike_collection(user, collection_id),
        Toggle::Save => db.save_collection(user, collection_id),
        Toggle::Unsave => db.unsave_collection(user, collection_id),
    }
    .map_err(internal(op.failed()))?;

    if !changed {
        return Err(ActionError::invalid_state(op.noop()));
    }
    debug!(collection_id = %collection_id, user = %user, ?op, "social toggle");
    Ok(())
}

fn ensure_viewable(
    db: &Database,
    caller: &Caller,
    collection_id: CollectionId,
    failed: &'static str,
) -> Result<(), ActionError> {
    let collection = db
        .find_collection(collection_id)
        .map_err(internal(failed))?
        .ok_or(ActionError::NotFound("Collection"))?;
    let viewer = caller.viewer(db).map_err(internal(failed))?;
    match can_view(&collection.access_subject(), &viewer) {
        AccessDecision::Allow => Ok(()),
        AccessDecision::Deny(reason) => Err(ActionError::Forbidden(reason.as_str().to_string())),
    }
}

pub async fn pin(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
) -> Result<(), ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Social, &caller.identifier())
        .await?;

    let mut db = state.db.lock().await;
    let outcome = db
        .pin_collection(user, collection_id, MAX_PINNED_COLLECTIONS)
        .map_err(internal("Failed to pin collection"))?;

    match outcome {
        PinOutcome::Pinned => Ok(()),
        PinOutcome::AlreadyPinned => {
            Err(ActionError::invalid_state("Collection is already pinned"))
        }
        PinOutcome::LimitReached => Err(ActionError::invalid_state(format!(
            "Cannot pin more than {MAX_PINNED_COLLECTIONS} collections"
        ))),
        PinOutcome::NotOwned => Err(ActionError::Forbidden(
            "Collection not found or does not belong to you".into(),
        )),
    }
}

pub async fn unpin(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
) -> Result<(), ActionError> {
    let user = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Social, &caller.identifier())
        .await?;

    let db = state.db.lock().await;
    if !db
        .unpin_collection(user, collection_id)
        .map_err(internal("Failed to unpin collection"))?
    {
        return Err(ActionError::invalid_state("Collection is not pinned"));
    }
    Ok(())
}

pub async fn list_pinned(
    state: &AppState,
    caller: &Caller,
) -> Result<Vec<Collection>, ActionError> {
    let user = caller.require_user()?;
    let db = state.db.lock().await;
    db.list_pinned_collections(user)
        .map_err(internal("Failed to fetch pinned collections"))
}

/// Saved collections the caller can still view. A collection made private
/// after it was saved drops out of the list without deleting the save.
pub async fn list_saved(state: &AppState, caller: &Caller) -> Result<Vec<Collection>, ActionError> {
    const FAILED: &str = "Failed to fetch saved collections";

    let user: &UserId = caller.require_user()?;
    let db = state.db.lock().await;
    let viewer = caller.viewer(&db).map_err(internal(FAILED))?;
    let saved = db.list_saved_collections(user).map_err(internal(FAILED))?;

    Ok(saved
        .into_iter()
        .filter(|c| can_view(&c.access_subject(), &viewer).is_allowed())
        .map(|mut c| {
            if &c.owner_id != user {
                c.shared_emails.clear();
            }
            c
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{seed_collection, seed_user, test_state};
    use cur8t_shared::Visibility;

    #[tokio::test]
    async fn like_requires_visibility() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let fan = seed_user(&state, "fan").await;
        let public = seed_collection(&state, &owner, Visibility::Public).await;
        let private = seed_collection(&state, &owner, Visibility::Private).await;

        like(&state, &fan, public).await.unwrap();
        assert_eq!(
            like(&state, &fan, public).await.unwrap_err(),
            ActionError::invalid_state("Collection already liked")
        );
        assert_eq!(
            like(&state, &fan, private).await.unwrap_err(),
            ActionError::Forbidden("private".into())
        );
        unlike(&state, &fan, public).await.unwrap();
        assert_eq!(
            unlike(&state, &fan, public).await.unwrap_err(),
            ActionError::invalid_state("Collection not liked yet")
        );
    }

    #[tokio::test]
    async fn saved_list_follows_visibility() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let fan = seed_user(&state, "fan").await;
        let c = seed_collection(&state, &owner, Visibility::Public).await;

        save(&state, &fan, c).await.unwrap();
        assert_eq!(list_saved(&state, &fan).await.unwrap().len(), 1);

        crate::collections::change_visibility(&state, &owner, c, Visibility::Private, None)
            .await
            .unwrap();
        assert!(list_saved(&state, &fan).await.unwrap().is_empty());

        // The save itself survives and can still be removed.
        unsave(&state, &fan, c).await.unwrap();
    }

    #[tokio::test]
    async fn pin_rules() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let other = seed_user(&state, "alice").await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(seed_collection(&state, &owner, Visibility::Public).await);
        }

        for id in &ids[..3] {
            pin(&state, &owner, *id).await.unwrap();
        }
        assert_eq!(
            pin(&state, &owner, ids[3]).await.unwrap_err(),
            ActionError::invalid_state("Cannot pin more than 3 collections")
        );
        assert!(matches!(
            pin(&state, &other, ids[0]).await,
            Err(ActionError::Forbidden(_))
        ));

        unpin(&state, &owner, ids[0]).await.unwrap();
        pin(&state, &owner, ids[3]).await.unwrap();
        let pinned: Vec<_> = list_pinned(&state, &owner)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(pinned, vec![ids[1], ids[2], ids[3]]);
    }
}
