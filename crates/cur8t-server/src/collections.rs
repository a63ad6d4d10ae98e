//! Collection actions: create, read, edit, share, links and the public feed.
//!
//! Owner-only writes report a collection the caller does not own as
//! "not found", the same as a missing one.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use cur8t_shared::constants::MAX_TITLE_LEN;
use cur8t_shared::validate;
use cur8t_shared::visibility::{can_view, AccessDecision};
use cur8t_shared::{ActionError, CollectionId, Visibility};
use cur8t_store::{Collection, Link, NewCollection};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;
use crate::rate_limit::ActionClass;

const NOT_FOUND: ActionError = ActionError::NotFound("Collection");

/// A collection with its links, as returned to a permitted viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDetail {
    #[serde(flatten)]
    pub collection: Collection,
    pub links: Vec<Link>,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub collections: Vec<Collection>,
    pub page: usize,
    pub has_more: bool,
}

// ---------------------------------------------------------------------------
// Create / read
// ---------------------------------------------------------------------------

pub async fn create(
    state: &AppState,
    caller: &Caller,
    title: &str,
    description: &str,
    visibility: Option<Visibility>,
) -> Result<Collection, ActionError> {
    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;
    let title = validate::title(title)?;
    let description = validate::description(description)?;

    let db = state.db.lock().await;
    let collection = db
        .create_collection(&NewCollection {
            owner_id: owner.clone(),
            title,
            description,
            visibility: visibility.unwrap_or_default(),
        })
        .map_err(internal("Failed to create collection"))?;

    info!(collection_id = %collection.id, owner = %owner, "collection created");
    Ok(collection)
}

/// Fetch a collection if the visibility policy lets the caller see it.
pub async fn get(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
) -> Result<CollectionDetail, ActionError> {
    const FAILED: &str = "Failed to fetch collection";

    let db = state.db.lock().await;
    let mut collection = db
        .find_collection(collection_id)
        .map_err(internal(FAILED))?
        .ok_or(NOT_FOUND)?;
    let viewer = caller.viewer(&db).map_err(internal(FAILED))?;

    if let AccessDecision::Deny(reason) = can_view(&collection.access_subject(), &viewer) {
        return Err(ActionError::Forbidden(reason.as_str().to_string()));
    }

    let is_owner = viewer.user_id.as_ref() == Some(&collection.owner_id);
    if !is_owner {
        collection.shared_emails.clear();
    }
    let links = db.list_links(collection_id).map_err(internal(FAILED))?;

    Ok(CollectionDetail {
        collection,
        links,
        is_owner,
    })
}

pub async fn list_mine(state: &AppState, caller: &Caller) -> Result<Vec<Collection>, ActionError> {
    let owner = caller.require_user()?;
    let db = state.db.lock().await;
    db.list_collections_by_owner(owner)
        .map_err(internal("Failed to fetch collections"))
}

pub async fn list_protected(
    state: &AppState,
    caller: &Caller,
) -> Result<Vec<Collection>, ActionError> {
    let owner = caller.require_user()?;
    let db = state.db.lock().await;
    db.list_collections_by_visibility(owner, Visibility::Protected)
        .map_err(internal("Failed to fetch protected collections"))
}

/// Public collections, newest first, optionally filtered by a search term.
pub async fn public_feed(
    state: &AppState,
    caller: &Caller,
    query: Option<&str>,
    page: usize,
) -> Result<FeedPage, ActionError> {
    state
        .rate_limiter
        .check(ActionClass::Search, &caller.identifier())
        .await?;

    let page = page.max(1);
    let size = state.config.feed_page_size;
    let (limit, offset) =
        feed_window(page, size).ok_or_else(|| ActionError::validation("Invalid page"))?;
    let db = state.db.lock().await;
    let mut collections = db
        .list_public_collections(query, limit, offset)
        .map_err(internal("Failed to fetch public collections"))?;

    let has_more = collections.len() > size;
    collections.truncate(size);
    for c in &mut collections {
        c.shared_emails.clear();
    }

    Ok(FeedPage {
        collections,
        page,
        has_more,
    })
}

/// SQL `LIMIT`/`OFFSET` for a 1-based page, fetching one extra row to
/// detect a following page. `None` if either bound leaves `i64`.
fn feed_window(page: usize, size: usize) -> Option<(i64, i64)> {
    let limit = i64::try_from(size.checked_add(1)?).ok()?;
    let offset = i64::try_from(page.checked_sub(1)?.checked_mul(size)?).ok()?;
    Some((limit, offset))
}

/// Copy a collection the caller may view into a new one they own.
///
/// Private sources are refused outright, including for their owner. The
/// copy starts with an empty share list and zeroed counters.
pub async fn duplicate(
    state: &AppState,
    caller: &Caller,
    source_id: CollectionId,
    include_links: bool,
    visibility: Option<Visibility>,
) -> Result<Collection, ActionError> {
    const FAILED: &str = "Failed to duplicate collection";

    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;

    let mut db = state.db.lock().await;
    let source = db
        .find_collection(source_id)
        .map_err(internal(FAILED))?
        .ok_or(ActionError::NotFound("Source collection"))?;
    if source.visibility == Visibility::Private {
        return Err(ActionError::Forbidden(
            "Cannot duplicate private collections".to_string(),
        ));
    }
    let viewer = caller.viewer(&db).map_err(internal(FAILED))?;
    if let AccessDecision::Deny(reason) = can_view(&source.access_subject(), &viewer) {
        return Err(ActionError::Forbidden(reason.as_str().to_string()));
    }

    let title: String = format!("Copy of {}", source.title)
        .chars()
        .take(MAX_TITLE_LEN)
        .collect();
    let copy = db
        .duplicate_collection(
            source_id,
            &NewCollection {
                owner_id: owner.clone(),
                title: title.trim_end().to_string(),
                description: source.description,
                visibility: visibility.unwrap_or_default(),
            },
            include_links,
        )
        .map_err(internal(FAILED))?;

    info!(
        source = %source_id,
        collection_id = %copy.id,
        links = copy.total_links,
        "collection duplicated"
    );
    Ok(copy)
}

// ---------------------------------------------------------------------------
// Owner edits
// ---------------------------------------------------------------------------

/// Rename and re-describe.
pub async fn update_details(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    title: &str,
    description: &str,
) -> Result<Collection, ActionError> {
    const FAILED: &str = "Failed to update collection";

    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;
    let title = validate::title(title)?;
    let description = validate::description(description)?;

    let db = state.db.lock().await;
    if !db
        .update_collection_details(collection_id, owner, &title, &description)
        .map_err(internal(FAILED))?
    {
        return Err(NOT_FOUND);
    }
    db.get_collection(collection_id).map_err(internal(FAILED))
}

/// Switch visibility. Protected collections take the given shared list
/// (or keep their current one when none is given); other visibilities
/// clear it.
pub async fn change_visibility(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    visibility: Visibility,
    shared_emails: Option<&[String]>,
) -> Result<Collection, ActionError> {
    const FAILED: &str = "Failed to update collection visibility";

    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Visibility, &caller.identifier())
        .await?;
    let requested = shared_emails.map(validate::email_list).transpose()?;

    let db = state.db.lock().await;
    let current = db
        .find_collection(collection_id)
        .map_err(internal(FAILED))?
        .filter(|c| &c.owner_id == owner)
        .ok_or(NOT_FOUND)?;

    let emails = match visibility {
        Visibility::Protected => requested.unwrap_or(current.shared_emails),
        Visibility::Public | Visibility::Private => Vec::new(),
    };

    if !db
        .update_visibility(collection_id, owner, visibility, &emails)
        .map_err(internal(FAILED))?
    {
        return Err(NOT_FOUND);
    }

    info!(
        collection_id = %collection_id,
        from = current.visibility.as_str(),
        to = visibility.as_str(),
        shared = emails.len(),
        "visibility changed"
    );
    db.get_collection(collection_id).map_err(internal(FAILED))
}

pub async fn add_shared_email(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    email: &str,
) -> Result<Collection, ActionError> {
    edit_shared_emails(state, caller, collection_id, email, |list, email| {
        if !list.contains(&email) {
            list.push(email);
        }
    })
    .await
}

pub async fn remove_shared_email(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    email: &str,
) -> Result<Collection, ActionError> {
    edit_shared_emails(state, caller, collection_id, email, |list, email| {
        list.retain(|e| e != &email);
    })
    .await
}

async fn edit_shared_emails(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    email: &str,
    edit: impl FnOnce(&mut Vec<String>, String),
) -> Result<Collection, ActionError> {
    const FAILED: &str = "Failed to update shared emails";

    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::Visibility, &caller.identifier())
        .await?;
    let email = validate::email(email)?;

    let db = state.db.lock().await;
    let mut collection = db
        .find_collection(collection_id)
        .map_err(internal(FAILED))?
        .filter(|c| &c.owner_id == owner)
        .ok_or(NOT_FOUND)?;

    let before = collection.shared_emails.clone();
    edit(&mut collection.shared_emails, email);
    if collection.shared_emails == before {
        return Ok(collection);
    }

    db.set_shared_emails(collection_id, owner, &collection.shared_emails)
        .map_err(internal(FAILED))?;
    db.get_collection(collection_id).map_err(internal(FAILED))
}

pub async fn delete(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
) -> Result<(), ActionError> {
    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;

    let db = state.db.lock().await;
    if !db
        .delete_collection(collection_id, owner)
        .map_err(internal("Failed to delete collection"))?
    {
        return Err(NOT_FOUND);
    }
    info!(collection_id = %collection_id, "collection deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

pub async fn add_link(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    title: &str,
    url: &str,
) -> Result<Link, ActionError> {
    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;
    let url = validate::url(url)?;
    let title = match title.trim() {
        "" => url.clone(),
        t => validate::title(t)?,
    };

    let mut db = state.db.lock().await;
    match db.add_link(collection_id, owner, &title, &url) {
        Ok(link) => Ok(link),
        Err(cur8t_store::StoreError::NotFound) => Err(NOT_FOUND),
        Err(e) => Err(internal("Failed to add link")(e)),
    }
}

pub async fn remove_link(
    state: &AppState,
    caller: &Caller,
    link_id: Uuid,
) -> Result<(), ActionError> {
    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::CollectionWrite, &caller.identifier())
        .await?;

    let mut db = state.db.lock().await;
    if !db
        .remove_link(link_id, owner)
        .map_err(internal("Failed to remove link"))?
    {
        return Err(ActionError::NotFound("Link"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{seed_collection, seed_user, test_state};

    #[tokio::test]
    async fn create_validates_and_defaults_private() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;

        let c = create(&state, &owner, "  Reading  ", "", None).await.unwrap();
        assert_eq!(c.title, "Reading");
        assert_eq!(c.visibility, Visibility::Private);

        assert!(matches!(
            create(&state, &owner, "   ", "", None).await,
            Err(ActionError::Validation(_))
        ));
        assert_eq!(
            create(&state, &Caller::anonymous("x"), "t", "", None).await,
            Err(ActionError::AuthRequired)
        );
    }

    #[tokio::test]
    async fn get_applies_policy_and_hides_share_list() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let alice = seed_user(&state, "alice").await;
        let carol = seed_user(&state, "carol").await;
        let c = seed_collection(&state, &owner, Visibility::Private).await;

        change_visibility(
            &state,
            &owner,
            c,
            Visibility::Protected,
            Some(&["Alice@X.com".to_string()][..]),
        )
        .await
        .unwrap();

        let seen = get(&state, &alice, c).await.unwrap();
        assert!(!seen.is_owner);
        assert!(seen.collection.shared_emails.is_empty());

        let own = get(&state, &owner, c).await.unwrap();
        assert_eq!(own.collection.shared_emails, vec!["alice@x.com"]);

        assert_eq!(
            get(&state, &carol, c).await.unwrap_err(),
            ActionError::Forbidden("protected".into())
        );
        assert_eq!(
            get(&state, &Caller::anonymous("x"), c).await.unwrap_err(),
            ActionError::Forbidden("sign in required".into())
        );
        assert_eq!(
            get(&state, &alice, CollectionId::new()).await.unwrap_err(),
            NOT_FOUND
        );
    }

    #[tokio::test]
    async fn leaving_protected_clears_share_list() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let c = seed_collection(&state, &owner, Visibility::Private).await;

        add_shared_email(&state, &owner, c, "a@x.com").await.unwrap();
        add_shared_email(&state, &owner, c, "A@x.com ").await.unwrap();
        let protected = change_visibility(&state, &owner, c, Visibility::Protected, None)
            .await
            .unwrap();
        assert_eq!(protected.shared_emails, vec!["a@x.com"]);

        let public = change_visibility(&state, &owner, c, Visibility::Public, None)
            .await
            .unwrap();
        assert!(public.shared_emails.is_empty());
    }

    #[tokio::test]
    async fn non_owner_edits_look_like_missing() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let alice = seed_user(&state, "alice").await;
        let c = seed_collection(&state, &owner, Visibility::Public).await;

        assert_eq!(
            change_visibility(&state, &alice, c, Visibility::Private, None)
                .await
                .unwrap_err(),
            NOT_FOUND
        );
        assert_eq!(
            add_shared_email(&state, &alice, c, "a@x.com").await.unwrap_err(),
            NOT_FOUND
        );
        assert_eq!(delete(&state, &alice, c).await.unwrap_err(), NOT_FOUND);
        assert_eq!(
            update_details(&state, &alice, c, "Mine", "").await.unwrap_err(),
            NOT_FOUND
        );
        assert_eq!(
            add_link(&state, &alice, c, "", "https://x.com").await.unwrap_err(),
            NOT_FOUND
        );
    }

    #[tokio::test]
    async fn links_and_rename() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let c = seed_collection(&state, &owner, Visibility::Public).await;

        let link = add_link(&state, &owner, c, "", "https://doc.rust-lang.org")
            .await
            .unwrap();
        assert_eq!(link.title, "https://doc.rust-lang.org");
        assert!(matches!(
            add_link(&state, &owner, c, "x", "ftp://x.com").await,
            Err(ActionError::Validation(_))
        ));

        let renamed = update_details(&state, &owner, c, "Rust docs", "Official").await.unwrap();
        assert_eq!(renamed.title, "Rust docs");
        assert_eq!(renamed.total_links, 1);

        remove_link(&state, &owner, link.id).await.unwrap();
        assert_eq!(
            remove_link(&state, &owner, link.id).await.unwrap_err(),
            ActionError::NotFound("Link")
        );
        assert!(get(&state, &owner, c).await.unwrap().links.is_empty());
    }

    #[tokio::test]
    async fn feed_pages_public_only() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        for _ in 0..3 {
            seed_collection(&state, &owner, Visibility::Public).await;
        }
        seed_collection(&state, &owner, Visibility::Private).await;

        let anon = Caller::anonymous("1.1.1.1");
        let first = public_feed(&state, &anon, None, 1).await.unwrap();
        assert_eq!(first.collections.len(), 2);
        assert!(first.has_more);

        let second = public_feed(&state, &anon, None, 2).await.unwrap();
        assert_eq!(second.collections.len(), 1);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn feed_rejects_pages_past_the_offset_range() {
        let state = test_state();
        let anon = Caller::anonymous("1.1.1.1");

        assert_eq!(
            public_feed(&state, &anon, None, usize::MAX).await.unwrap_err(),
            ActionError::validation("Invalid page")
        );
        assert_eq!(feed_window(1, 2), Some((3, 0)));
        assert_eq!(feed_window(usize::MAX / 2, 2), None);
        assert_eq!(feed_window(1, usize::MAX), None);
    }

    #[tokio::test]
    async fn duplicate_copies_viewable_collections() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let alice = seed_user(&state, "alice").await;
        let c = seed_collection(&state, &owner, Visibility::Public).await;
        add_link(&state, &owner, c, "Book", "https://doc.rust-lang.org/book")
            .await
            .unwrap();
        let source = get(&state, &owner, c).await.unwrap().collection;

        let copy = duplicate(&state, &alice, c, true, None).await.unwrap();
        assert_eq!(copy.title, format!("Copy of {}", source.title));
        assert_eq!(copy.owner_id, *alice.require_user().unwrap());
        assert_eq!(copy.visibility, Visibility::Private);
        assert_eq!(copy.total_links, 1);
        assert_eq!(get(&state, &alice, copy.id).await.unwrap().links.len(), 1);

        let bare = duplicate(&state, &alice, c, false, Some(Visibility::Public))
            .await
            .unwrap();
        assert_eq!(bare.visibility, Visibility::Public);
        assert_eq!(bare.total_links, 0);
    }

    #[tokio::test]
    async fn duplicate_refuses_private_and_unshared_sources() {
        let state = test_state();
        let owner = seed_user(&state, "bob").await;
        let alice = seed_user(&state, "alice").await;
        let private = seed_collection(&state, &owner, Visibility::Private).await;
        let protected = seed_collection(&state, &owner, Visibility::Protected).await;

        let refused = ActionError::Forbidden("Cannot duplicate private collections".into());
        assert_eq!(
            duplicate(&state, &owner, private, true, None).await.unwrap_err(),
            refused
        );
        assert_eq!(
            duplicate(&state, &alice, protected, true, None).await.unwrap_err(),
            ActionError::Forbidden("protected".into())
        );
        assert_eq!(
            duplicate(&state, &alice, CollectionId::new(), true, None)
                .await
                .unwrap_err(),
            ActionError::NotFound("Source collection")
        );
        assert_eq!(
            duplicate(&state, &Caller::anonymous("x"), protected, true, None)
                .await
                .unwrap_err(),
            ActionError::AuthRequired
        );
    }
}
