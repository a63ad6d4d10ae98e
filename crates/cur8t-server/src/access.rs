//! Access request actions: request, inbox, approve/deny, status.
//!
//! Each action checks auth, then the rate limit gate, then validates input,
//! and only then touches the store. Store failures are logged and replaced
//! with a user-facing message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use cur8t_shared::validate;
use cur8t_shared::{ActionError, CollectionId, RequestId, RequestStatus, Visibility};
use cur8t_store::{AccessRequest, Decision, IncomingAccessRequest, RequestOutcome, ResponseOutcome};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;
use crate::rate_limit::ActionClass;

/// Result of an approve or deny, as shown to the owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    pub message: &'static str,
    pub request: AccessRequest,
    /// True when approval promoted the collection from private to protected.
    pub visibility_changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatusView {
    pub has_request: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

pub async fn request_access(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
    message: &str,
) -> Result<AccessRequest, ActionError> {
    const FAILED: &str = "Failed to send access request";

    let requester = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::AccessRequest, &caller.identifier())
        .await?;
    let message = validate::request_message(message)?;

    let db = state.db.lock().await;
    let collection = db
        .find_collection(collection_id)
        .map_err(internal(FAILED))?
        .ok_or(ActionError::NotFound("Collection"))?;

    if &collection.owner_id == requester {
        return Err(ActionError::SelfAction(
            "You cannot request access to your own collection",
        ));
    }
    if collection.visibility == Visibility::Public {
        return Err(ActionError::invalid_state(
            "This collection is public and doesn't need access requests",
        ));
    }

    match db
        .upsert_access_request(requester, collection_id, &collection.owner_id, &message)
        .map_err(internal(FAILED))?
    {
        RequestOutcome::Pending(request) => {
            info!(
                request_id = %request.id,
                collection_id = %collection_id,
                requester = %requester,
                "access requested"
            );
            Ok(request)
        }
        RequestOutcome::Blocked(existing) => match existing.status {
            RequestStatus::Pending => Err(ActionError::invalid_state(
                "You have already requested access to this collection",
            )),
            RequestStatus::Approved => Err(ActionError::invalid_state(
                "You already have access to this collection",
            )),
            RequestStatus::Denied => {
                tracing::error!(request_id = %existing.id, "denied request was not revived");
                Err(ActionError::Internal(FAILED.into()))
            }
        },
    }
}

/// Requests addressed to the caller, oldest first.
pub async fn list_incoming(
    state: &AppState,
    caller: &Caller,
) -> Result<Vec<IncomingAccessRequest>, ActionError> {
    let owner = caller.require_user()?;
    let db = state.db.lock().await;
    db.list_incoming_requests(owner)
        .map_err(internal("Failed to fetch access requests"))
}

pub async fn approve(
    state: &AppState,
    caller: &Caller,
    request_id: RequestId,
) -> Result<ResponseSummary, ActionError> {
    respond(state, caller, request_id, Decision::Approve).await
}

pub async fn deny(
    state: &AppState,
    caller: &Caller,
    request_id: RequestId,
) -> Result<ResponseSummary, ActionError> {
    respond(state, caller, request_id, Decision::Deny).await
}

async fn respond(
    state: &AppState,
    caller: &Caller,
    request_id: RequestId,
    decision: Decision,
) -> Result<ResponseSummary, ActionError> {
    let failed = match decision {
        Decision::Approve => "Failed to approve access request",
        Decision::Deny => "Failed to deny access request",
    };

    let owner = caller.require_user()?;
    state
        .rate_limiter
        .check(ActionClass::RespondRequest, &caller.identifier())
        .await?;

    let mut db = state.db.lock().await;
    let outcome = db
        .respond_to_request(request_id, owner, decision)
        .map_err(internal(failed))?;

    match outcome {
        ResponseOutcome::Approved { request, grant } => {
            info!(
                request_id = %request.id,
                collection_id = %request.collection_id,
                ?grant,
                "access request approved"
            );
            Ok(ResponseSummary {
                message: grant.message(),
                visibility_changed: grant.visibility_changed(),
                request,
            })
        }
        ResponseOutcome::Denied { request } => {
            info!(request_id = %request.id, "access request denied");
            Ok(ResponseSummary {
                message: "Access request denied",
                visibility_changed: false,
                request,
            })
        }
        ResponseOutcome::NotFound => Err(ActionError::NotFound("Access request")),
        ResponseOutcome::AlreadyResponded(_) => Err(ActionError::invalid_state(
            "This request has already been responded to",
        )),
    }
}

/// Whether the caller has a request on record for `collection_id`.
pub async fn request_status(
    state: &AppState,
    caller: &Caller,
    collection_id: CollectionId,
) -> Result<RequestStatusView, ActionError> {
    let Some(requester) = caller.user_id.as_ref() else {
        return Ok(RequestStatusView {
            has_request: false,
            status: None,
            requested_at: None,
        });
    };

    let db = state.db.lock().await;
    let existing = db
        .find_access_request_for(requester, collection_id)
        .map_err(internal("Failed to check access request status"))?;

    Ok(match existing {
        Some(request) => RequestStatusView {
            has_request: true,
            status: Some(request.status),
            requested_at: Some(request.requested_at),
        },
        None => RequestStatusView {
            has_request: false,
            status: None,
            requested_at: None,
        },
    })
}
