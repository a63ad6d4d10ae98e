//! Domain model structs persisted in the database.
//!
//! Every struct derives `Serialize` so it can be returned directly as a JSON
//! response body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cur8t_shared::types::ParseEnumError;
use cur8t_shared::visibility::AccessSubject;
use cur8t_shared::{CollectionId, RequestId, RequestStatus, UserId, Visibility};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user mirrored from the authentication provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Verified email, lower-cased. This is what shared lists match against.
    pub email: String,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// A named, owned grouping of links.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: CollectionId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
    /// Only consulted while `visibility` is protected.
    pub shared_emails: Vec<String>,
    /// Denormalized; see [`Database::recount_links`](crate::Database::recount_links).
    pub total_links: i64,
    /// Denormalized; see [`Database::recount_likes`](crate::Database::recount_likes).
    pub likes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// View of this collection for the visibility policy.
    pub fn access_subject(&self) -> AccessSubject<'_> {
        AccessSubject {
            owner_id: &self.owner_id,
            visibility: self.visibility,
            shared_emails: &self.shared_emails,
        }
    }
}

/// Fields needed to create a collection.
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: Uuid,
    pub collection_id: CollectionId,
    pub user_id: UserId,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// A user's bookmarked URL, independent of any collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Favorite {
    pub id: Uuid,
    pub user_id: UserId,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Access request
// ---------------------------------------------------------------------------

/// One requester's bid for access to one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub collection_id: CollectionId,
    pub owner_id: UserId,
    pub message: String,
    pub status: RequestStatus,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// An access request as listed for the owner, joined with requester and
/// collection details.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IncomingAccessRequest {
    #[serde(flatten)]
    pub request: AccessRequest,
    pub requester_name: Option<String>,
    pub requester_email: Option<String>,
    pub collection_title: Option<String>,
}

// ---------------------------------------------------------------------------
// Billing
// ---------------------------------------------------------------------------

/// A user's billing state with the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub store_customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEventStatus {
    Received,
    Processed,
}

impl WebhookEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventStatus::Received => "received",
            WebhookEventStatus::Processed => "processed",
        }
    }
}

impl std::str::FromStr for WebhookEventStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(WebhookEventStatus::Received),
            "processed" => Ok(WebhookEventStatus::Processed),
            other => Err(ParseEnumError(other.to_string())),
        }
    }
}

/// Row of the webhook idempotency ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub payload_hash: String,
    pub status: WebhookEventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}
