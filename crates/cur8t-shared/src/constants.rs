/// Request header carrying the authenticated user id (set by the auth gateway)
pub const USER_ID_HEADER: &str = "x-user-id";

/// Request header carrying the billing provider's HMAC-SHA256 hex digest
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum length of an access request message, in characters
pub const MAX_REQUEST_MESSAGE_LEN: usize = 500;

/// Maximum collection title length, in characters
pub const MAX_TITLE_LEN: usize = 100;

/// Maximum collection description length, in characters
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Maximum link URL length, in characters
pub const MAX_URL_LEN: usize = 2048;

/// A user may pin at most this many of their own collections
pub const MAX_PINNED_COLLECTIONS: usize = 3;

/// Billing payload `data.type` that carries subscription lifecycle state
pub const SUBSCRIPTION_RESOURCE_TYPE: &str = "subscriptions";

/// Subscription status reported when a user has no subscription row
pub const NO_SUBSCRIPTION_STATUS: &str = "none";
