//! Billing webhook authentication and payload extraction.
//!
//! The billing provider signs every delivery with HMAC-SHA256 over the raw
//! request body and sends the hex digest in the `x-signature` header. The
//! body is JSON; only the subset needed for subscription bookkeeping is
//! modelled here and everything else is ignored.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::constants::{NO_SUBSCRIPTION_STATUS, SUBSCRIPTION_RESOURCE_TYPE};
use crate::types::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("Invalid payload: {0}")]
    MalformedPayload(String),

    #[error("Missing event id")]
    MissingEventId,
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    digest(secret, body).map(hex::encode).unwrap_or_default()
}

fn digest(secret: &[u8], body: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(body);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Check `signature_hex` against the digest of `body`.
///
/// An empty secret or a missing header never verifies. The comparison runs
/// in constant time over the decoded digests.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: Option<&str>) -> bool {
    let Some(signature_hex) = signature_hex else {
        return false;
    };
    if secret.is_empty() {
        return false;
    }

    let Ok(provided) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Some(expected) = digest(secret.as_bytes(), body) else {
        return false;
    };

    if provided.len() != expected.len() {
        return false;
    }
    provided.ct_eq(expected.as_slice()).into()
}

/// SHA-256 of the raw body, recorded in the idempotency ledger for audit.
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// Top-level envelopes are typed; every leaf the provider may vary is a raw
/// [`Value`] read through [`scalar`] or [`flag`], so an unexpected type in an
/// optional field drops that field instead of the delivery.
#[derive(Debug, Default, Deserialize)]
struct Payload {
    id: Option<Value>,
    meta: Option<Meta>,
    data: Option<Data>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    event_id: Option<Value>,
    id: Option<Value>,
    event_name: Option<Value>,
    event: Option<Value>,
    custom: Option<Value>,
    custom_data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Data {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: Option<Value>,
    attributes: Option<Attributes>,
    relationships: Option<Relationships>,
}

#[derive(Debug, Default, Deserialize)]
struct Attributes {
    status: Option<Value>,
    period_starts_at: Option<Value>,
    renews_at: Option<Value>,
    period_ends_at: Option<Value>,
    ends_at: Option<Value>,
    trial_ends_at: Option<Value>,
    cancelled: Option<Value>,
    cancelled_at: Option<Value>,
    checkout_data: Option<Value>,
    custom: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Relationships {
    variant: Option<RelationshipRef>,
    product: Option<RelationshipRef>,
    customer: Option<RelationshipRef>,
}

#[derive(Debug, Default, Deserialize)]
struct RelationshipRef {
    data: Option<RelationshipData>,
}

#[derive(Debug, Default, Deserialize)]
struct RelationshipData {
    id: Option<Value>,
}

impl RelationshipRef {
    fn id(&self) -> Option<String> {
        self.data.as_ref().and_then(|d| scalar(d.id.as_ref()))
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// A verified, parsed webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_name: String,
    /// Present only when `data.type == "subscriptions"`.
    pub subscription: Option<SubscriptionChange>,
}

/// Subscription state carried by a `subscriptions` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionChange {
    pub subscription_id: Option<String>,
    /// Owning user, if the checkout carried one. Without it the change
    /// cannot be linked and is not applied.
    pub user_id: Option<UserId>,
    pub store_customer_id: Option<String>,
    pub product_id: Option<String>,
    pub variant_id: Option<String>,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// Parse a raw (already authenticated) body.
pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, BillingError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
    if !value.is_object() {
        return Err(BillingError::MalformedPayload("expected a JSON object".into()));
    }
    let payload: Payload = serde_json::from_value(value)
        .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;

    let meta = payload.meta.as_ref();
    let event_id = meta
        .and_then(|m| scalar(m.event_id.as_ref()).or_else(|| scalar(m.id.as_ref())))
        .or_else(|| scalar(payload.id.as_ref()))
        .ok_or(BillingError::MissingEventId)?;

    let event_name = meta
        .and_then(|m| scalar(m.event_name.as_ref()).or_else(|| scalar(m.event.as_ref())))
        .unwrap_or_else(|| "unknown".to_string());

    let subscription = payload
        .data
        .as_ref()
        .filter(|d| scalar(d.kind.as_ref()).as_deref() == Some(SUBSCRIPTION_RESOURCE_TYPE))
        .map(|data| subscription_change(&payload, data));

    Ok(WebhookEvent {
        event_id,
        event_name,
        subscription,
    })
}

fn subscription_change(payload: &Payload, data: &Data) -> SubscriptionChange {
    let empty_attrs = Attributes::default();
    let attrs = data.attributes.as_ref().unwrap_or(&empty_attrs);
    let rel = data.relationships.as_ref();

    let current_period_start = timestamp(attrs.period_starts_at.as_ref())
        .or_else(|| timestamp(attrs.renews_at.as_ref()));
    let current_period_end =
        timestamp(attrs.period_ends_at.as_ref()).or_else(|| timestamp(attrs.ends_at.as_ref()));

    SubscriptionChange {
        subscription_id: scalar(data.id.as_ref()),
        user_id: resolve_user_id(payload).map(UserId),
        store_customer_id: rel.and_then(|r| r.customer.as_ref()).and_then(RelationshipRef::id),
        product_id: rel.and_then(|r| r.product.as_ref()).and_then(RelationshipRef::id),
        variant_id: rel.and_then(|r| r.variant.as_ref()).and_then(RelationshipRef::id),
        status: scalar(attrs.status.as_ref())
            .unwrap_or_else(|| NO_SUBSCRIPTION_STATUS.to_string()),
        current_period_start,
        current_period_end,
        trial_end: timestamp(attrs.trial_ends_at.as_ref()),
        cancel_at_period_end: flag(attrs.cancelled.as_ref())
            || scalar(attrs.cancelled_at.as_ref()).is_some(),
    }
}

/// `meta.custom` and `meta.custom_data` win over the checkout attributes.
fn resolve_user_id(payload: &Payload) -> Option<String> {
    let from_custom = |c: Option<&Value>| scalar(c.and_then(|c| c.get("user_id")));

    let meta = payload.meta.as_ref();
    let attrs = payload.data.as_ref().and_then(|d| d.attributes.as_ref());

    from_custom(meta.and_then(|m| m.custom.as_ref()))
        .or_else(|| from_custom(meta.and_then(|m| m.custom_data.as_ref())))
        .or_else(|| {
            from_custom(
                attrs
                    .and_then(|a| a.checkout_data.as_ref())
                    .and_then(|c| c.get("custom")),
            )
        })
        .or_else(|| from_custom(attrs.and_then(|a| a.custom.as_ref())))
}

/// Ids arrive as strings or numbers depending on the field.
fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Booleans sometimes arrive as `"true"` or `1`.
fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}

/// RFC 3339 only; anything else reads as absent.
fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = scalar(value)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    #[test]
    fn signature_round_trip() {
        let body = br#"{"meta":{"event_id":"evt_1"}}"#;
        let sig = sign(SECRET.as_bytes(), body);
        assert!(verify_signature(SECRET, body, Some(&sig)));
        assert!(verify_signature(SECRET, body, Some(&sig.to_uppercase())));
    }

    #[test]
    fn forged_or_missing_signature_fails() {
        let body = br#"{"meta":{"event_id":"evt_1"}}"#;
        let forged = sign(b"other-secret", body);
        assert!(!verify_signature(SECRET, body, Some(&forged)));
        assert!(!verify_signature(SECRET, body, None));
        assert!(!verify_signature(SECRET, body, Some("not-hex")));
        assert!(!verify_signature(SECRET, body, Some("abcd")));
    }

    #[test]
    fn empty_secret_never_verifies() {
        let body = b"{}";
        let sig = sign(b"", body);
        assert!(!verify_signature("", body, Some(&sig)));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = sign(SECRET.as_bytes(), br#"{"a":1}"#);
        assert!(!verify_signature(SECRET, br#"{"a":2}"#, Some(&sig)));
    }

    #[test]
    fn parses_subscription_event() {
        let body = json!({
            "meta": {
                "event_name": "subscription_created",
                "event_id": "evt_123",
                "custom_data": { "user_id": "u1" }
            },
            "data": {
                "type": "subscriptions",
                "id": "sub_9",
                "attributes": {
                    "status": "active",
                    "renews_at": "2026-11-01T00:00:00Z",
                    "ends_at": null,
                    "trial_ends_at": null,
                    "cancelled": false
                },
                "relationships": {
                    "variant": { "data": { "id": 42 } },
                    "product": { "data": { "id": "7" } },
                    "customer": { "data": { "id": "cus_1" } }
                }
            }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id, "evt_123");
        assert_eq!(event.event_name, "subscription_created");

        let sub = event.subscription.unwrap();
        assert_eq!(sub.subscription_id.as_deref(), Some("sub_9"));
        assert_eq!(sub.user_id, Some(UserId::new("u1")));
        assert_eq!(sub.variant_id.as_deref(), Some("42"));
        assert_eq!(sub.product_id.as_deref(), Some("7"));
        assert_eq!(sub.store_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(sub.status, "active");
        assert!(sub.current_period_start.is_some());
        assert!(sub.current_period_end.is_none());
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn cancelled_at_marks_cancellation() {
        let body = json!({
            "meta": { "id": "evt_2" },
            "data": {
                "type": "subscriptions",
                "id": "sub_1",
                "attributes": { "cancelled_at": "2026-10-01T00:00:00Z" }
            }
        });
        let sub = parse_event(body.to_string().as_bytes())
            .unwrap()
            .subscription
            .unwrap();
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.status, "none");
    }

    #[test]
    fn user_id_falls_back_to_checkout_data() {
        let body = json!({
            "meta": { "event_id": "evt_3" },
            "data": {
                "type": "subscriptions",
                "id": "sub_1",
                "attributes": { "checkout_data": { "custom": { "user_id": "u7" } } }
            }
        });
        let sub = parse_event(body.to_string().as_bytes())
            .unwrap()
            .subscription
            .unwrap();
        assert_eq!(sub.user_id, Some(UserId::new("u7")));
    }

    #[test]
    fn period_fields_win_over_fallbacks() {
        let body = json!({
            "meta": { "event_id": "evt_4" },
            "data": {
                "type": "subscriptions",
                "attributes": {
                    "period_starts_at": "2026-01-01T00:00:00Z",
                    "renews_at": "2026-02-01T00:00:00Z",
                    "period_ends_at": "2026-03-01T00:00:00Z",
                    "ends_at": "2026-04-01T00:00:00Z"
                }
            }
        });
        let sub = parse_event(body.to_string().as_bytes())
            .unwrap()
            .subscription
            .unwrap();
        assert_eq!(
            sub.current_period_start.unwrap().to_rfc3339(),
            "2026-01-01T00:00:00+00:00"
        );
        assert_eq!(
            sub.current_period_end.unwrap().to_rfc3339(),
            "2026-03-01T00:00:00+00:00"
        );
        assert!(sub.subscription_id.is_none());
    }

    #[test]
    fn mistyped_optional_attributes_do_not_reject_the_event() {
        let body = json!({
            "meta": {
                "event_id": 77,
                "event_name": "subscription_updated",
                "custom": "legacy"
            },
            "data": {
                "type": "subscriptions",
                "id": 5,
                "attributes": {
                    "status": 3,
                    "renews_at": 1_700_000_000,
                    "trial_ends_at": { "at": "2026-01-01" },
                    "cancelled": "true",
                    "checkout_data": [],
                    "custom": { "user_id": 12 }
                }
            }
        });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert_eq!(event.event_id, "77");

        let sub = event.subscription.unwrap();
        assert_eq!(sub.subscription_id.as_deref(), Some("5"));
        assert_eq!(sub.status, "3");
        assert!(sub.current_period_start.is_none());
        assert!(sub.trial_end.is_none());
        assert!(sub.cancel_at_period_end);
        assert_eq!(sub.user_id, Some(UserId::new("12")));
    }

    #[test]
    fn cancelled_flag_accepts_loose_booleans() {
        assert!(flag(Some(&json!(true))));
        assert!(flag(Some(&json!(1))));
        assert!(flag(Some(&json!("TRUE"))));
        assert!(!flag(Some(&json!("false"))));
        assert!(!flag(Some(&json!(0))));
        assert!(!flag(Some(&Value::Null)));
        assert!(!flag(None));
    }

    #[test]
    fn non_subscription_event_has_no_change() {
        let body = json!({ "meta": { "event_id": "evt_5", "event_name": "order_created" },
                           "data": { "type": "orders", "id": "1" } });
        let event = parse_event(body.to_string().as_bytes()).unwrap();
        assert!(event.subscription.is_none());
    }

    #[test]
    fn missing_event_id_is_rejected() {
        let body = json!({ "meta": { "event_name": "subscription_created" } });
        assert_eq!(
            parse_event(body.to_string().as_bytes()),
            Err(BillingError::MissingEventId)
        );
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(BillingError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_event(b"[1,2]"),
            Err(BillingError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_event(br#"{"meta":"oops"}"#),
            Err(BillingError::MalformedPayload(_))
        ));
    }
}
