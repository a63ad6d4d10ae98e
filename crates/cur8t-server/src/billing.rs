//! Billing webhook ingestion and subscription lookup.
//!
//! The webhook pipeline is: verify signature, parse, then hand the event to
//! the store, which dedupes on the provider event id and applies the
//! subscription change in one transaction. Nothing is persisted before the
//! signature and payload checks pass.

use serde::Serialize;
use tracing::{error, info, warn};

use cur8t_shared::billing::{self, BillingError};
use cur8t_shared::constants::NO_SUBSCRIPTION_STATUS;
use cur8t_shared::ActionError;
use cur8t_store::{IngestOutcome, Subscription};

use crate::api::AppState;
use crate::auth::Caller;
use crate::error::internal;

/// Success body. Both first deliveries and replays are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SubscriptionStatus {
    Subscribed(Subscription),
    None { status: &'static str },
}

/// Process one raw webhook delivery.
///
/// Errors map to the provider-facing status codes: `SignatureInvalid` is 401,
/// `Validation` is 400, `Internal` is 500. No rate limit applies here; an
/// unsigned flood must not be able to lock out genuine deliveries.
pub async fn process_webhook(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
) -> Result<WebhookAck, ActionError> {
    if !billing::verify_signature(&state.config.webhook_secret, body, signature) {
        warn!(
            has_signature = signature.is_some(),
            bytes = body.len(),
            "rejected webhook with invalid signature"
        );
        return Err(ActionError::SignatureInvalid);
    }

    let event = billing::parse_event(body).map_err(|e| match e {
        BillingError::MalformedPayload(detail) => {
            warn!(%detail, "rejected malformed webhook payload");
            ActionError::validation("Invalid payload")
        }
        BillingError::MissingEventId => ActionError::validation("Missing event id"),
    })?;

    let hash = billing::payload_hash(body);
    let mut db = state.db.lock().await;
    let outcome = db
        .ingest_webhook_event(
            &event.event_id,
            &event.event_name,
            &hash,
            event.subscription.as_ref(),
        )
        .map_err(|e| {
            error!(error = %e, event_id = %event.event_id, "webhook processing failed");
            ActionError::Internal("Internal server error".into())
        })?;

    match outcome {
        IngestOutcome::Duplicate => {
            info!(event_id = %event.event_id, "duplicate webhook delivery ignored");
            Ok(WebhookAck {
                ok: true,
                duplicate: true,
            })
        }
        IngestOutcome::Processed {
            subscription_applied,
        } => {
            info!(
                event_id = %event.event_id,
                event_name = %event.event_name,
                subscription_applied,
                "webhook processed"
            );
            Ok(WebhookAck {
                ok: true,
                duplicate: false,
            })
        }
    }
}

/// The caller's most recently updated subscription, or status `none`.
pub async fn subscription_status(
    state: &AppState,
    caller: &Caller,
) -> Result<SubscriptionStatus, ActionError> {
    let user = caller.require_user()?;
    let db = state.db.lock().await;
    let latest = db
        .latest_subscription_for_user(user)
        .map_err(internal("Failed to fetch subscription"))?;
    Ok(match latest {
        Some(sub) => SubscriptionStatus::Subscribed(sub),
        None => SubscriptionStatus::None {
            status: NO_SUBSCRIPTION_STATUS,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{test_state, WEBHOOK_SECRET};
    use cur8t_shared::UserId;

    fn subscription_event(event_id: &str, status: &str) -> Vec<u8> {
        serde_json::json!({
            "meta": {
                "event_id": event_id,
                "event_name": "subscription_updated",
                "custom_data": { "user_id": "u1" }
            },
            "data": {
                "id": "sub_1",
                "type": "subscriptions",
                "attributes": { "status": status },
                "relationships": {
                    "variant": { "data": { "id": "7" } }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn signed(body: &[u8]) -> String {
        billing::sign(WEBHOOK_SECRET.as_bytes(), body)
    }

    #[tokio::test]
    async fn forged_signature_writes_nothing() {
        let state = test_state();
        let body = subscription_event("evt_1", "active");
        let forged = billing::sign(b"other-secret", &body);

        assert_eq!(
            process_webhook(&state, Some(&forged), &body).await,
            Err(ActionError::SignatureInvalid)
        );
        assert_eq!(
            process_webhook(&state, None, &body).await,
            Err(ActionError::SignatureInvalid)
        );
        assert!(state
            .db
            .lock()
            .await
            .get_webhook_event("evt_1")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn replay_is_acknowledged_without_reapplying() {
        let state = test_state();

        let body = subscription_event("evt_1", "active");
        let first = process_webhook(&state, Some(&signed(&body)), &body)
            .await
            .unwrap();
        assert!(!first.duplicate);

        let replay = process_webhook(&state, Some(&signed(&body)), &body)
            .await
            .unwrap();
        assert!(replay.duplicate);

        let status = subscription_status(&state, &Caller::user("u1")).await.unwrap();
        let SubscriptionStatus::Subscribed(sub) = status else {
            panic!("expected a subscription");
        };
        assert_eq!(sub.user_id, UserId::new("u1"));
        assert_eq!(sub.status, "active");
        assert_eq!(sub.variant_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn bad_payloads_are_400() {
        let state = test_state();

        let garbage = b"not json".to_vec();
        assert_eq!(
            process_webhook(&state, Some(&signed(&garbage)), &garbage).await,
            Err(ActionError::validation("Invalid payload"))
        );

        let no_id = br#"{"meta":{"event_name":"x"},"data":{"type":"orders"}}"#.to_vec();
        assert_eq!(
            process_webhook(&state, Some(&signed(&no_id)), &no_id).await,
            Err(ActionError::validation("Missing event id"))
        );
    }

    #[tokio::test]
    async fn no_subscription_reports_none() {
        let state = test_state();
        let status = subscription_status(&state, &Caller::user("nobody")).await.unwrap();
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({ "status": "none" })
        );
    }
}
