//! Subscription rows and the webhook idempotency ledger.
//!
//! [`Database::ingest_webhook_event`] is the only writer of both tables.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use uuid::Uuid;

use cur8t_shared::billing::SubscriptionChange;
use cur8t_shared::UserId;

use crate::convert;
use crate::database::Database;
use crate::error::Result;
use crate::models::{Subscription, WebhookEventRecord, WebhookEventStatus};

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, store_customer_id, subscription_id, product_id, \
     variant_id, status, current_period_start, current_period_end, cancel_at_period_end, \
     trial_end, created_at, updated_at";

/// Result of [`Database::ingest_webhook_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The event id was already in the ledger; nothing was written.
    Duplicate,
    /// Ledger row written and marked processed. `subscription_applied` is
    /// false when the event carried no subscription or no owning user.
    Processed { subscription_applied: bool },
}

impl Database {
    /// Record a verified webhook delivery and apply its subscription change.
    ///
    /// The ledger insert is the dedup gate: a conflicting `event_id` affects
    /// zero rows and the call returns [`IngestOutcome::Duplicate`]. Ledger
    /// row, subscription upsert and the processed mark commit together, so a
    /// failure part way leaves no trace and the provider's redelivery is
    /// processed from scratch.
    pub fn ingest_webhook_event(
        &mut self,
        event_id: &str,
        event_type: &str,
        payload_hash: &str,
        change: Option<&SubscriptionChange>,
    ) -> Result<IngestOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        let inserted = tx.execute(
            "INSERT INTO webhook_events (event_id, type, payload_hash, status, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (event_id) DO NOTHING",
            params![
                event_id,
                event_type,
                payload_hash,
                WebhookEventStatus::Received.as_str(),
                now
            ],
        )?;
        if inserted == 0 {
            return Ok(IngestOutcome::Duplicate);
        }

        let subscription_applied = match change {
            Some(change) => match &change.user_id {
                Some(user_id) => {
                    upsert_subscription(&tx, user_id, change)?;
                    true
                }
                None => {
                    tracing::warn!(
                        event_id,
                        subscription_id = ?change.subscription_id,
                        "subscription event without user id; not linked"
                    );
                    false
                }
            },
            None => false,
        };

        tx.execute(
            "UPDATE webhook_events SET status = ?1, processed_at = ?2
             WHERE event_id = ?3",
            params![
                WebhookEventStatus::Processed.as_str(),
                Utc::now().to_rfc3339(),
                event_id
            ],
        )?;

        tx.commit()?;
        Ok(IngestOutcome::Processed {
            subscription_applied,
        })
    }

    pub fn get_webhook_event(&self, event_id: &str) -> Result<Option<WebhookEventRecord>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT event_id, type, payload_hash, status, received_at, processed_at
                 FROM webhook_events WHERE event_id = ?1",
                params![event_id],
                |row| {
                    Ok(WebhookEventRecord {
                        event_id: row.get(0)?,
                        event_type: row.get(1)?,
                        payload_hash: row.get(2)?,
                        status: convert::parsed(row, 3)?,
                        received_at: convert::timestamp(row, 4)?,
                        processed_at: convert::opt_timestamp(row, 5)?,
                    })
                },
            )
            .optional()?)
    }

    /// The most recently updated subscription row for `user`.
    pub fn latest_subscription_for_user(&self, user: &UserId) -> Result<Option<Subscription>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                     WHERE user_id = ?1
                     ORDER BY updated_at DESC
                     LIMIT 1"
                ),
                params![user.as_str()],
                row_to_subscription,
            )
            .optional()?)
    }

    pub fn find_subscription_by_provider_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = ?1"
                ),
                params![subscription_id],
                row_to_subscription,
            )
            .optional()?)
    }
}

/// Update the row with the same provider subscription id, or insert one.
fn upsert_subscription(
    tx: &Transaction<'_>,
    user_id: &UserId,
    change: &SubscriptionChange,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let subscription_id = change
        .subscription_id
        .as_deref()
        .filter(|id| !id.is_empty());

    if let Some(subscription_id) = subscription_id {
        let updated = tx.execute(
            "UPDATE subscriptions SET
                 user_id = ?1, store_customer_id = ?2, product_id = ?3, variant_id = ?4,
                 status = ?5, current_period_start = ?6, current_period_end = ?7,
                 cancel_at_period_end = ?8, trial_end = ?9, updated_at = ?10
             WHERE subscription_id = ?11",
            params![
                user_id.as_str(),
                change.store_customer_id,
                change.product_id,
                change.variant_id,
                change.status,
                convert::opt_rfc3339(change.current_period_start),
                convert::opt_rfc3339(change.current_period_end),
                change.cancel_at_period_end,
                convert::opt_rfc3339(change.trial_end),
                now,
                subscription_id,
            ],
        )?;
        if updated > 0 {
            tracing::debug!(subscription_id, status = %change.status, "subscription updated");
            return Ok(());
        }
    }

    tx.execute(
        &format!(
            "INSERT INTO subscriptions ({SUBSCRIPTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)"
        ),
        params![
            Uuid::new_v4().to_string(),
            user_id.as_str(),
            change.store_customer_id,
            subscription_id,
            change.product_id,
            change.variant_id,
            change.status,
            convert::opt_rfc3339(change.current_period_start),
            convert::opt_rfc3339(change.current_period_end),
            change.cancel_at_period_end,
            convert::opt_rfc3339(change.trial_end),
            now,
        ],
    )?;
    tracing::debug!(user_id = %user_id, status = %change.status, "subscription created");
    Ok(())
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: convert::uuid(row, 0)?,
        user_id: UserId(row.get(1)?),
        store_customer_id: row.get(2)?,
        subscription_id: row.get(3)?,
        product_id: row.get(4)?,
        variant_id: row.get(5)?,
        status: row.get(6)?,
        current_period_start: convert::opt_timestamp(row, 7)?,
        current_period_end: convert::opt_timestamp(row, 8)?,
        cancel_at_period_end: row.get(9)?,
        trial_end: convert::opt_timestamp(row, 10)?,
        created_at: convert::timestamp(row, 11)?,
        updated_at: convert::timestamp(row, 12)?,
    })
}
