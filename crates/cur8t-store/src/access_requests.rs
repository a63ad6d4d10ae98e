//! The access request ledger.
//!
//! Two properties are enforced by the statements themselves rather than by
//! read-then-write sequences:
//!
//! * at most one row per `(requester_id, collection_id)`: a new request is
//!   an upsert that only revives a `denied` row;
//! * a request is resolved at most once per cycle: the status transition is
//!   an `UPDATE ... WHERE status = 'pending'` and zero affected rows means the
//!   caller lost the race.
//!
//! Approval and the resulting grant on the collection commit together.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use cur8t_shared::grant::{plan_grant, GrantOutcome, GrantPlan};
use cur8t_shared::{CollectionId, RequestId, RequestStatus, UserId, Visibility};

use crate::convert;
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{AccessRequest, IncomingAccessRequest};

const REQUEST_COLUMNS: &str = "id, requester_id, collection_id, owner_id, message, status, \
     requested_at, responded_at";

/// Result of [`Database::upsert_access_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A new pending row, or a denied row revived to pending in place.
    Pending(AccessRequest),
    /// An existing row blocked the request; carries its status
    /// (`Pending` or `Approved`).
    Blocked(AccessRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    fn status(self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Deny => RequestStatus::Denied,
        }
    }
}

/// Result of [`Database::respond_to_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Approved {
        request: AccessRequest,
        grant: GrantOutcome,
    },
    Denied {
        request: AccessRequest,
    },
    /// No request with that id is addressed to this owner.
    NotFound,
    /// The request was already resolved (possibly by a concurrent call).
    AlreadyResponded(RequestStatus),
}

impl Database {
    // ------------------------------------------------------------------
    // Request
    // ------------------------------------------------------------------

    /// Record a pending request from `requester` for `collection_id`.
    ///
    /// `owner` is denormalized onto the row so the owner's inbox does not
    /// need a join to find it.
    pub fn upsert_access_request(
        &self,
        requester: &UserId,
        collection_id: CollectionId,
        owner: &UserId,
        message: &str,
    ) -> Result<RequestOutcome> {
        let changed = self.conn().execute(
            "INSERT INTO access_requests
                 (id, requester_id, collection_id, owner_id, message, status, requested_at, responded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, NULL)
             ON CONFLICT (requester_id, collection_id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 message = excluded.message,
                 status = 'pending',
                 requested_at = excluded.requested_at,
                 responded_at = NULL
             WHERE access_requests.status = 'denied'",
            params![
                RequestId::new().to_string(),
                requester.as_str(),
                collection_id.to_string(),
                owner.as_str(),
                message,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let row = self
            .find_access_request_for(requester, collection_id)?
            .ok_or(crate::StoreError::NotFound)?;

        if changed > 0 {
            Ok(RequestOutcome::Pending(row))
        } else {
            Ok(RequestOutcome::Blocked(row))
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_access_request(&self, id: RequestId) -> Result<AccessRequest> {
        self.conn()
            .query_row(
                &format!("SELECT {REQUEST_COLUMNS} FROM access_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_request,
            )
            .map_err(not_found)
    }

    /// The single request (if any) from `requester` for `collection_id`.
    pub fn find_access_request_for(
        &self,
        requester: &UserId,
        collection_id: CollectionId,
    ) -> Result<Option<AccessRequest>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {REQUEST_COLUMNS} FROM access_requests
                     WHERE requester_id = ?1 AND collection_id = ?2"
                ),
                params![requester.as_str(), collection_id.to_string()],
                row_to_request,
            )
            .optional()?)
    }

    /// Every request addressed to `owner`, oldest first.
    pub fn list_incoming_requests(&self, owner: &UserId) -> Result<Vec<IncomingAccessRequest>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.requester_id, r.collection_id, r.owner_id, r.message, r.status,
                    r.requested_at, r.responded_at,
                    u.name, u.email, c.title
             FROM access_requests r
             LEFT JOIN users u ON u.id = r.requester_id
             LEFT JOIN collections c ON c.id = r.collection_id
             WHERE r.owner_id = ?1
             ORDER BY r.requested_at ASC, r.rowid ASC",
        )?;
        let rows = stmt.query_map(params![owner.as_str()], |row| {
            Ok(IncomingAccessRequest {
                request: row_to_request(row)?,
                requester_name: row.get(8)?,
                requester_email: row.get(9)?,
                collection_title: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------
    // Respond
    // ------------------------------------------------------------------

    /// Resolve a pending request addressed to `owner`.
    ///
    /// On approval the requester's email is added to the collection's shared
    /// list (promoting a private collection to protected) in the same
    /// transaction as the status change.
    pub fn respond_to_request(
        &mut self,
        id: RequestId,
        owner: &UserId,
        decision: Decision,
    ) -> Result<ResponseOutcome> {
        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE access_requests SET status = ?1, responded_at = ?2
             WHERE id = ?3 AND owner_id = ?4 AND status = 'pending'",
            params![
                decision.status().as_str(),
                Utc::now().to_rfc3339(),
                id.to_string(),
                owner.as_str()
            ],
        )?;

        if changed == 0 {
            let current = tx
                .query_row(
                    "SELECT status FROM access_requests WHERE id = ?1 AND owner_id = ?2",
                    params![id.to_string(), owner.as_str()],
                    |row| convert::parsed::<RequestStatus>(row, 0),
                )
                .optional()?;
            return Ok(match current {
                None => ResponseOutcome::NotFound,
                Some(status) => ResponseOutcome::AlreadyResponded(status),
            });
        }

        let request = tx.query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM access_requests WHERE id = ?1"),
            params![id.to_string()],
            row_to_request,
        )?;

        let outcome = match decision {
            Decision::Approve => {
                let grant = apply_grant(&tx, &request)?;
                ResponseOutcome::Approved { request, grant }
            }
            Decision::Deny => ResponseOutcome::Denied { request },
        };

        tx.commit()?;
        Ok(outcome)
    }
}

/// Add the requester's email to the collection's shared list.
fn apply_grant(tx: &Transaction<'_>, request: &AccessRequest) -> Result<GrantOutcome> {
    let collection: Option<(Vec<String>, Visibility)> = tx
        .query_row(
            "SELECT shared_emails, visibility FROM collections WHERE id = ?1",
            params![request.collection_id.to_string()],
            |row| Ok((convert::json_list(row, 0)?, convert::parsed(row, 1)?)),
        )
        .optional()?;
    let email: Option<String> = tx
        .query_row(
            "SELECT email FROM users WHERE id = ?1",
            params![request.requester_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    let (Some((shared_emails, visibility)), Some(email)) = (collection, email) else {
        tracing::warn!(
            request_id = %request.id,
            collection_id = %request.collection_id,
            "approved request has no collection or requester record; nothing granted"
        );
        return Ok(GrantOutcome::Skipped);
    };

    match plan_grant(&shared_emails, visibility, &email) {
        GrantPlan::AlreadyShared => Ok(GrantOutcome::AlreadyShared),
        GrantPlan::Update {
            shared_emails,
            visibility: new_visibility,
        } => {
            tx.execute(
                "UPDATE collections SET shared_emails = ?1, visibility = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![
                    serde_json::to_string(&shared_emails)?,
                    new_visibility.as_str(),
                    Utc::now().to_rfc3339(),
                    request.collection_id.to_string()
                ],
            )?;
            Ok(GrantOutcome::Granted {
                converted: visibility == Visibility::Private
                    && new_visibility == Visibility::Protected,
            })
        }
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessRequest> {
    Ok(AccessRequest {
        id: RequestId(convert::uuid(row, 0)?),
        requester_id: UserId(row.get(1)?),
        collection_id: CollectionId(convert::uuid(row, 2)?),
        owner_id: UserId(row.get(3)?),
        message: row.get(4)?,
        status: convert::parsed(row, 5)?,
        requested_at: convert::timestamp(row, 6)?,
        responded_at: convert::opt_timestamp(row, 7)?,
    })
}
