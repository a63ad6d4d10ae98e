//! What approving an access request does to the target collection.
//!
//! The store applies the resulting [`GrantPlan`] inside the same transaction
//! as the status transition.

use serde::Serialize;

use crate::types::Visibility;
use crate::validate::normalize_email;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantPlan {
    /// The requester's email is already shared; nothing to write.
    AlreadyShared,
    /// Persist both fields in one update.
    Update {
        shared_emails: Vec<String>,
        visibility: Visibility,
    },
}

/// Plan the grant of `email` on a collection currently in the given state.
///
/// Private collections are promoted to protected so that the new entry on
/// the shared list actually grants access. Public and protected collections
/// keep their visibility.
pub fn plan_grant(
    current_emails: &[String],
    current_visibility: Visibility,
    email: &str,
) -> GrantPlan {
    let email = normalize_email(email);
    if current_emails.iter().any(|e| normalize_email(e) == email) {
        return GrantPlan::AlreadyShared;
    }

    let mut shared_emails = current_emails.to_vec();
    shared_emails.push(email);

    let visibility = match current_visibility {
        Visibility::Private => Visibility::Protected,
        other => other,
    };

    GrantPlan::Update {
        shared_emails,
        visibility,
    }
}

/// Result reported back to the approving owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    /// Email added; `converted` is true when the collection went from
    /// private to protected.
    Granted { converted: bool },
    AlreadyShared,
    /// The requester's user record or the collection disappeared; the
    /// approval stands but nothing was shared.
    Skipped,
}

impl GrantOutcome {
    pub fn visibility_changed(&self) -> bool {
        matches!(self, GrantOutcome::Granted { converted: true })
    }

    pub fn message(&self) -> &'static str {
        if self.visibility_changed() {
            "Access request approved successfully. Collection converted from private to protected."
        } else {
            "Access request approved successfully"
        }
    }
}
