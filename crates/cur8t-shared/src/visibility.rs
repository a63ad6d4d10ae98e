//! Visibility policy: who may view a collection.
//!
//! [`can_view`] is a pure function of the collection's current state and the
//! viewer. Callers re-read the collection on every request and call it again;
//! decisions are never cached.

use std::fmt;

use serde::Serialize;

use crate::types::{UserId, Visibility};
use crate::validate::normalize_email;

/// The parts of a collection the policy looks at.
#[derive(Debug, Clone, Copy)]
pub struct AccessSubject<'a> {
    pub owner_id: &'a UserId,
    pub visibility: Visibility,
    pub shared_emails: &'a [String],
}

/// The identity asking to view. `email` is the verified address from the
/// viewer's user record, not anything the client supplied.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user_id: Option<UserId>,
    pub email: Option<String>,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: UserId, email: Option<String>) -> Self {
        Self {
            user_id: Some(user_id),
            email,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Private,
    Protected,
    SignInRequired,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Private => "private",
            DenyReason::Protected => "protected",
            DenyReason::SignInRequired => "sign in required",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decide whether `viewer` may see the collection described by `subject`.
///
/// Rules, first match wins:
/// 1. the owner always sees their collection;
/// 2. public collections are visible to everyone, signed in or not;
/// 3. private collections are visible to nobody else;
/// 4. protected collections are visible to signed-in viewers whose email is
///    on the shared list.
pub fn can_view(subject: &AccessSubject<'_>, viewer: &Viewer) -> AccessDecision {
    if viewer.user_id.as_ref() == Some(subject.owner_id) {
        return AccessDecision::Allow;
    }

    match subject.visibility {
        Visibility::Public => AccessDecision::Allow,
        Visibility::Private => AccessDecision::Deny(DenyReason::Private),
        Visibility::Protected => {
            if !viewer.is_authenticated() {
                return AccessDecision::Deny(DenyReason::SignInRequired);
            }
            let listed = viewer
                .email
                .as_deref()
                .map(normalize_email)
                .map(|email| {
                    subject
                        .shared_emails
                        .iter()
                        .any(|shared| normalize_email(shared) == email)
                })
                .unwrap_or(false);
            if listed {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::Protected)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> UserId {
        UserId::new("user_owner")
    }

    fn subject<'a>(
        owner: &'a UserId,
        visibility: Visibility,
        shared: &'a [String],
    ) -> AccessSubject<'a> {
        AccessSubject {
            owner_id: owner,
            visibility,
            shared_emails: shared,
        }
    }

    fn signed_in(id: &str, email: &str) -> Viewer {
        Viewer::authenticated(UserId::new(id), Some(email.to_string()))
    }

    #[test]
    fn public_is_visible_to_everyone() {
        let owner = owner();
        let s = subject(&owner, Visibility::Public, &[]);
        assert_eq!(can_view(&s, &Viewer::anonymous()), AccessDecision::Allow);
        assert_eq!(can_view(&s, &signed_in("u2", "b@x.com")), AccessDecision::Allow);
    }

    #[test]
    fn private_is_visible_only_to_owner() {
        let owner = owner();
        let shared = vec!["b@x.com".to_string()];
        let s = subject(&owner, Visibility::Private, &shared);

        assert_eq!(can_view(&s, &signed_in("user_owner", "o@x.com")), AccessDecision::Allow);
        assert_eq!(
            can_view(&s, &signed_in("u2", "b@x.com")),
            AccessDecision::Deny(DenyReason::Private)
        );
        assert_eq!(
            can_view(&s, &Viewer::anonymous()),
            AccessDecision::Deny(DenyReason::Private)
        );
    }

    #[test]
    fn protected_checks_shared_list() {
        let owner = owner();
        let shared = vec!["a@x.com".to_string()];
        let s = subject(&owner, Visibility::Protected, &shared);

        assert_eq!(can_view(&s, &signed_in("u1", "a@x.com")), AccessDecision::Allow);
        assert_eq!(
            can_view(&s, &signed_in("u2", "c@x.com")),
            AccessDecision::Deny(DenyReason::Protected)
        );
        assert_eq!(
            can_view(&s, &Viewer::anonymous()),
            AccessDecision::Deny(DenyReason::SignInRequired)
        );
    }

    #[test]
    fn protected_match_ignores_case() {
        let owner = owner();
        let shared = vec!["A@X.com".to_string()];
        let s = subject(&owner, Visibility::Protected, &shared);
        assert!(can_view(&s, &signed_in("u1", "a@x.COM")).is_allowed());
    }

    #[test]
    fn signed_in_viewer_without_email_is_denied_protected() {
        let owner = owner();
        let shared = vec!["a@x.com".to_string()];
        let s = subject(&owner, Visibility::Protected, &shared);
        let viewer = Viewer::authenticated(UserId::new("u1"), None);
        assert_eq!(can_view(&s, &viewer), AccessDecision::Deny(DenyReason::Protected));
    }

    #[test]
    fn owner_sees_protected_without_being_listed() {
        let owner = owner();
        let s = subject(&owner, Visibility::Protected, &[]);
        assert!(can_view(&s, &Viewer::authenticated(owner.clone(), None)).is_allowed());
    }
}
