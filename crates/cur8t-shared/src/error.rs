use thiserror::Error;

/// Failure of a user-facing action.
///
/// The `Display` text is what the caller shows to the user, so every
/// message is phrased for humans.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Authentication required")]
    AuthRequired,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    SelfAction(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        /// Minutes until the window admits another attempt (rounded up).
        retry_after_minutes: u64,
    },

    #[error("{0}")]
    Validation(String),

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ActionError::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ActionError::Validation(msg.into())
    }

    /// Retry hint for rate-limit rejections.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ActionError::RateLimited {
                retry_after_minutes,
                ..
            } => Some(*retry_after_minutes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(ActionError::NotFound("Collection").to_string(), "Collection not found");
        assert_eq!(
            ActionError::invalid_state("This request has already been responded to").to_string(),
            "This request has already been responded to"
        );
    }

    #[test]
    fn only_rate_limited_carries_retry_hint() {
        let err = ActionError::RateLimited {
            message: "Too many access requests".into(),
            retry_after_minutes: 4,
        };
        assert_eq!(err.retry_after(), Some(4));
        assert_eq!(ActionError::AuthRequired.retry_after(), None);
    }
}
