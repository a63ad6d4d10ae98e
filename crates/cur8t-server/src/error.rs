use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use cur8t_shared::ActionError;
use cur8t_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Action(err) => (action_status(err), err.to_string()),
            ServerError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Record not found".to_string())
            }
            ServerError::Store(StoreError::Duplicate) => {
                (StatusCode::CONFLICT, "Duplicate record".to_string())
            }
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let retry_after = match &self {
            ServerError::Action(err) => err.retry_after(),
            _ => None,
        };

        let body = match retry_after {
            Some(minutes) => serde_json::json!({ "error": message, "retryAfter": minutes }),
            None => serde_json::json!({ "error": message }),
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(minutes) = retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(minutes.saturating_mul(60)),
            );
        }
        response
    }
}

fn action_status(err: &ActionError) -> StatusCode {
    match err {
        ActionError::AuthRequired => StatusCode::UNAUTHORIZED,
        ActionError::NotFound(_) => StatusCode::NOT_FOUND,
        ActionError::SelfAction(_) | ActionError::Forbidden(_) => StatusCode::FORBIDDEN,
        ActionError::InvalidState(_) => StatusCode::CONFLICT,
        ActionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ActionError::Validation(_) => StatusCode::BAD_REQUEST,
        ActionError::SignatureInvalid => StatusCode::UNAUTHORIZED,
        ActionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Log a store failure and replace it with a user-facing message.
///
/// Actions never leak store errors; the caller sees e.g.
/// "Failed to approve access request".
pub fn internal(context: &'static str) -> impl FnOnce(StoreError) -> ActionError {
    move |e| {
        tracing::error!(error = %e, context, "store failure");
        ActionError::Internal(context.to_string())
    }
}
