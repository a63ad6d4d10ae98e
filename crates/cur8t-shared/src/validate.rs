//! Input validation for owner and requester actions.
//!
//! Each validator returns the cleaned value so callers persist exactly what
//! was checked.

use crate::constants::{
    MAX_DESCRIPTION_LEN, MAX_REQUEST_MESSAGE_LEN, MAX_TITLE_LEN, MAX_URL_LEN,
};
use crate::error::ActionError;

/// Trim and lower-case an email address. Emails are compared in this form
/// everywhere (shared lists, user records).
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Normalize and check the `local@domain.tld` shape.
pub fn email(raw: &str) -> Result<String, ActionError> {
    let email = normalize_email(raw);
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .rsplit_once('.')
                    .map(|(host, tld)| !host.is_empty() && !tld.is_empty())
                    .unwrap_or(false)
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(email)
    } else {
        Err(ActionError::validation(format!("Invalid email address: {}", raw.trim())))
    }
}

/// Normalize a list of emails, dropping duplicates while keeping order.
pub fn email_list(raw: &[String]) -> Result<Vec<String>, ActionError> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        let e = email(item)?;
        if !out.contains(&e) {
            out.push(e);
        }
    }
    Ok(out)
}

pub fn title(raw: &str) -> Result<String, ActionError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ActionError::validation("Title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ActionError::validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

pub fn description(raw: &str) -> Result<String, ActionError> {
    let description = raw.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ActionError::validation(format!(
            "Description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(description.to_string())
}

pub fn request_message(raw: &str) -> Result<String, ActionError> {
    let message = raw.trim();
    if message.chars().count() > MAX_REQUEST_MESSAGE_LEN {
        return Err(ActionError::validation(format!(
            "Message must be at most {MAX_REQUEST_MESSAGE_LEN} characters"
        )));
    }
    Ok(message.to_string())
}

pub fn url(raw: &str) -> Result<String, ActionError> {
    let url = raw.trim();
    let has_scheme = url.starts_with("http://") || url.starts_with("https://");
    let host = url.split_once("://").map(|(_, rest)| rest).unwrap_or("");
    if !has_scheme || host.is_empty() || host.starts_with('/') {
        return Err(ActionError::validation("URL must start with http:// or https://"));
    }
    if url.len() > MAX_URL_LEN || url.chars().any(char::is_whitespace) {
        return Err(ActionError::validation("Invalid URL"));
    }
    Ok(url.to_string())
}
