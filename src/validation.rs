use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ServiceError, ServiceResult};
use crate::models::PageRequest;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z0-9]([a-z0-9-]*[a-z0-9])?$")
        .expect("email pattern compiles")
});

// No whitespace, no `&`, `"`, `<` or `>`.
static PASSWORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[^\s&"<>]+$"#).expect("password pattern compiles"));

pub fn validate_email(email: &str) -> ServiceResult<()> {
    if EMAIL_PATTERN.is_match(email) {
        Ok(())
    } else {
        Err(ServiceError::validation(format!("malformed email `{email}`")))
    }
}

pub fn validate_password(password: &str) -> ServiceResult<()> {
    if PASSWORD_PATTERN.is_match(password) {
        Ok(())
    } else {
        Err(ServiceError::validation(
            "password must be non-empty and contain no whitespace or & \" < >",
        ))
    }
}

pub fn validate_id(id: i64) -> ServiceResult<()> {
    if id >= 1 {
        Ok(())
    } else {
        Err(ServiceError::validation(format!("id must be >= 1, got {id}")))
    }
}

pub fn validate_page(page: &PageRequest) -> ServiceResult<()> {
    if (1..=PageRequest::MAX_SIZE).contains(&page.size) {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "page size must be between 1 and {}",
            PageRequest::MAX_SIZE
        )))
    }
}

pub fn require_non_empty(field: &'static str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        Err(ServiceError::validation(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

/// Cache and lookup key for an email. Emails are unique case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
