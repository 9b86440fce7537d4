//! Input rules for user-supplied identifiers.

use super::error::DomainError;

const USERNAME_MAX: usize = 24;
const SLUG_MAX: usize = 30;
const STYLE_KEY_MAX: usize = 32;

/// Names that collide with fixed segments under `/api/users/`.
const RESERVED_USERNAMES: &[&str] = &["count", "id"];

/// Lowercase ASCII letters, digits and `_`, starting with a letter. Route
/// segments such as `count` are reserved.
pub fn validate_username(username: &str) -> Result<(), DomainError> {
    let mut chars = username.chars();
    match chars.next() {
        None => return Err(DomainError::invalid("username", "must not be empty")),
        Some(first) if !first.is_ascii_lowercase() => {
            return Err(DomainError::invalid(
                "username",
                "must start with a lowercase letter",
            ));
        }
        Some(_) => {}
    }
    if username.len() > USERNAME_MAX {
        return Err(DomainError::invalid(
            "username",
            format!("must be at most {USERNAME_MAX} characters"),
        ));
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(DomainError::invalid(
            "username",
            "may only contain lowercase letters, digits and underscores",
        ));
    }
    if RESERVED_USERNAMES.contains(&username) {
        return Err(DomainError::invalid("username", "is reserved"));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), DomainError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DomainError::invalid("email", "must look like name@host.tld")),
    }
}

/// Lowercase ASCII letters, digits and `-`, no leading or trailing dash.
pub fn validate_slug(slug: &str) -> Result<(), DomainError> {
    if slug.is_empty() || slug.len() > SLUG_MAX {
        return Err(DomainError::invalid(
            "slug",
            format!("must be 1 to {SLUG_MAX} characters"),
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(DomainError::invalid("slug", "must not start or end with `-`"));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(DomainError::invalid(
            "slug",
            "may only contain lowercase letters, digits and dashes",
        ));
    }
    Ok(())
}

pub fn validate_style_key(key: &str) -> Result<(), DomainError> {
    if key.is_empty() || key.len() > STYLE_KEY_MAX {
        return Err(DomainError::invalid(
            "style",
            format!("keys must be 1 to {STYLE_KEY_MAX} characters"),
        ));
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DomainError::invalid(
            "style",
            "keys may only contain letters, digits and underscores",
        ));
    }
    Ok(())
}
