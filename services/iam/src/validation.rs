//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{IamError, IamResult};
use crate::models::ProfileUpdate;

fn invalid(message: &str) -> IamError {
    IamError::Validation(message.to_string())
}

/// Validate username
pub fn validate_username(username: &str) -> IamResult<()> {
    if username.is_empty() {
        return Err(invalid("Username is required"));
    }

    let length = username.chars().count();
    if length < 3 {
        return Err(invalid("Username must be at least 3 characters long"));
    }

    if length > 64 {
        return Err(invalid("Username must be at most 64 characters long"));
    }

    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USERNAME_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("Failed to compile username regex"));

    if !regex.is_match(username) {
        return Err(invalid(
            "Username can only contain letters, numbers, and underscores",
        ));
    }

    Ok(())
}

/// Validate email; an empty value means "not provided"
pub fn validate_email(email: &str) -> IamResult<()> {
    if email.is_empty() {
        return Ok(());
    }

    if email.len() > 254 {
        return Err(invalid("Email must be at most 254 characters long"));
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err(invalid("Invalid email format"));
    }

    Ok(())
}

/// Validate phone number (11 digits); an empty value means "not provided"
pub fn validate_phone(phone: &str) -> IamResult<()> {
    if phone.is_empty() {
        return Ok(());
    }

    if phone.len() != 11 || !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("Phone number must be exactly 11 digits"));
    }

    Ok(())
}

/// Validate password
pub fn validate_password(password: &str) -> IamResult<()> {
    if password.is_empty() {
        return Err(invalid("Password is required"));
    }

    let length = password.chars().count();
    if length < 6 {
        return Err(invalid("Password must be at least 6 characters long"));
    }

    if length > 128 {
        return Err(invalid("Password must be at most 128 characters long"));
    }

    Ok(())
}

/// Validate the fields a profile update actually touches
pub fn validate_profile_update(update: &ProfileUpdate) -> IamResult<()> {
    if let Some(username) = &update.username {
        validate_username(username)?;
    }
    if let Some(email) = &update.email {
        validate_email(email)?;
    }
    if let Some(phone) = &update.phone {
        validate_phone(phone)?;
    }
    Ok(())
}
