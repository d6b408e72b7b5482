// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local precondition checks run before the validation capability is called.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::SsoCredentials;

/// Minimum accepted SSO key length, in characters.
pub const MIN_KEY_LEN: usize = 8;

/// Only `.com` domains are accepted.
const EMAIL_PATTERN: &str = r"^[A-Za-z0-9_.%+-]+@[A-Za-z0-9_.-]+\.com$";

static EMAIL_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(EMAIL_PATTERN));

/// Why submitted credentials were refused before any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    MissingKey,
    ShortKey,
    MissingEmail,
    MalformedEmail,
}

impl InputError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingKey => "Please enter your SSO key",
            Self::ShortKey => "SSO key must be at least 8 characters",
            Self::MissingEmail => "Please enter your email address",
            Self::MalformedEmail => "Please enter a valid .com email address",
        }
    }
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for InputError {}

pub fn is_valid_email(email: &str) -> bool {
    match &*EMAIL_RE {
        Ok(re) => re.is_match(email),
        Err(_) => false,
    }
}

/// Check key presence, key length, email presence, then email format.
///
/// Surrounding whitespace is trimmed from both fields.
pub fn check_credentials(sso_key: &str, email: &str) -> Result<SsoCredentials, InputError> {
    let sso_key = sso_key.trim();
    let email = email.trim();

    if sso_key.is_empty() {
        return Err(InputError::MissingKey);
    }
    if sso_key.chars().count() < MIN_KEY_LEN {
        return Err(InputError::ShortKey);
    }
    if email.is_empty() {
        return Err(InputError::MissingEmail);
    }
    if !is_valid_email(email) {
        return Err(InputError::MalformedEmail);
    }

    Ok(SsoCredentials { sso_key: sso_key.to_owned(), email: email.to_owned() })
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
