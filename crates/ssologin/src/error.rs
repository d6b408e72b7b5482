// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::non_empty;

/// Failure classes of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Empty key, empty email, or malformed email. No network call was made.
    InvalidInput,
    /// The server denied the key/email pair.
    Rejected,
    /// The service could not be reached or answered with an error.
    Transport,
    /// The login call succeeded but returned no user object.
    Protocol,
    /// A step was invoked before its predecessor succeeded.
    Precondition,
    /// The attempt was reset while a response was outstanding.
    Superseded,
    /// Another step of the same attempt is still in flight.
    Busy,
    /// The entry URL could not be decoded.
    InvalidUrl,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::Rejected => "REJECTED",
            Self::Transport => "TRANSPORT",
            Self::Protocol => "PROTOCOL",
            Self::Precondition => "PRECONDITION",
            Self::Superseded => "SUPERSEDED",
            Self::Busy => "BUSY",
            Self::InvalidUrl => "INVALID_URL",
        }
    }

    /// Whether the user can fix this by editing the key or email.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::InvalidInput | Self::Rejected)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body the SSO backend returns alongside a failure status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Failure talking to one of the SSO backend capabilities.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned {status}")]
    Status { status: u16, payload: ErrorPayload },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Server-supplied `error` (preferred) or `message`, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Status { payload, .. } => non_empty(payload.error.as_deref())
                .or_else(|| non_empty(payload.message.as_deref())),
            Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
