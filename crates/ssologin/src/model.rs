// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared data model for SSO login attempts.
//!
//! Wire-facing types use camelCase field names to match the SSO backend and
//! the opener window. [`LoginState`] is replaced wholesale on every
//! transition; nothing in this module offers a partial update.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ErrorCode;

/// An SSO key bound to an email address, as submitted for validation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoCredentials {
    pub sso_key: String,
    pub email: String,
}

impl fmt::Debug for SsoCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoCredentials")
            .field("sso_key", &"<redacted>")
            .field("email", &self.email)
            .finish()
    }
}

/// Which stored key matched during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchedKeyType {
    #[serde(rename = "key")]
    Key,
    #[serde(rename = "ssoKey")]
    SsoKey,
    /// A key type this client does not know about.
    #[serde(other)]
    Other,
}

/// Read-only projection of the server-side SSO grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub user_id: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// The user object returned by the backend.
///
/// Only `id` and `email` are interpreted; every other field is kept verbatim
/// so the success URL and the popup message carry the full object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    #[serde(alias = "_id", alias = "userId", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of one validation call, as reported by the server.
///
/// Only `success` and `valid` decide acceptance. Every other field is for
/// display or correlation and reads as absent when malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub success: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub valid: bool,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub matched_key_type: Option<MatchedKeyType>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub sso: Option<SsoRecord>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub user: Option<UserSummary>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Normalized reading of a [`ValidationResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected { reason: String },
}

impl ValidationResult {
    /// Interpret the server's answer. `success` and `valid` are synonyms.
    pub fn verdict(&self) -> Verdict {
        if self.success || self.valid {
            return Verdict::Accepted;
        }
        let reason = non_empty(self.error.as_deref())
            .or_else(|| non_empty(self.message.as_deref()))
            .unwrap_or(messages::KEY_REJECTED)
            .to_owned();
        Verdict::Rejected { reason }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict(), Verdict::Accepted)
    }
}

/// Steps of the login state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginStep {
    Idle,
    Validating,
    Verified,
    LoggingIn,
    CreatingToken,
    Success,
    Error,
}

impl LoginStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Verified => "verified",
            Self::LoggingIn => "logging-in",
            Self::CreatingToken => "creating-token",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// A network call is outstanding for this step.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Validating | Self::LoggingIn | Self::CreatingToken)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl fmt::Display for LoginStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// UI-facing snapshot of the login state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub step: LoginStep,
    pub message: String,
    pub progress: u8,
}

impl LoginState {
    fn new(step: LoginStep, message: impl Into<String>, progress: u8) -> Self {
        Self { step, message: message.into(), progress }
    }

    pub fn idle() -> Self {
        Self::new(LoginStep::Idle, messages::INITIAL_PROMPT, 0)
    }

    pub fn validating() -> Self {
        Self::new(LoginStep::Validating, messages::VALIDATING, 25)
    }

    pub fn verified() -> Self {
        Self::new(LoginStep::Verified, messages::VERIFIED, 50)
    }

    pub fn logging_in() -> Self {
        Self::new(LoginStep::LoggingIn, messages::LOGGING_IN, 75)
    }

    pub fn creating_token() -> Self {
        Self::new(LoginStep::CreatingToken, messages::CREATING_TOKEN, 90)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LoginStep::Success, message, 100)
    }

    /// Error states always reset progress to zero.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LoginStep::Error, message, 0)
    }
}

impl Default for LoginState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Where the session token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    /// Issued by the token service.
    Issued,
    /// Synthesized locally after the token service failed. Unsigned.
    Fallback,
}

/// How the login page was reached; selects the location label sent to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginMode {
    /// `isSSO=true`: a direct SSO link.
    Direct,
    /// Opened as a popup by another window.
    Popup,
    /// A normal tab.
    Web,
}

impl LoginMode {
    pub fn location_label(&self) -> &'static str {
        match self {
            Self::Direct => "SSO Direct Login",
            Self::Popup => "SSO Popup Login",
            Self::Web => "SSO Web Login",
        }
    }
}

/// Terminal value of one login attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_success_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_source: Option<TokenSource>,
}

impl LoginOutcome {
    pub fn failure(code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            user_data: None,
            login_success_url: None,
            error: Some(error.into()),
            code: Some(code),
            sso_id: None,
            token_source: None,
        }
    }

    /// Whether the token is a locally synthesized fallback.
    pub fn is_fallback(&self) -> bool {
        self.token_source == Some(TokenSource::Fallback)
    }
}

/// User-visible messages attached to [`LoginState`] transitions.
pub mod messages {
    pub const INITIAL_PROMPT: &str = "Enter your SSO key and email to sign in";
    pub const VALIDATING: &str = "Validating SSO key...";
    pub const VERIFIED: &str = "SSO key verified. Signing you in...";
    pub const LOGGING_IN: &str = "Signing in...";
    pub const CREATING_TOKEN: &str = "Creating session token...";
    pub const SUCCESS: &str = "Login successful! Redirecting...";
    pub const SUCCESS_FALLBACK: &str = "Login successful using a fallback token. Redirecting...";
    pub const KEY_REJECTED: &str = "Invalid SSO key or email";
    pub const VALIDATE_FAILED: &str = "Failed to validate SSO key";
    pub const LOGIN_FAILED: &str = "SSO login failed";
    pub const INVALID_LOGIN_RESPONSE: &str = "Invalid login response";
    pub const TOKEN_FAILED: &str = "Failed to create session token";
    pub const NOT_VERIFIED: &str = "SSO key must be verified before signing in";
    pub const BUSY: &str = "A login attempt is already in progress";
    pub const SUPERSEDED: &str = "Login attempt was superseded";
    pub const CANCELLED: &str = "Login attempt was cancelled";
}

pub(crate) fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Accept identifiers serialized either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {other}"))),
    }
}

/// Anything but `true` reads as `false`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(serde_json::Value::deserialize(deserializer)?, serde_json::Value::Bool(true)))
}

/// Decode an optional field, reading a malformed value as absent.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::debug!(err = %e, "ignoring malformed response field");
            Ok(None)
        }
    }
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => {
            Err(serde::de::Error::custom(format!("expected string or number id, got {other}")))
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
