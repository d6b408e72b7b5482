// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detection and repair of malformed SSO deep links.
//!
//! Legacy links append the redirect target as extra path segments
//! (`/sso/login/https%3A%2F%2Fapp.corp.com`) instead of passing it as the
//! `redirect` query parameter. The corrected location is always the canonical
//! path, so following a correction never triggers another one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::form_urlencoded;

use crate::entry::{parse_location, EntryParams, SSO_LOGIN_PATH};
use crate::host::Navigator;
use crate::schedule::ScheduledTransition;

pub const REDIRECT_NOTICE: &str = "Detected a malformed SSO link. Redirecting to the corrected URL...";
pub const MALFORMED_NOTICE: &str = "The SSO login URL is malformed. Redirecting to the login page...";
pub const INVALID_FORMAT_NOTICE: &str = "Invalid URL format";

/// Result of inspecting a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlCheck {
    /// Exactly the canonical entry path.
    Canonical,
    /// Extra segments decode to a URL; move it into `redirect`.
    Redirect { redirect_url: String, corrected: String },
    /// Extra segments are not a URL; drop them.
    Malformed { corrected: String },
    /// Extra segments could not be decoded. No correction is attempted.
    InvalidFormat,
    /// Not an SSO entry location at all.
    Unrelated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

/// Message shown while a correction is pending (or instead of one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: &'static str,
}

impl UrlCheck {
    pub fn notice(&self) -> Option<Notice> {
        match self {
            Self::Redirect { .. } => {
                Some(Notice { level: NoticeLevel::Warning, message: REDIRECT_NOTICE })
            }
            Self::Malformed { .. } => {
                Some(Notice { level: NoticeLevel::Error, message: MALFORMED_NOTICE })
            }
            Self::InvalidFormat => {
                Some(Notice { level: NoticeLevel::Error, message: INVALID_FORMAT_NOTICE })
            }
            Self::Canonical | Self::Unrelated => None,
        }
    }

    /// Location to navigate to, if a correction applies.
    pub fn corrected(&self) -> Option<&str> {
        match self {
            Self::Redirect { corrected, .. } | Self::Malformed { corrected } => Some(corrected),
            _ => None,
        }
    }
}

/// Inspect a location for the legacy `/sso/login/<redirect>` form.
pub fn check_location(location: &str) -> UrlCheck {
    let url = match parse_location(location) {
        Ok(url) => url,
        Err(_) => return UrlCheck::InvalidFormat,
    };

    let path = url.path();
    if path == SSO_LOGIN_PATH {
        return UrlCheck::Canonical;
    }
    let Some(extra) = path.strip_prefix(SSO_LOGIN_PATH).and_then(|rest| rest.strip_prefix('/'))
    else {
        return UrlCheck::Unrelated;
    };
    if extra.is_empty() {
        return UrlCheck::Canonical;
    }

    let decoded = match decode_component(extra) {
        Some(decoded) => decoded,
        None => return UrlCheck::InvalidFormat,
    };

    let params = EntryParams::from_url(&url);
    if decoded.contains("://") {
        let corrected = corrected_location(Some(&decoded), &params);
        UrlCheck::Redirect { redirect_url: decoded, corrected }
    } else {
        UrlCheck::Malformed { corrected: corrected_location(None, &params) }
    }
}

/// Canonical location with an optional `redirect`, preserving `isSSO` and `popup`.
pub fn corrected_location(redirect: Option<&str>, params: &EntryParams) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(redirect) = redirect {
        query.append_pair("redirect", redirect);
    }
    if params.is_sso {
        query.append_pair("isSSO", "true");
    }
    if params.popup {
        query.append_pair("popup", "true");
    }
    let query = query.finish();
    if query.is_empty() {
        SSO_LOGIN_PATH.to_owned()
    } else {
        format!("{SSO_LOGIN_PATH}?{query}")
    }
}

/// Strict percent-decoding: every `%` must start a two-digit hex escape and
/// the result must be valid UTF-8.
fn decode_component(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit)
                && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit);
            if !valid {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}

/// A correction in progress: the check plus its pending navigation.
pub struct Correction {
    pub check: UrlCheck,
    pub pending: Option<ScheduledTransition>,
}

/// Runs [`check_location`] once per distinct path and schedules the redirect.
pub struct UrlNormalizer {
    delay: Duration,
    teardown: CancellationToken,
    last_path: Mutex<Option<String>>,
}

impl UrlNormalizer {
    pub fn new(delay: Duration, teardown: CancellationToken) -> Self {
        Self { delay, teardown, last_path: Mutex::new(None) }
    }

    /// Inspect `location` and schedule a corrective navigation.
    ///
    /// Returns `None` when the path is the same one inspected last time.
    pub fn apply(&self, location: &str, navigator: Arc<dyn Navigator>) -> Option<Correction> {
        let path = parse_location(location).map(|u| u.path().to_owned()).unwrap_or_default();
        {
            let mut last = self.last_path.lock();
            if last.as_deref() == Some(path.as_str()) {
                return None;
            }
            *last = Some(path);
        }

        let check = check_location(location);
        match check.notice() {
            Some(Notice { level: NoticeLevel::Warning, message }) => {
                tracing::warn!(location, "{message}")
            }
            Some(Notice { level: NoticeLevel::Error, message }) => {
                tracing::error!(location, "{message}")
            }
            None => {}
        }

        let pending = check.corrected().map(|corrected| {
            let corrected = corrected.to_owned();
            ScheduledTransition::spawn(&self.teardown, self.delay, async move {
                navigator.navigate(&corrected);
            })
        });

        Some(Correction { check, pending })
    }
}

#[cfg(test)]
#[path = "normalize_tests.rs"]
mod tests;
