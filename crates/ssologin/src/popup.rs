// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reporting a popup's outcome to the window that opened it.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::model::{messages, LoginOutcome, UserSummary};
use crate::schedule::ScheduledTransition;

/// Message posted from the popup to its opener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PopupMessage {
    #[serde(rename = "SSO_LOGIN_SUCCESS")]
    Success {
        user: UserSummary,
        token: String,
        /// Present (and `true`) only for a locally synthesized token.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        fallback: bool,
    },
    #[serde(rename = "SSO_LOGIN_ERROR")]
    Error { error: String },
}

impl PopupMessage {
    pub fn from_outcome(outcome: &LoginOutcome) -> Self {
        match (outcome.success, &outcome.user_data, &outcome.token) {
            (true, Some(user), Some(token)) => Self::Success {
                user: user.clone(),
                token: token.clone(),
                fallback: outcome.is_fallback(),
            },
            (true, _, _) => Self::Error { error: messages::INVALID_LOGIN_RESPONSE.to_owned() },
            (false, _, _) => Self::Error {
                error: outcome.error.clone().unwrap_or_else(|| messages::LOGIN_FAILED.to_owned()),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Origin every popup message is addressed to: the redirect URL's origin
/// when it parses to a tuple origin, else the host's own origin.
pub fn target_origin(redirect: Option<&str>, current_origin: &Url) -> String {
    redirect
        .and_then(|r| Url::parse(r).ok())
        .map(|u| u.origin())
        .filter(url::Origin::is_tuple)
        .unwrap_or_else(|| current_origin.origin())
        .ascii_serialization()
}

/// The window that opened the popup.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn post_message(&self, message: &PopupMessage, target_origin: &str) -> anyhow::Result<()>;
}

/// A message together with the origin it was addressed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub target_origin: String,
    pub message: PopupMessage,
}

/// In-process opener backed by an mpsc channel.
pub struct ChannelOpener {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelOpener {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Opener for ChannelOpener {
    async fn post_message(&self, message: &PopupMessage, target_origin: &str) -> anyhow::Result<()> {
        let envelope =
            Envelope { target_origin: target_origin.to_owned(), message: message.clone() };
        self.tx.send(envelope).await.map_err(|_| anyhow::anyhow!("opener is gone"))
    }
}

/// Opener that writes one JSON envelope per line to stdout, for a parent
/// process that spawned this one as its popup.
#[derive(Debug, Default)]
pub struct JsonLinesOpener;

#[async_trait]
impl Opener for JsonLinesOpener {
    async fn post_message(&self, message: &PopupMessage, target_origin: &str) -> anyhow::Result<()> {
        let envelope =
            Envelope { target_origin: target_origin.to_owned(), message: message.clone() };
        let line = serde_json::to_string(&envelope)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }
}

/// Result of handing an outcome to the opener.
pub struct Delivery {
    pub message: PopupMessage,
    pub target_origin: String,
    /// Self-close, scheduled after a successful delivery.
    pub close: Option<ScheduledTransition>,
}

/// Posts exactly one message per attempt when running as a popup.
pub struct PopupMessenger {
    opener: Option<Arc<dyn Opener>>,
    is_popup: bool,
    current_origin: Url,
    close_delay: Duration,
    teardown: CancellationToken,
}

impl PopupMessenger {
    pub fn new(
        opener: Option<Arc<dyn Opener>>,
        is_popup: bool,
        current_origin: Url,
        close_delay: Duration,
        teardown: CancellationToken,
    ) -> Self {
        Self { opener, is_popup, current_origin, close_delay, teardown }
    }

    /// Whether outcomes go to the opener rather than the session activator.
    pub fn is_active(&self) -> bool {
        self.is_popup && self.opener.is_some()
    }

    /// Post the outcome to the opener. Returns `None` when inert.
    pub async fn deliver(
        &self,
        outcome: &LoginOutcome,
        redirect: Option<&str>,
        on_close: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<Option<Delivery>> {
        let Some(opener) = self.opener.as_ref().filter(|_| self.is_popup) else {
            return Ok(None);
        };

        let message = PopupMessage::from_outcome(outcome);
        let target = target_origin(redirect, &self.current_origin);
        opener.post_message(&message, &target).await?;
        tracing::info!(target_origin = %target, success = message.is_success(), "posted popup message");

        let close = message
            .is_success()
            .then(|| ScheduledTransition::spawn(&self.teardown, self.close_delay, on_close));
        Ok(Some(Delivery { message, target_origin: target, close }))
    }
}

/// The host's own origin: the location itself when absolute, else `fallback`.
pub fn location_origin(location: &str, fallback: &Url) -> Url {
    Url::parse(location)
        .ok()
        .filter(|url| url.origin().is_tuple())
        .unwrap_or_else(|| fallback.clone())
}

#[cfg(test)]
#[path = "popup_tests.rs"]
mod tests;
