// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process host for the login page: entry URL in, report out.
//!
//! [`LoginHost::open`] plays the role of a page load. It runs the URL check,
//! reads the entry parameters, drives an attempt when credentials are
//! available, and hands the outcome to either the opener (popup mode) or the
//! session activator.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::entry::EntryParams;
use crate::error::ErrorCode;
use crate::model::{LoginMode, LoginOutcome, LoginState, SsoCredentials};
use crate::normalize::{
    check_location, Correction, UrlCheck, UrlNormalizer, INVALID_FORMAT_NOTICE,
};
use crate::orchestrator::{AttemptRequest, SsoLoginOrchestrator};
use crate::popup::{location_origin, Opener, PopupMessage, PopupMessenger};
use crate::session::SessionActivator;

/// Moves the host to another location.
pub trait Navigator: Send + Sync {
    fn navigate(&self, location: &str);
}

/// Navigator that queues locations for the host loop to re-dispatch.
pub struct ChannelNavigator {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNavigator {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Navigator for ChannelNavigator {
    fn navigate(&self, location: &str) {
        if self.tx.send(location.to_owned()).is_err() {
            tracing::debug!(location, "navigation dropped, host loop is gone");
        }
    }
}

/// Delays and origin used by the host.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub public_origin: Url,
    pub redirect_delay: Duration,
    pub close_delay: Duration,
}

/// What a page load ended with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostReport {
    /// No credentials in the URL and none submitted.
    AwaitingCredentials { mode: LoginMode, state: LoginState },
    /// The location was malformed; a corrected one was (or would have been) navigated to.
    Corrected { notice: String, location: String, navigated: bool },
    /// Nothing to do for this location.
    Stopped { code: ErrorCode, message: String },
    /// Non-popup attempt finished. Successful sessions were activated.
    Completed {
        outcome: LoginOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        navigated_to: Option<String>,
    },
    /// Popup attempt finished and the opener was told.
    PopupDelivered {
        outcome: LoginOutcome,
        message: PopupMessage,
        target_origin: String,
        closed: bool,
    },
}

pub struct LoginHost {
    orchestrator: Arc<SsoLoginOrchestrator>,
    normalizer: UrlNormalizer,
    sessions: Arc<dyn SessionActivator>,
    navigator: Arc<dyn Navigator>,
    opener: Option<Arc<dyn Opener>>,
    settings: HostSettings,
    teardown: CancellationToken,
}

impl LoginHost {
    pub fn new(
        orchestrator: Arc<SsoLoginOrchestrator>,
        sessions: Arc<dyn SessionActivator>,
        navigator: Arc<dyn Navigator>,
        opener: Option<Arc<dyn Opener>>,
        settings: HostSettings,
        teardown: CancellationToken,
    ) -> Self {
        let normalizer = UrlNormalizer::new(settings.redirect_delay, teardown.clone());
        Self { orchestrator, normalizer, sessions, navigator, opener, settings, teardown }
    }

    pub fn orchestrator(&self) -> &Arc<SsoLoginOrchestrator> {
        &self.orchestrator
    }

    /// Load `location`. `submitted` are credentials entered by the user; they
    /// take precedence over URL-prefilled ones and skip the auto-continue pause.
    pub async fn open(
        &self,
        location: &str,
        submitted: Option<SsoCredentials>,
    ) -> anyhow::Result<HostReport> {
        let check = match self.normalizer.apply(location, Arc::clone(&self.navigator)) {
            Some(Correction { check, pending: Some(pending) }) => {
                let notice = check.notice().map(|n| n.message.to_owned()).unwrap_or_default();
                let corrected = check.corrected().unwrap_or_default().to_owned();
                let navigated = pending.wait().await;
                return Ok(HostReport::Corrected { notice, location: corrected, navigated });
            }
            Some(Correction { check, pending: None }) => check,
            None => check_location(location),
        };

        match check {
            UrlCheck::Canonical => {}
            UrlCheck::InvalidFormat => {
                return Ok(HostReport::Stopped {
                    code: ErrorCode::InvalidUrl,
                    message: INVALID_FORMAT_NOTICE.to_owned(),
                });
            }
            UrlCheck::Unrelated => {
                return Ok(HostReport::Stopped {
                    code: ErrorCode::InvalidUrl,
                    message: format!("{location} is not an SSO login location"),
                });
            }
            UrlCheck::Redirect { .. } | UrlCheck::Malformed { .. } => {
                // Already corrected on an earlier load of this path.
                return Ok(HostReport::Stopped {
                    code: ErrorCode::InvalidUrl,
                    message: "correction already scheduled for this location".to_owned(),
                });
            }
        }

        let params = EntryParams::parse(location)?;
        let mode = params.mode();
        let (credentials, prefilled) = match (submitted, params.prefilled()) {
            (Some(credentials), _) => (credentials, false),
            (None, Some(credentials)) => (credentials, true),
            (None, None) => {
                self.orchestrator.reset_state();
                return Ok(HostReport::AwaitingCredentials {
                    mode,
                    state: self.orchestrator.state(),
                });
            }
        };

        tracing::info!(email = %credentials.email, ?mode, prefilled, "starting sso login");
        let outcome = self
            .orchestrator
            .run(AttemptRequest {
                sso_key: credentials.sso_key,
                email: credentials.email,
                redirect: params.redirect.clone(),
                mode,
                prefilled,
            })
            .await;

        let messenger = PopupMessenger::new(
            self.opener.clone(),
            params.popup,
            location_origin(location, &self.settings.public_origin),
            self.settings.close_delay,
            self.teardown.clone(),
        );
        if messenger.is_active() {
            let on_close = async { tracing::info!("closing popup") };
            if let Some(delivery) =
                messenger.deliver(&outcome, params.redirect.as_deref(), on_close).await?
            {
                let closed = match delivery.close {
                    Some(close) => close.wait().await,
                    None => false,
                };
                return Ok(HostReport::PopupDelivered {
                    outcome,
                    message: delivery.message,
                    target_origin: delivery.target_origin,
                    closed,
                });
            }
        }

        let navigated_to = if outcome.success {
            let next = self.sessions.activate(&outcome).await?;
            if let Some(next) = &next {
                self.navigator.navigate(next);
            }
            next
        } else {
            None
        };
        Ok(HostReport::Completed { outcome, navigated_to })
    }

    /// Forget the active session.
    pub async fn logout(&self) -> anyhow::Result<()> {
        self.orchestrator.reset_state();
        self.sessions.clear().await
    }

    /// Cancel every pending delay.
    pub fn shutdown(&self) {
        self.orchestrator.shutdown();
        self.teardown.cancel();
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
