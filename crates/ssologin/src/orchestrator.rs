// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login state machine: validate, then SSO login, then token issuance.
//!
//! Every step is guarded by the step before it and by the attempt
//! generation. A response that arrives after [`SsoLoginOrchestrator::reset_state`]
//! (or after a newer `validate`) is dropped without touching state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::backend::{SsoBackend, SsoLoginRequest, TokenMetadata};
use crate::error::ErrorCode;
use crate::model::{
    messages, LoginMode, LoginOutcome, LoginState, LoginStep, SsoCredentials, TokenSource,
    ValidationResult, Verdict,
};
use crate::schedule::ScheduledTransition;
use crate::token::{TokenIssuer, TokenSubject};
use crate::validator::check_credentials;

/// Per-host values sent along with every attempt.
#[derive(Debug, Clone)]
pub struct AttemptSettings {
    /// Origin the success landing URL is built on.
    pub public_origin: Url,
    pub device_ip: String,
    pub user_agent: String,
    /// Pause between `verified` and `logging-in` for URL-prefilled credentials.
    pub auto_continue: Duration,
}

/// Input of a full attempt.
#[derive(Debug, Clone)]
pub struct AttemptRequest {
    pub sso_key: String,
    pub email: String,
    pub redirect: Option<String>,
    pub mode: LoginMode,
    /// Credentials came from the entry URL rather than a form submission.
    pub prefilled: bool,
}

struct Attempt {
    id: Uuid,
    generation: u64,
    state: LoginState,
    validation: Option<ValidationResult>,
    credentials: Option<SsoCredentials>,
}

/// A successful validation, tagged with the generation it belongs to.
struct Verified {
    generation: u64,
    attempt_id: Uuid,
    credentials: SsoCredentials,
}

pub struct SsoLoginOrchestrator {
    backend: Arc<dyn SsoBackend>,
    tokens: TokenIssuer,
    settings: AttemptSettings,
    teardown: CancellationToken,
    attempt: Mutex<Attempt>,
    state_tx: watch::Sender<LoginState>,
}

impl SsoLoginOrchestrator {
    pub fn new(
        backend: Arc<dyn SsoBackend>,
        settings: AttemptSettings,
        teardown: CancellationToken,
    ) -> Arc<Self> {
        let tokens = TokenIssuer::new(Arc::clone(&backend), settings.public_origin.clone());
        let (state_tx, _) = watch::channel(LoginState::idle());
        Arc::new(Self {
            backend,
            tokens,
            settings,
            teardown,
            attempt: Mutex::new(Attempt {
                id: Uuid::new_v4(),
                generation: 0,
                state: LoginState::idle(),
                validation: None,
                credentials: None,
            }),
            state_tx,
        })
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> LoginState {
        self.attempt.lock().state.clone()
    }

    /// The most recent validation answer; `None` if the server could not be asked.
    pub fn validation(&self) -> Option<ValidationResult> {
        self.attempt.lock().validation.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state_tx.subscribe()
    }

    /// Return to `idle` and forget the current attempt. In-flight responses
    /// for it will be discarded when they arrive.
    pub fn reset_state(&self) {
        let mut attempt = self.attempt.lock();
        attempt.generation += 1;
        attempt.id = Uuid::new_v4();
        attempt.validation = None;
        attempt.credentials = None;
        self.replace_state(&mut attempt, LoginState::idle());
    }

    /// Cancel pending delays and mark the orchestrator as torn down.
    pub fn shutdown(&self) {
        self.teardown.cancel();
    }

    /// Validate credentials. Returns `true` when the server accepted them.
    pub async fn validate(&self, sso_key: &str, email: &str) -> bool {
        self.verify(sso_key, email).await.is_ok()
    }

    /// Run the login and token steps.
    ///
    /// Takes no credentials: the pair accepted by the last `validate` is the
    /// one signed in. Refused with `PRECONDITION` unless the attempt is at
    /// `verified`.
    pub async fn login(&self, redirect: Option<&str>, mode: LoginMode) -> LoginOutcome {
        let (verified, record_sso_id) = {
            let mut attempt = self.attempt.lock();
            if attempt.state.step.is_in_flight() {
                return LoginOutcome::failure(ErrorCode::Busy, messages::BUSY);
            }
            let accepted = attempt.validation.as_ref().is_some_and(ValidationResult::is_accepted);
            let verified = match (&attempt.credentials, attempt.state.step) {
                (Some(credentials), LoginStep::Verified) if accepted => Verified {
                    generation: attempt.generation,
                    attempt_id: attempt.id,
                    credentials: credentials.clone(),
                },
                _ => {
                    tracing::debug!(step = %attempt.state.step, "login refused before validation");
                    return LoginOutcome::failure(ErrorCode::Precondition, messages::NOT_VERIFIED);
                }
            };
            (verified, self.begin_sign_in(&mut attempt))
        };
        self.sign_in(verified, record_sso_id, redirect, mode).await
    }

    /// Validate, then sign in. URL-prefilled credentials pause for the
    /// auto-continue delay between the two.
    pub async fn run(&self, request: AttemptRequest) -> LoginOutcome {
        let verified = match self.verify(&request.sso_key, &request.email).await {
            Ok(verified) => verified,
            Err(outcome) => return outcome,
        };

        if request.prefilled {
            let pause =
                ScheduledTransition::spawn(&self.teardown, self.settings.auto_continue, async {});
            if !pause.wait().await {
                tracing::info!(attempt = %verified.attempt_id, "auto-continue cancelled");
                return LoginOutcome::failure(ErrorCode::Superseded, messages::CANCELLED);
            }
        }

        let record_sso_id = {
            let mut attempt = self.attempt.lock();
            if attempt.generation != verified.generation {
                return LoginOutcome::failure(ErrorCode::Superseded, messages::SUPERSEDED);
            }
            if attempt.state.step != LoginStep::Verified {
                // A concurrent `login` claimed this attempt during the pause.
                return LoginOutcome::failure(ErrorCode::Busy, messages::BUSY);
            }
            self.begin_sign_in(&mut attempt)
        };
        self.sign_in(verified, record_sso_id, request.redirect.as_deref(), request.mode).await
    }

    async fn verify(&self, sso_key: &str, email: &str) -> Result<Verified, LoginOutcome> {
        let (generation, attempt_id, credentials) = {
            let mut attempt = self.attempt.lock();
            if attempt.state.step.is_in_flight() {
                return Err(LoginOutcome::failure(ErrorCode::Busy, messages::BUSY));
            }
            attempt.generation += 1;
            attempt.id = Uuid::new_v4();
            attempt.validation = None;
            attempt.credentials = None;

            match check_credentials(sso_key, email) {
                Ok(credentials) => {
                    self.replace_state(&mut attempt, LoginState::validating());
                    (attempt.generation, attempt.id, credentials)
                }
                Err(e) => {
                    tracing::info!(attempt = %attempt.id, reason = %e, "credentials refused locally");
                    self.replace_state(&mut attempt, LoginState::error(e.message()));
                    return Err(LoginOutcome::failure(ErrorCode::InvalidInput, e.message()));
                }
            }
        };

        let result = self.backend.validate_sso(&credentials).await;

        let mut attempt = self.attempt.lock();
        if attempt.generation != generation {
            tracing::debug!(attempt = %attempt_id, "discarding stale validation response");
            return Err(LoginOutcome::failure(ErrorCode::Superseded, messages::SUPERSEDED));
        }

        match result {
            Ok(validation) => match validation.verdict() {
                Verdict::Accepted => {
                    attempt.validation = Some(validation);
                    attempt.credentials = Some(credentials.clone());
                    self.replace_state(&mut attempt, LoginState::verified());
                    Ok(Verified { generation, attempt_id, credentials })
                }
                Verdict::Rejected { reason } => {
                    tracing::info!(attempt = %attempt_id, reason = %reason, "sso key rejected");
                    attempt.validation = Some(validation);
                    self.replace_state(&mut attempt, LoginState::error(reason.clone()));
                    Err(LoginOutcome::failure(ErrorCode::Rejected, reason))
                }
            },
            Err(e) => {
                tracing::warn!(attempt = %attempt_id, err = %e, "sso validation failed");
                let message = e.detail().unwrap_or(messages::VALIDATE_FAILED).to_owned();
                attempt.validation = None;
                self.replace_state(&mut attempt, LoginState::error(message.clone()));
                Err(LoginOutcome::failure(ErrorCode::Transport, message))
            }
        }
    }

    /// Move `verified -> logging-in`. Callers hold the lock from the step
    /// check through this call. Returns the validation record's SSO id.
    fn begin_sign_in(&self, attempt: &mut Attempt) -> Option<String> {
        self.replace_state(attempt, LoginState::logging_in());
        attempt.validation.as_ref().and_then(|v| v.sso.as_ref()).map(|sso| sso.id.clone())
    }

    async fn sign_in(
        &self,
        verified: Verified,
        record_sso_id: Option<String>,
        redirect: Option<&str>,
        mode: LoginMode,
    ) -> LoginOutcome {
        let Verified { generation, attempt_id, credentials } = verified;

        let location = mode.location_label();
        let request = SsoLoginRequest {
            sso_key: credentials.sso_key.clone(),
            email: credentials.email.clone(),
            device_ip: self.settings.device_ip.clone(),
            user_agent: self.settings.user_agent.clone(),
            location: location.to_owned(),
        };
        let result = self.backend.sso_login(&request).await;

        let (user, sso_id) = {
            let mut attempt = self.attempt.lock();
            if attempt.generation != generation {
                tracing::debug!(attempt = %attempt_id, "discarding stale login response");
                return LoginOutcome::failure(ErrorCode::Superseded, messages::SUPERSEDED);
            }
            match result {
                Ok(resp) => match resp.user {
                    Some(user) => {
                        self.replace_state(&mut attempt, LoginState::creating_token());
                        let sso_id =
                            resp.login_history.and_then(|h| h.sso_id).or(record_sso_id);
                        (user, sso_id)
                    }
                    None => {
                        tracing::warn!(attempt = %attempt_id, "login response carried no user");
                        let message = messages::INVALID_LOGIN_RESPONSE;
                        self.replace_state(&mut attempt, LoginState::error(message));
                        return LoginOutcome::failure(ErrorCode::Protocol, message);
                    }
                },
                Err(e) => {
                    tracing::warn!(attempt = %attempt_id, err = %e, "sso login failed");
                    let message = e.detail().unwrap_or(messages::LOGIN_FAILED).to_owned();
                    self.replace_state(&mut attempt, LoginState::error(message.clone()));
                    return LoginOutcome::failure(ErrorCode::Transport, message);
                }
            }
        };

        let metadata = TokenMetadata {
            device_ip: self.settings.device_ip.clone(),
            user_agent: self.settings.user_agent.clone(),
            location: location.to_owned(),
            login_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let subject = TokenSubject {
            user: &user,
            email: &credentials.email,
            sso_id: sso_id.as_deref(),
            callback: redirect,
        };
        let grant = self.tokens.issue(&subject, metadata).await;

        let mut attempt = self.attempt.lock();
        if attempt.generation != generation {
            tracing::debug!(attempt = %attempt_id, "discarding stale token response");
            return LoginOutcome::failure(ErrorCode::Superseded, messages::SUPERSEDED);
        }
        let message = match grant.source {
            TokenSource::Issued => messages::SUCCESS,
            TokenSource::Fallback => messages::SUCCESS_FALLBACK,
        };
        self.replace_state(&mut attempt, LoginState::success(message));
        tracing::info!(
            attempt = %attempt_id,
            user_id = %user.id,
            source = ?grant.source,
            "sso login complete"
        );

        LoginOutcome {
            success: true,
            token: Some(grant.token),
            user_data: Some(user),
            login_success_url: Some(grant.login_success_url),
            error: None,
            code: None,
            sso_id,
            token_source: Some(grant.source),
        }
    }

    fn replace_state(&self, attempt: &mut Attempt, state: LoginState) {
        tracing::debug!(
            attempt = %attempt.id,
            step = %state.step,
            progress = state.progress,
            "login state"
        );
        attempt.state = state.clone();
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
