// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted backend, recording collaborators, and
//! assertion helpers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use url::Url;

use crate::backend::{
    IssueTokenRequest, LoginHistory, LoginResponse, SsoBackend, SsoLoginRequest, TokenResponse,
};
use crate::error::{BackendError, ErrorPayload};
use crate::host::Navigator;
use crate::model::{LoginOutcome, SsoCredentials, SsoRecord, UserSummary, ValidationResult};
use crate::orchestrator::AttemptSettings;
use crate::popup::{Opener, PopupMessage};
use crate::session::SessionActivator;

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

pub fn user(id: &str, email: &str) -> UserSummary {
    UserSummary { id: id.to_owned(), email: Some(email.to_owned()), extra: Default::default() }
}

/// Validation body with `success: true` and a user.
pub fn accepted(user_id: &str, email: &str) -> ValidationResult {
    ValidationResult {
        success: true,
        valid: true,
        matched_key_type: None,
        sso: Some(SsoRecord {
            id: "sso-record".to_owned(),
            url: None,
            user_id: Some(user_id.to_owned()),
            is_active: true,
            expires_at: None,
        }),
        user: Some(user(user_id, email)),
        error: None,
        message: None,
    }
}

/// Validation body with `success: false` and an optional server reason.
pub fn rejected(error: Option<&str>) -> ValidationResult {
    ValidationResult { error: error.map(str::to_owned), ..Default::default() }
}

pub fn login_ok(user_id: &str, email: &str, sso_id: &str) -> LoginResponse {
    LoginResponse {
        user: Some(user(user_id, email)),
        login_history: Some(LoginHistory {
            sso_id: Some(sso_id.to_owned()),
            device_ip: None,
        }),
    }
}

pub fn token_ok(token: &str) -> TokenResponse {
    TokenResponse { token: Some(token.to_owned()) }
}

pub fn status_error(status: u16, error: &str) -> BackendError {
    BackendError::Status {
        status,
        payload: ErrorPayload { error: Some(error.to_owned()), message: None },
    }
}

pub fn transport_error() -> BackendError {
    BackendError::Transport("connection refused".to_owned())
}

pub const TEST_ORIGIN: &str = "https://admin.corp.com";

/// Settings with a fixed origin and the default delays.
pub fn test_settings() -> anyhow::Result<AttemptSettings> {
    Ok(AttemptSettings {
        public_origin: Url::parse(TEST_ORIGIN)?,
        device_ip: "unknown".to_owned(),
        user_agent: "ssologin-test".to_owned(),
        auto_continue: Duration::from_secs(1),
    })
}

type Script<T> = Mutex<VecDeque<Result<T, BackendError>>>;

/// In-memory [`SsoBackend`] answering from per-capability scripts.
///
/// An exhausted script answers with a transport error.
#[derive(Default)]
pub struct FakeBackend {
    validate: Script<ValidationResult>,
    login: Script<LoginResponse>,
    token: Script<TokenResponse>,
    validate_calls: AtomicUsize,
    login_calls: AtomicUsize,
    token_calls: AtomicUsize,
    validate_gate: Mutex<Option<Arc<Notify>>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
    token_gate: Mutex<Option<Arc<Notify>>>,
    login_requests: Mutex<Vec<SsoLoginRequest>>,
    token_requests: Mutex<Vec<IssueTokenRequest>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend scripted for one fully successful attempt.
    pub fn happy(user_id: &str, email: &str, sso_id: &str, token: &str) -> Self {
        let backend = Self::new();
        backend.push_validate(Ok(accepted(user_id, email)));
        backend.push_login(Ok(login_ok(user_id, email, sso_id)));
        backend.push_token(Ok(token_ok(token)));
        backend
    }

    pub fn push_validate(&self, result: Result<ValidationResult, BackendError>) {
        self.validate.lock().push_back(result);
    }

    pub fn push_login(&self, result: Result<LoginResponse, BackendError>) {
        self.login.lock().push_back(result);
    }

    pub fn push_token(&self, result: Result<TokenResponse, BackendError>) {
        self.token.lock().push_back(result);
    }

    /// Hold every following validation call until the returned gate is notified.
    pub fn gate_validation(&self) -> Arc<Notify> {
        Self::install_gate(&self.validate_gate)
    }

    /// Hold every following login call until the returned gate is notified.
    pub fn gate_login(&self) -> Arc<Notify> {
        Self::install_gate(&self.login_gate)
    }

    /// Hold every following token call until the returned gate is notified.
    pub fn gate_token(&self) -> Arc<Notify> {
        Self::install_gate(&self.token_gate)
    }

    pub fn validate_calls(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn login_requests(&self) -> Vec<SsoLoginRequest> {
        self.login_requests.lock().clone()
    }

    pub fn token_requests(&self) -> Vec<IssueTokenRequest> {
        self.token_requests.lock().clone()
    }

    fn install_gate(slot: &Mutex<Option<Arc<Notify>>>) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *slot.lock() = Some(Arc::clone(&gate));
        gate
    }

    async fn pass_gate(slot: &Mutex<Option<Arc<Notify>>>) {
        let gate = slot.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn next<T>(script: &Script<T>) -> Result<T, BackendError> {
        script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Transport("no scripted response".to_owned())))
    }
}

#[async_trait]
impl SsoBackend for FakeBackend {
    async fn validate_sso(
        &self,
        _credentials: &SsoCredentials,
    ) -> Result<ValidationResult, BackendError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        Self::pass_gate(&self.validate_gate).await;
        Self::next(&self.validate)
    }

    async fn sso_login(&self, request: &SsoLoginRequest) -> Result<LoginResponse, BackendError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        self.login_requests.lock().push(request.clone());
        Self::pass_gate(&self.login_gate).await;
        Self::next(&self.login)
    }

    async fn issue_token(
        &self,
        request: &IssueTokenRequest,
    ) -> Result<TokenResponse, BackendError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.token_requests.lock().push(request.clone());
        Self::pass_gate(&self.token_gate).await;
        Self::next(&self.token)
    }
}

/// Opener that records every posted message with its target origin.
#[derive(Default)]
pub struct RecordingOpener {
    posted: Mutex<Vec<(PopupMessage, String)>>,
}

impl RecordingOpener {
    pub fn posted(&self) -> Vec<(PopupMessage, String)> {
        self.posted.lock().clone()
    }
}

#[async_trait]
impl Opener for RecordingOpener {
    async fn post_message(&self, message: &PopupMessage, target_origin: &str) -> anyhow::Result<()> {
        self.posted.lock().push((message.clone(), target_origin.to_owned()));
        Ok(())
    }
}

/// Navigator that records visited locations.
#[derive(Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn visited(&self) -> Vec<String> {
        self.visited.lock().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, location: &str) {
        self.visited.lock().push(location.to_owned());
    }
}

/// Session activator keeping the activated outcome in memory.
#[derive(Default)]
pub struct MemorySessionActivator {
    active: Mutex<Option<LoginOutcome>>,
    activations: AtomicUsize,
}

impl MemorySessionActivator {
    pub fn active(&self) -> Option<LoginOutcome> {
        self.active.lock().clone()
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionActivator for MemorySessionActivator {
    async fn activate(&self, outcome: &LoginOutcome) -> anyhow::Result<Option<String>> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        *self.active.lock() = Some(outcome.clone());
        Ok(outcome.login_success_url.clone())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        *self.active.lock() = None;
        Ok(())
    }
}
