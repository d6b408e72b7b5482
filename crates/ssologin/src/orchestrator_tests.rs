// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use proptest::prelude::*;

use crate::backend::LoginResponse;
use crate::test_support::{
    accepted, login_ok, rejected, status_error, test_settings, token_ok, transport_error, user,
    FakeBackend,
};
use crate::token::{decode_fallback_token, FallbackClaims};

use super::*;

const KEY: &str = "abcd1234";
const EMAIL: &str = "user@corp.com";

fn orchestrator(backend: &Arc<FakeBackend>) -> anyhow::Result<Arc<SsoLoginOrchestrator>> {
    Ok(SsoLoginOrchestrator::new(backend.clone(), test_settings()?, CancellationToken::new()))
}

fn request(prefilled: bool) -> AttemptRequest {
    AttemptRequest {
        sso_key: KEY.to_owned(),
        email: EMAIL.to_owned(),
        redirect: None,
        mode: LoginMode::Web,
        prefilled,
    }
}

#[tokio::test]
async fn end_to_end_issues_token() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert!(outcome.success);
    assert_eq!(outcome.token.as_deref(), Some("tok-xyz"));
    assert_eq!(outcome.sso_id.as_deref(), Some("sso-1"));
    assert_eq!(outcome.token_source, Some(TokenSource::Issued));
    assert_eq!(outcome.user_data.as_ref().map(|u| u.id.as_str()), Some("u-1"));
    let url = outcome.login_success_url.unwrap_or_default();
    assert!(url.starts_with("https://admin.corp.com/sso/login-success?"));
    assert!(url.ends_with("&token=tok-xyz"));

    assert_eq!(orch.state(), LoginState::success(messages::SUCCESS));
    assert_eq!(orch.state().progress, 100);
    assert_eq!((backend.validate_calls(), backend.login_calls(), backend.token_calls()), (1, 1, 1));
    Ok(())
}

#[tokio::test]
async fn login_request_carries_host_metadata() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    let mut req = request(false);
    req.mode = LoginMode::Direct;
    req.redirect = Some("https://app.corp.com/cb".to_owned());
    let outcome = orch.run(req).await;
    assert!(outcome.login_success_url.unwrap_or_default().contains("callback="));

    let logins = backend.login_requests();
    assert_eq!(logins.len(), 1);
    assert_eq!(logins[0].sso_key, KEY);
    assert_eq!(logins[0].email, EMAIL);
    assert_eq!(logins[0].device_ip, "unknown");
    assert_eq!(logins[0].user_agent, "ssologin-test");
    assert_eq!(logins[0].location, "SSO Direct Login");

    let tokens = backend.token_requests();
    assert_eq!(tokens[0].metadata.location, "SSO Direct Login");
    assert!(chrono::DateTime::parse_from_rfc3339(&tokens[0].metadata.login_at).is_ok());
    Ok(())
}

proptest! {
    #[test]
    fn non_com_email_never_reaches_backend(
        email in "[a-z]{1,10}@[a-z]{1,10}\\.(org|net|io|co|comm)",
    ) {
        let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
            return Err(TestCaseError::fail("runtime"));
        };
        let backend = Arc::new(FakeBackend::new());
        let Ok(settings) = test_settings() else {
            return Err(TestCaseError::fail("settings"));
        };
        let orch = SsoLoginOrchestrator::new(backend.clone(), settings, CancellationToken::new());

        let ok = rt.block_on(orch.validate(KEY, &email));
        prop_assert!(!ok);
        prop_assert_eq!(backend.validate_calls(), 0);
        prop_assert_eq!(orch.state().step, LoginStep::Error);
        prop_assert_eq!(orch.state().progress, 0);
    }
}

#[yare::parameterized(
    missing_key   = { "", EMAIL, "SSO key" },
    short_key     = { "abc", EMAIL, "at least 8" },
    missing_email = { KEY, "  ", "email address" },
    bad_email     = { KEY, "user@corp.org", "valid .com email" },
)]
fn local_refusal_sets_error_without_network(key: &str, email: &str, fragment: &str) {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };
    let backend = Arc::new(FakeBackend::new());
    let Ok(orch) = orchestrator(&backend) else {
        return;
    };
    let outcome = rt.block_on(orch.run(request_with(key, email)));
    assert_eq!(outcome.code, Some(ErrorCode::InvalidInput));
    assert!(outcome.error.unwrap_or_default().contains(fragment));
    assert_eq!(backend.validate_calls(), 0);
    assert_eq!(orch.state().step, LoginStep::Error);
}

fn request_with(key: &str, email: &str) -> AttemptRequest {
    AttemptRequest { sso_key: key.to_owned(), email: email.to_owned(), ..request(false) }
}

#[tokio::test]
async fn login_without_validation_is_refused() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    let orch = orchestrator(&backend)?;

    let outcome = orch.login(None, LoginMode::Web).await;
    assert!(!outcome.success);
    assert_eq!(outcome.code, Some(ErrorCode::Precondition));
    assert_eq!(backend.login_calls(), 0);
    assert_eq!(orch.state(), LoginState::idle());
    Ok(())
}

#[tokio::test]
async fn login_after_rejection_is_refused() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(rejected(Some("Key expired"))));
    let orch = orchestrator(&backend)?;

    assert!(!orch.validate(KEY, EMAIL).await);
    let outcome = orch.login(None, LoginMode::Web).await;
    assert_eq!(outcome.code, Some(ErrorCode::Precondition));
    assert_eq!(backend.login_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn validate_then_login_completes() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    assert!(orch.validate(KEY, EMAIL).await);
    assert_eq!(orch.state(), LoginState::verified());
    let outcome = orch.login(None, LoginMode::Popup).await;
    assert!(outcome.success);
    assert_eq!(backend.login_requests()[0].location, "SSO Popup Login");

    // A finished attempt needs a fresh validation before another login.
    let again = orch.login(None, LoginMode::Popup).await;
    assert_eq!(again.code, Some(ErrorCode::Precondition));
    assert_eq!(backend.login_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn rejection_keeps_validation_result() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(rejected(Some("Key expired"))));
    let orch = orchestrator(&backend)?;

    assert!(!orch.validate(KEY, EMAIL).await);
    assert_eq!(orch.state(), LoginState::error("Key expired"));
    let validation = orch.validation().ok_or_else(|| anyhow::anyhow!("validation kept"))?;
    assert!(!validation.is_accepted());
    Ok(())
}

#[tokio::test]
async fn rejection_without_reason_uses_generic_message() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(rejected(None)));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert_eq!(outcome.code, Some(ErrorCode::Rejected));
    assert_eq!(outcome.error.as_deref(), Some(messages::KEY_REJECTED));
    Ok(())
}

#[yare::parameterized(
    server_detail = { Some("Service unavailable"), "Service unavailable" },
    no_detail     = { None, messages::VALIDATE_FAILED },
)]
fn transport_failure_clears_validation(detail: Option<&str>, expected: &str) {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };
    let backend = Arc::new(FakeBackend::new());
    // Seed a previous rejection so clearing is observable.
    backend.push_validate(Ok(rejected(Some("Key expired"))));
    backend.push_validate(Err(match detail {
        Some(d) => status_error(503, d),
        None => transport_error(),
    }));
    let Ok(orch) = orchestrator(&backend) else {
        return;
    };

    assert!(!rt.block_on(orch.validate(KEY, EMAIL)));
    assert!(orch.validation().is_some());
    assert!(!rt.block_on(orch.validate(KEY, EMAIL)));
    assert!(orch.validation().is_none());
    assert_eq!(orch.state(), LoginState::error(expected));
}

#[tokio::test]
async fn state_is_replaced_not_merged() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(rejected(Some("Key expired"))));
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    let orch = orchestrator(&backend)?;

    assert!(!orch.validate(KEY, EMAIL).await);
    assert!(orch.validate(KEY, EMAIL).await);
    assert_eq!(orch.state(), LoginState::verified());
    assert!(orch.validation().is_some_and(|v| v.is_accepted()));
    Ok(())
}

#[tokio::test]
async fn login_without_user_is_protocol_error() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    backend.push_login(Ok(LoginResponse::default()));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert_eq!(outcome.code, Some(ErrorCode::Protocol));
    assert_eq!(outcome.error.as_deref(), Some(messages::INVALID_LOGIN_RESPONSE));
    assert_eq!(backend.token_calls(), 0);
    assert_eq!(orch.state(), LoginState::error(messages::INVALID_LOGIN_RESPONSE));
    Ok(())
}

#[tokio::test]
async fn login_transport_failure_surfaces_server_message() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    backend.push_login(Err(status_error(401, "SSO session revoked")));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert_eq!(outcome.code, Some(ErrorCode::Transport));
    assert_eq!(outcome.error.as_deref(), Some("SSO session revoked"));
    assert_eq!(orch.state().progress, 0);
    assert_eq!(backend.token_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn malformed_login_body_uses_generic_message() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    backend.push_login(Err(crate::error::BackendError::Decode("expected value".to_owned())));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert_eq!(outcome.code, Some(ErrorCode::Transport));
    assert_eq!(outcome.error.as_deref(), Some(messages::LOGIN_FAILED));
    Ok(())
}

#[tokio::test]
async fn token_failure_falls_back() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    backend.push_login(Ok(login_ok("u-1", EMAIL, "sso-1")));
    backend.push_token(Err(status_error(500, "token service down")));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert!(outcome.success);
    assert!(outcome.is_fallback());
    assert_eq!(orch.state(), LoginState::success(messages::SUCCESS_FALLBACK));
    assert!(orch.state().message.contains("fallback token"));

    let token = outcome.token.unwrap_or_default();
    assert_eq!(
        decode_fallback_token(&token),
        Some(FallbackClaims::new("u-1", EMAIL, Some("sso-1")))
    );
    Ok(())
}

#[tokio::test]
async fn sso_id_falls_back_to_validation_record() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    backend.push_login(Ok(LoginResponse { user: Some(user("u-1", EMAIL)), login_history: None }));
    backend.push_token(Ok(token_ok("tok-xyz")));
    let orch = orchestrator(&backend)?;

    let outcome = orch.run(request(false)).await;
    assert_eq!(outcome.sso_id.as_deref(), Some("sso-record"));
    Ok(())
}

#[tokio::test]
async fn reset_returns_to_idle() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    assert!(orch.run(request(false)).await.success);
    orch.reset_state();
    let state = orch.state();
    assert_eq!(state.step, LoginStep::Idle);
    assert_eq!(state.progress, 0);
    assert_eq!(state.message, messages::INITIAL_PROMPT);
    assert!(orch.validation().is_none());
    Ok(())
}

#[tokio::test]
async fn late_validation_after_reset_is_discarded() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    let gate = backend.gate_validation();
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    let orch = orchestrator(&backend)?;

    let pending = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.validate(KEY, EMAIL).await }
    });
    while backend.validate_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(orch.state(), LoginState::validating());

    orch.reset_state();
    gate.notify_one();
    assert!(!pending.await?);

    assert_eq!(orch.state(), LoginState::idle());
    assert!(orch.validation().is_none());
    assert_eq!(orch.login(None, LoginMode::Web).await.code, Some(ErrorCode::Precondition));
    Ok(())
}

#[tokio::test]
async fn late_login_after_reset_is_discarded() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let gate = backend.gate_login();
    let orch = orchestrator(&backend)?;
    let rx = orch.subscribe();

    assert!(orch.validate(KEY, EMAIL).await);
    let pending = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.login(None, LoginMode::Web).await }
    });
    while backend.login_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(orch.state(), LoginState::logging_in());

    orch.reset_state();
    gate.notify_one();
    let outcome = pending.await?;

    assert_eq!(outcome.code, Some(ErrorCode::Superseded));
    assert!(outcome.token.is_none());
    assert_eq!(backend.token_calls(), 0);
    assert_eq!(orch.state(), LoginState::idle());
    assert_eq!(*rx.borrow(), LoginState::idle());
    Ok(())
}

#[tokio::test]
async fn late_token_after_reset_is_discarded() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let gate = backend.gate_token();
    let orch = orchestrator(&backend)?;
    let rx = orch.subscribe();

    let pending = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run(request(false)).await }
    });
    while backend.token_calls() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(orch.state(), LoginState::creating_token());

    orch.reset_state();
    gate.notify_one();
    let outcome = pending.await?;

    assert_eq!(outcome.code, Some(ErrorCode::Superseded));
    assert!(!outcome.success);
    assert!(outcome.login_success_url.is_none());
    assert_eq!(orch.state(), LoginState::idle());
    assert_eq!(*rx.borrow(), LoginState::idle());
    Ok(())
}

#[tokio::test]
async fn second_login_while_signing_in_is_busy() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let gate = backend.gate_login();
    let orch = orchestrator(&backend)?;

    assert!(orch.validate(KEY, EMAIL).await);
    let first = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.login(None, LoginMode::Web).await }
    });
    while backend.login_calls() == 0 {
        tokio::task::yield_now().await;
    }

    let second = orch.login(None, LoginMode::Web).await;
    assert_eq!(second.code, Some(ErrorCode::Busy));

    gate.notify_one();
    assert!(first.await?.success);
    assert_eq!(backend.login_calls(), 1);
    Ok(())
}

#[test]
fn concurrent_logins_sign_in_once() -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread().worker_threads(4).enable_all().build()?;
    rt.block_on(async {
        for _ in 0..50 {
            let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
            let orch = orchestrator(&backend)?;
            assert!(orch.validate(KEY, EMAIL).await);

            let a = tokio::spawn({
                let orch = Arc::clone(&orch);
                async move { orch.login(None, LoginMode::Web).await }
            });
            let b = tokio::spawn({
                let orch = Arc::clone(&orch);
                async move { orch.login(None, LoginMode::Web).await }
            });
            let (a, b) = (a.await?, b.await?);

            assert_eq!(backend.login_calls(), 1);
            assert_eq!([a.success, b.success].iter().filter(|ok| **ok).count(), 1);
        }
        Ok::<(), anyhow::Error>(())
    })
}

#[tokio::test]
async fn overlapping_validate_is_busy() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::new());
    let gate = backend.gate_validation();
    backend.push_validate(Ok(accepted("u-1", EMAIL)));
    let orch = orchestrator(&backend)?;

    let pending = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.validate(KEY, EMAIL).await }
    });
    while backend.validate_calls() == 0 {
        tokio::task::yield_now().await;
    }

    let busy = orch.run(request(false)).await;
    assert_eq!(busy.code, Some(ErrorCode::Busy));
    assert_eq!(backend.validate_calls(), 1);
    assert_eq!(orch.state(), LoginState::validating());

    gate.notify_one();
    assert!(pending.await?);
    assert_eq!(orch.state(), LoginState::verified());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn prefilled_credentials_auto_continue_after_delay() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    let attempt = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run(request(true)).await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(orch.state(), LoginState::verified());
    assert_eq!(backend.login_calls(), 0);

    let outcome = attempt.await?;
    assert!(outcome.success);
    assert_eq!(backend.login_calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_auto_continue() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    let attempt = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run(request(true)).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    orch.shutdown();

    let outcome = attempt.await?;
    assert_eq!(outcome.code, Some(ErrorCode::Superseded));
    assert_eq!(outcome.error.as_deref(), Some(messages::CANCELLED));
    assert_eq!(backend.login_calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reset_during_auto_continue_supersedes() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;

    let attempt = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.run(request(true)).await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    orch.reset_state();

    let outcome = attempt.await?;
    assert_eq!(outcome.code, Some(ErrorCode::Superseded));
    assert_eq!(backend.login_calls(), 0);
    assert_eq!(orch.state(), LoginState::idle());
    Ok(())
}

#[tokio::test]
async fn subscribers_see_terminal_state() -> anyhow::Result<()> {
    let backend = Arc::new(FakeBackend::happy("u-1", EMAIL, "sso-1", "tok-xyz"));
    let orch = orchestrator(&backend)?;
    let rx = orch.subscribe();

    orch.run(request(false)).await;
    assert_eq!(*rx.borrow(), LoginState::success(messages::SUCCESS));
    Ok(())
}
