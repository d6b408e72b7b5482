// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ssologin: SSO key login orchestration.

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod host;
pub mod model;
pub mod normalize;
pub mod orchestrator;
pub mod popup;
pub mod schedule;
pub mod session;
pub mod test_support;
pub mod token;
pub mod validator;

use std::io::Write;
use std::sync::{Arc, Once};

use tokio_util::sync::CancellationToken;

use crate::backend::HttpBackend;
use crate::config::{Cli, Command, LoginArgs, LoginConfig, OpenerKind};
use crate::host::{ChannelNavigator, HostReport, LoginHost};
use crate::orchestrator::SsoLoginOrchestrator;
use crate::popup::{JsonLinesOpener, Opener};
use crate::session::{SessionActivator, SessionStore};

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Run one subcommand. Returns the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let Cli { config, command } = cli;
    match command {
        Command::Login(args) => login(&config, &args).await,
        Command::Status => status(&config),
        Command::Logout => {
            SessionStore::new(config.state_dir()).clear().await?;
            Ok(0)
        }
    }
}

fn status(config: &LoginConfig) -> anyhow::Result<i32> {
    let store = SessionStore::new(config.state_dir());
    match store.load()? {
        Some(session) => {
            print_json(&session)?;
            Ok(0)
        }
        None => {
            tracing::info!(path = %store.path().display(), "no active session");
            Ok(1)
        }
    }
}

async fn login(config: &LoginConfig, args: &LoginArgs) -> anyhow::Result<i32> {
    let teardown = CancellationToken::new();
    {
        let teardown = teardown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, cancelling pending transitions");
                teardown.cancel();
            }
        });
    }

    let backend = Arc::new(HttpBackend::new(&config.api_url, config.request_timeout()));
    let orchestrator =
        SsoLoginOrchestrator::new(backend, config.attempt_settings()?, teardown.child_token());
    let (navigator, mut navigations) = ChannelNavigator::new();
    let opener: Option<Arc<dyn Opener>> = match args.opener {
        OpenerKind::Stdout => Some(Arc::new(JsonLinesOpener)),
        OpenerKind::None => None,
    };
    let host = LoginHost::new(
        orchestrator,
        Arc::new(SessionStore::new(config.state_dir())),
        Arc::new(navigator),
        opener,
        config.host_settings()?,
        teardown.clone(),
    );

    let submitted = args.submitted();
    let mut location = args.location.clone();
    let report = loop {
        let report = host.open(&location, submitted.clone()).await?;
        let next = match &report {
            HostReport::Corrected { navigated: true, .. } => navigations.try_recv().ok(),
            _ => None,
        };
        match next {
            Some(next) => {
                tracing::info!(from = %location, to = %next, "following corrected location");
                location = next;
            }
            None => break report,
        }
    };
    host.shutdown();

    print_json(&report)?;
    Ok(exit_code(&report))
}

fn exit_code(report: &HostReport) -> i32 {
    match report {
        HostReport::Completed { outcome, .. } | HostReport::PopupDelivered { outcome, .. }
            if outcome.success =>
        {
            0
        }
        HostReport::AwaitingCredentials { .. } => 2,
        _ => 1,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}
