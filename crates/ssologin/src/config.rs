// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use url::Url;

use crate::host::HostSettings;
use crate::model::SsoCredentials;
use crate::orchestrator::AttemptSettings;

/// SSO key login agent.
#[derive(Debug, Parser)]
#[command(name = "ssologin", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: LoginConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Load an SSO entry location and run the login it describes.
    Login(LoginArgs),
    /// Print the persisted session, if any.
    Status,
    /// Clear the persisted session.
    Logout,
}

#[derive(Debug, Clone, clap::Args)]
pub struct LoginArgs {
    /// Entry location, absolute or `/sso/login?...`.
    pub location: String,

    /// SSO key submitted as if typed into the form.
    #[arg(long, env = "SSO_LOGIN_KEY", hide_env_values = true, requires = "email")]
    pub sso_key: Option<String>,

    /// Email submitted alongside `--sso-key`.
    #[arg(long, requires = "sso_key")]
    pub email: Option<String>,

    /// Where popup messages go.
    #[arg(long, value_enum, default_value_t = OpenerKind::Stdout)]
    pub opener: OpenerKind,
}

impl LoginArgs {
    /// Credentials given on the command line count as a form submission.
    pub fn submitted(&self) -> Option<SsoCredentials> {
        match (&self.sso_key, &self.email) {
            (Some(sso_key), Some(email)) => {
                Some(SsoCredentials { sso_key: sso_key.clone(), email: email.clone() })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OpenerKind {
    /// JSON lines on stdout, for a parent process.
    Stdout,
    /// No opener; popup locations behave like a normal page.
    None,
}

/// Configuration shared by every subcommand.
#[derive(Debug, Clone, clap::Args)]
pub struct LoginConfig {
    /// Base URL of the SSO backend.
    #[arg(long, default_value = "http://127.0.0.1:8080", env = "SSO_LOGIN_API_URL")]
    pub api_url: String,

    /// Public origin the success landing URL is built on.
    #[arg(long, default_value = "http://localhost:3000", env = "SSO_LOGIN_PUBLIC_ORIGIN")]
    pub public_origin: String,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 30000, env = "SSO_LOGIN_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Delay before following a corrected entry URL, in milliseconds.
    #[arg(long, default_value_t = 2000, env = "SSO_LOGIN_REDIRECT_DELAY_MS")]
    pub redirect_delay_ms: u64,

    /// Pause between validation and login for URL-prefilled credentials, in milliseconds.
    #[arg(long, default_value_t = 1000, env = "SSO_LOGIN_AUTO_CONTINUE_MS")]
    pub auto_continue_ms: u64,

    /// Delay before a popup closes after reporting success, in milliseconds.
    #[arg(long, default_value_t = 1500, env = "SSO_LOGIN_POPUP_CLOSE_MS")]
    pub popup_close_ms: u64,

    /// Device IP reported to the backend.
    #[arg(long, default_value = "unknown", env = "SSO_LOGIN_DEVICE_IP")]
    pub device_ip: String,

    /// User agent reported to the backend.
    #[arg(long, default_value = concat!("ssologin/", env!("CARGO_PKG_VERSION")), env = "SSO_LOGIN_USER_AGENT")]
    pub user_agent: String,

    /// Directory holding the persisted session. Defaults to
    /// `$XDG_STATE_HOME/ssologin`, then `$HOME/.local/state/ssologin`.
    #[arg(long, env = "SSO_LOGIN_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, default_value = "text", env = "SSO_LOGIN_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "SSO_LOGIN_LOG_LEVEL")]
    pub log_level: String,
}

impl LoginConfig {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        let api = Url::parse(&self.api_url)
            .map_err(|e| anyhow::anyhow!("invalid --api-url {:?}: {e}", self.api_url))?;
        if !matches!(api.scheme(), "http" | "https") {
            anyhow::bail!("--api-url must be http or https, got {}", api.scheme());
        }
        self.public_origin_url()?;
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be json or text, got {:?}", self.log_format);
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("--request-timeout-ms must be positive");
        }
        Ok(())
    }

    pub fn public_origin_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.public_origin)
            .map_err(|e| anyhow::anyhow!("invalid --public-origin {:?}: {e}", self.public_origin))?;
        if !url.origin().is_tuple() {
            anyhow::bail!("--public-origin {:?} has no origin", self.public_origin);
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn redirect_delay(&self) -> Duration {
        Duration::from_millis(self.redirect_delay_ms)
    }

    pub fn auto_continue_delay(&self) -> Duration {
        Duration::from_millis(self.auto_continue_ms)
    }

    pub fn popup_close_delay(&self) -> Duration {
        Duration::from_millis(self.popup_close_ms)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(crate::session::state_dir)
    }

    pub fn attempt_settings(&self) -> anyhow::Result<AttemptSettings> {
        Ok(AttemptSettings {
            public_origin: self.public_origin_url()?,
            device_ip: self.device_ip.clone(),
            user_agent: self.user_agent.clone(),
            auto_continue: self.auto_continue_delay(),
        })
    }

    pub fn host_settings(&self) -> anyhow::Result<HostSettings> {
        Ok(HostSettings {
            public_origin: self.public_origin_url()?,
            redirect_delay: self.redirect_delay(),
            close_delay: self.popup_close_delay(),
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
