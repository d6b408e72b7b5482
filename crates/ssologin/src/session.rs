// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session activation: persisting a successful login for the current host.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{LoginOutcome, UserSummary};

const SESSION_FILE: &str = "session.json";

/// Receives successful outcomes when the host is not a popup.
#[async_trait]
pub trait SessionActivator: Send + Sync {
    /// Make the outcome the active session. Returns where to navigate next.
    async fn activate(&self, outcome: &LoginOutcome) -> anyhow::Result<Option<String>>;

    /// Forget the active session.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// Default state directory when `--state-dir` / `SSO_LOGIN_STATE_DIR` is unset.
pub fn state_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("ssologin");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/ssologin");
    }
    PathBuf::from(".ssologin")
}

/// The persisted form of an active session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub user: UserSummary,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_id: Option<String>,
    /// The token was synthesized locally and is not server-verifiable.
    #[serde(default)]
    pub fallback: bool,
    pub logged_in_at: String,
}

impl PersistedSession {
    pub fn from_outcome(outcome: &LoginOutcome) -> anyhow::Result<Self> {
        if !outcome.success {
            anyhow::bail!("cannot activate a failed login");
        }
        let (Some(user), Some(token)) = (&outcome.user_data, &outcome.token) else {
            anyhow::bail!("login outcome is missing the user or token");
        };
        Ok(Self {
            user: user.clone(),
            token: token.clone(),
            sso_id: outcome.sso_id.clone(),
            fallback: outcome.is_fallback(),
            logged_in_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}

/// File-backed session store under the state directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(SESSION_FILE) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted session, if any.
    pub fn load(&self) -> anyhow::Result<Option<PersistedSession>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write the session atomically (unique tmp file + rename).
    pub fn save(&self, session: &PersistedSession) -> anyhow::Result<()> {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(session)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = self.path.with_file_name(format!(
            "{SESSION_FILE}.{}.{seq}.tmp",
            std::process::id()
        ));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Delete the persisted session. Missing files are not an error.
    pub fn remove(&self) -> anyhow::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SessionActivator for SessionStore {
    async fn activate(&self, outcome: &LoginOutcome) -> anyhow::Result<Option<String>> {
        let session = PersistedSession::from_outcome(outcome)?;
        self.save(&session)?;
        if session.fallback {
            tracing::warn!(user_id = %session.user.id, "session activated with a fallback token");
        } else {
            tracing::info!(user_id = %session.user.id, "session activated");
        }
        Ok(outcome.login_success_url.clone())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        if self.remove()? {
            tracing::info!(path = %self.path.display(), "session cleared");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
