// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSO backend capabilities: key validation, SSO login, and token issuance.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, ErrorPayload};
use crate::model::{SsoCredentials, UserSummary, ValidationResult};

pub const VALIDATE_PATH: &str = "/api/sso/validate";
pub const LOGIN_PATH: &str = "/api/sso/login";
pub const TOKEN_PATH: &str = "/api/sso/token";

/// Body of the SSO login call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoLoginRequest {
    pub sso_key: String,
    pub email: String,
    #[serde(rename = "deviceIP")]
    pub device_ip: String,
    pub user_agent: String,
    pub location: String,
}

/// Answer of the SSO login call. `user` is absent when missing or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default, deserialize_with = "crate::model::lenient")]
    pub user: Option<UserSummary>,
    #[serde(default, deserialize_with = "crate::model::lenient")]
    pub login_history: Option<LoginHistory>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginHistory {
    #[serde(default, deserialize_with = "crate::model::opt_string_or_number")]
    pub sso_id: Option<String>,
    #[serde(default, rename = "deviceIP")]
    pub device_ip: Option<String>,
}

/// Body of the token issuance call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub user_id: String,
    pub sso_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub email: String,
    pub metadata: TokenMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    #[serde(rename = "deviceIP")]
    pub device_ip: String,
    pub user_agent: String,
    pub location: String,
    pub login_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// The three capabilities the login flow consumes.
#[async_trait]
pub trait SsoBackend: Send + Sync {
    async fn validate_sso(
        &self,
        credentials: &SsoCredentials,
    ) -> Result<ValidationResult, BackendError>;

    async fn sso_login(&self, request: &SsoLoginRequest) -> Result<LoginResponse, BackendError>;

    async fn issue_token(&self, request: &IssueTokenRequest)
        -> Result<TokenResponse, BackendError>;
}

/// JSON-over-HTTP client for the SSO backend.
pub struct HttpBackend {
    base_url: String,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        crate::ensure_crypto_provider();
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body. Non-2xx answers keep the server's error payload.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;

        if !status.is_success() {
            let payload: ErrorPayload = serde_json::from_slice(&bytes).unwrap_or_default();
            tracing::debug!(path, status = status.as_u16(), "backend call failed");
            return Err(BackendError::Status { status: status.as_u16(), payload });
        }

        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl SsoBackend for HttpBackend {
    async fn validate_sso(
        &self,
        credentials: &SsoCredentials,
    ) -> Result<ValidationResult, BackendError> {
        self.post_json(VALIDATE_PATH, credentials).await
    }

    async fn sso_login(&self, request: &SsoLoginRequest) -> Result<LoginResponse, BackendError> {
        self.post_json(LOGIN_PATH, request).await
    }

    async fn issue_token(
        &self,
        request: &IssueTokenRequest,
    ) -> Result<TokenResponse, BackendError> {
        self.post_json(TOKEN_PATH, request).await
    }
}
