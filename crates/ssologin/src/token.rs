// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token issuance with a local fallback.
//!
//! When the token service fails, a placeholder token is synthesized from the
//! user's identity. It is unsigned and only meant to bridge the redirect to
//! the success page, so every grant records its [`TokenSource`].

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::backend::{IssueTokenRequest, SsoBackend, TokenMetadata};
use crate::entry::SSO_SUCCESS_PATH;
use crate::model::{non_empty, TokenSource, UserSummary};

/// Token type sent to the token service and embedded in fallback tokens.
pub const SSO_TOKEN_KIND: &str = "sso";

/// Payload of a locally synthesized token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackClaims {
    pub user_id: String,
    pub email: String,
    pub gmail: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sso_id: Option<String>,
}

impl FallbackClaims {
    pub fn new(user_id: &str, email: &str, sso_id: Option<&str>) -> Self {
        Self {
            user_id: user_id.to_owned(),
            email: email.to_owned(),
            gmail: email.to_owned(),
            kind: SSO_TOKEN_KIND.to_owned(),
            sso_id: sso_id.map(str::to_owned),
        }
    }
}

/// Base64 (standard alphabet) of the JSON claims.
pub fn encode_fallback_token(claims: &FallbackClaims) -> String {
    // String-only claims always serialize.
    let json = serde_json::to_vec(claims).unwrap_or_default();
    STANDARD.encode(json)
}

pub fn decode_fallback_token(token: &str) -> Option<FallbackClaims> {
    let bytes = STANDARD.decode(token.trim()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `<origin>/sso/login-success?user=<json>&ssoId=<id>&token=<token>[&callback=<redirect>]`
pub fn build_success_url(
    public_origin: &Url,
    user: &UserSummary,
    sso_id: Option<&str>,
    token: &str,
    callback: Option<&str>,
) -> String {
    let mut url = public_origin.clone();
    url.set_path(SSO_SUCCESS_PATH);
    url.set_query(None);
    url.set_fragment(None);

    let user_json = serde_json::to_string(user).unwrap_or_default();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("user", &user_json);
        if let Some(sso_id) = sso_id {
            query.append_pair("ssoId", sso_id);
        }
        query.append_pair("token", token);
        if let Some(callback) = non_empty(callback) {
            query.append_pair("callback", callback);
        }
    }
    url.into()
}

/// Token plus the landing URL that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub source: TokenSource,
    pub login_success_url: String,
}

/// What the token service needs to know about a verified login.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub user: &'a UserSummary,
    pub email: &'a str,
    pub sso_id: Option<&'a str>,
    pub callback: Option<&'a str>,
}

/// Obtains a session token, synthesizing one when the service is unavailable.
pub struct TokenIssuer {
    backend: Arc<dyn SsoBackend>,
    public_origin: Url,
}

impl TokenIssuer {
    pub fn new(backend: Arc<dyn SsoBackend>, public_origin: Url) -> Self {
        Self { backend, public_origin }
    }

    /// Issue a token for `subject`. Never fails: service errors and empty
    /// tokens degrade to a [`TokenSource::Fallback`] grant.
    pub async fn issue(&self, subject: &TokenSubject<'_>, metadata: TokenMetadata) -> TokenGrant {
        let request = IssueTokenRequest {
            user_id: subject.user.id.clone(),
            sso_id: subject.sso_id.map(str::to_owned),
            kind: SSO_TOKEN_KIND.to_owned(),
            email: subject.email.to_owned(),
            metadata,
        };

        let issued = match self.backend.issue_token(&request).await {
            Ok(resp) => match resp.token.filter(|t| !t.trim().is_empty()) {
                Some(token) => Some(token),
                None => {
                    tracing::warn!(user_id = %subject.user.id, "token service returned no token");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(
                    user_id = %subject.user.id,
                    err = %e,
                    detail = e.detail().unwrap_or_default(),
                    "token service failed"
                );
                None
            }
        };

        let (token, source) = match issued {
            Some(token) => (token, TokenSource::Issued),
            None => {
                tracing::warn!(user_id = %subject.user.id, "using fallback token");
                let claims = FallbackClaims::new(&subject.user.id, subject.email, subject.sso_id);
                (encode_fallback_token(&claims), TokenSource::Fallback)
            }
        };

        let login_success_url = build_success_url(
            &self.public_origin,
            subject.user,
            subject.sso_id,
            &token,
            subject.callback,
        );
        TokenGrant { token, source, login_success_url }
    }
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
