// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Entry URL surface: location parsing and query parameters of `/sso/login`.

use url::Url;

use crate::model::{LoginMode, SsoCredentials};

/// Canonical SSO entry path.
pub const SSO_LOGIN_PATH: &str = "/sso/login";
/// Landing page after a successful login.
pub const SSO_SUCCESS_PATH: &str = "/sso/login-success";

/// Base used to resolve relative locations such as `/sso/login?popup=true`.
const RELATIVE_BASE: &str = "http://localhost";

/// Parse an absolute URL or a root-relative `/path?query` location.
pub fn parse_location(location: &str) -> Result<Url, url::ParseError> {
    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(RELATIVE_BASE)?;
            base.join(location)
        }
        Err(e) => Err(e),
    }
}

/// Query parameters accepted by the SSO entry page.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EntryParams {
    pub sso_key: Option<String>,
    pub email: Option<String>,
    pub redirect: Option<String>,
    pub is_sso: bool,
    pub popup: bool,
}

impl std::fmt::Debug for EntryParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryParams")
            .field("sso_key", &self.sso_key.as_ref().map(|_| "<redacted>"))
            .field("email", &self.email)
            .field("redirect", &self.redirect)
            .field("is_sso", &self.is_sso)
            .field("popup", &self.popup)
            .finish()
    }
}

impl EntryParams {
    /// Read parameters from a parsed location. `ssoKey` wins over `key`,
    /// `gmail` over `email`; empty values count as absent.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        let mut key_alias = None;
        let mut email_alias = None;

        for (name, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name.as_ref() {
                "ssoKey" => params.sso_key = Some(value.to_owned()),
                "key" => key_alias = Some(value.to_owned()),
                "gmail" => params.email = Some(value.to_owned()),
                "email" => email_alias = Some(value.to_owned()),
                "redirect" => params.redirect = Some(value.to_owned()),
                "isSSO" => params.is_sso = value == "true",
                "popup" => params.popup = value == "true",
                _ => {}
            }
        }

        params.sso_key = params.sso_key.or(key_alias);
        params.email = params.email.or(email_alias);
        params
    }

    pub fn parse(location: &str) -> Result<Self, url::ParseError> {
        Ok(Self::from_url(&parse_location(location)?))
    }

    /// Credentials supplied through the URL, when both fields are present.
    pub fn prefilled(&self) -> Option<SsoCredentials> {
        match (&self.sso_key, &self.email) {
            (Some(sso_key), Some(email)) => {
                Some(SsoCredentials { sso_key: sso_key.clone(), email: email.clone() })
            }
            _ => None,
        }
    }

    pub fn mode(&self) -> LoginMode {
        if self.is_sso {
            LoginMode::Direct
        } else if self.popup {
            LoginMode::Popup
        } else {
            LoginMode::Web
        }
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
