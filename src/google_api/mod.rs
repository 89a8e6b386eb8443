//! Blocking HTTP client layer for the Google API family.
//!
//! Direct HTTP via reqwest — no google SDK. All calls are synchronous with
//! fixed per-call timeouts; every public operation returns a Result and the
//! sync layer above converts failures into report entries rather than
//! propagating them.
//!
//! Modules:
//! - token_store: per-account credential files + token lifecycle
//! - auth: OAuth2 PKCE browser consent flow
//! - gmail: Gmail API v1
//! - calendar: Google Calendar API v3
//! - docs: Google Docs API v1

pub mod auth;
pub mod calendar;
pub mod docs;
pub mod gmail;
pub mod token_store;

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// OAuth2 scopes requested at consent time.
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/calendar.readonly",
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/documents.readonly",
    "https://www.googleapis.com/auth/userinfo.email",
];

pub const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";
pub const USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
pub const DOCS_API: &str = "https://docs.googleapis.com/v1/documents";

/// Built-in OAuth client credentials (Desktop App type). A registered
/// desktop-app client secret is not confidential; PKCE carries the actual
/// proof of possession.
pub const CLIENT_ID: &str =
    "245504828099-06i3l5339nkhr5ffq08qn3h9omci4efn.apps.googleusercontent.com";
pub const CLIENT_SECRET: &str = "GOCSPX-daybook-desktop-client";

/// Timeout for data-plane API calls (message lists, events, documents).
pub const DATA_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for token endpoint calls (refresh, exchange, revoke).
pub const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the userinfo identity lookup.
pub const USERINFO_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GoogleApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Not authenticated")]
    NotAuthenticated,
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("Missing authorization scope: {0}")]
    ScopeDenied(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("Could not bind any redirect port")]
    NoPortAvailable,
    #[error("Authorization timed out")]
    FlowTimeout,
    #[error("Authorization denied: {0}")]
    FlowDenied(String),
    #[error("Authorization cancelled")]
    FlowCancelled,
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Credential payload
// ============================================================================

/// OAuth2 token payload as persisted in a token file.
///
/// Mirrors the token endpoint's JSON plus `saved_at` (issue time, epoch
/// seconds) stamped at save time. The refresh token is re-attached on every
/// refresh because reissue is not guaranteed to return one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Declared lifetime in seconds.
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    /// Epoch seconds at which the token was saved.
    #[serde(default)]
    pub saved_at: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Safety margin subtracted from the declared lifetime before expiry checks.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

impl Credential {
    /// Whether the token is expired (or close enough that a refresh is due).
    pub fn is_expired_at(&self, now_epoch: i64) -> bool {
        now_epoch > self.saved_at + self.expires_in - EXPIRY_MARGIN_SECS
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}

// ============================================================================
// HTTP helpers
// ============================================================================

/// Authenticated GET returning deserialized JSON.
///
/// Maps 401 → AuthExpired and 403 → ScopeDenied so callers can distinguish
/// "refresh and retry" from "re-consent needed".
pub fn api_get<T: DeserializeOwned>(url: &str, access_token: &str) -> Result<T, GoogleApiError> {
    let client = reqwest::blocking::Client::new();
    let resp = client
        .get(url)
        .bearer_auth(access_token)
        .timeout(DATA_TIMEOUT)
        .send()?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::AuthExpired);
    }
    if status == reqwest::StatusCode::FORBIDDEN {
        let body = resp.text().unwrap_or_default();
        return Err(GoogleApiError::ScopeDenied(body));
    }
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status: status.as_u16(),
            message: body,
        });
    }

    Ok(resp.json()?)
}

/// Fetch the authenticated identity (email, display name) via userinfo.
pub fn fetch_user_identity(access_token: &str) -> Option<(String, Option<String>)> {
    #[derive(Deserialize)]
    struct UserInfo {
        email: Option<String>,
        name: Option<String>,
    }

    let client = reqwest::blocking::Client::new();
    let resp = client
        .get(USERINFO_ENDPOINT)
        .bearer_auth(access_token)
        .timeout(USERINFO_TIMEOUT)
        .send()
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let info: UserInfo = resp.json().ok()?;
    info.email.map(|email| (email, info.name))
}
