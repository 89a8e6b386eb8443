//! OAuth2 PKCE browser consent flow.
//!
//! Opens the user's browser for consent, captures the redirect on a
//! short-lived localhost listener, exchanges the code for tokens, resolves
//! the owning identity via userinfo, and registers the account.
//!
//! The listener resolves a single-use channel exactly once; the waiting side
//! polls in small increments against a cancellation token so a test harness
//! can drive timeout and error paths without real sockets.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::db::SyncDb;
use crate::util::email_to_token_filename;

use super::token_store::{TokenStore, LEGACY_IDENTITY};
use super::{Credential, GoogleApiError, AUTH_ENDPOINT, CLIENT_ID, CLIENT_SECRET,
            SCOPES, TOKEN_ENDPOINT, TOKEN_TIMEOUT};

/// Candidate localhost ports for the redirect listener, tried in order.
pub const REDIRECT_PORTS: &[u16] = &[8089, 8090, 8091, 8092];

/// How long to wait for the user to complete consent in the browser.
pub const REDIRECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Poll interval for the cancellable redirect wait.
const WAIT_TICK: Duration = Duration::from_millis(250);

/// Cooperative cancellation handle for the interactive wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Observable flow state, mostly for test harnesses and progress UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AwaitingRedirect,
    ExchangingCode,
    Done,
    Failed,
}

/// What the redirect delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Code(String),
    Denied(String),
}

/// Result of a completed consent flow.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// Resolved identity, None when the userinfo lookup failed and the
    /// credential went to the legacy slot.
    pub email: Option<String>,
    pub label: Option<String>,
    pub is_primary: bool,
}

/// Drives one interactive authorization handshake.
pub struct AuthFlow {
    store: TokenStore,
    state: FlowState,
}

impl AuthFlow {
    pub fn new(store: TokenStore) -> Self {
        Self {
            store,
            state: FlowState::Idle,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Run the full consent flow. Blocks until the redirect arrives, the
    /// timeout elapses, or the token is cancelled.
    pub fn run(&mut self, db: &SyncDb, cancel: &CancelToken) -> Result<AuthOutcome, GoogleApiError> {
        let result = self.run_inner(db, cancel);
        self.state = match result {
            Ok(_) => FlowState::Done,
            Err(_) => FlowState::Failed,
        };
        result
    }

    fn run_inner(
        &mut self,
        db: &SyncDb,
        cancel: &CancelToken,
    ) -> Result<AuthOutcome, GoogleApiError> {
        let (verifier, challenge) = pkce_pair();

        let (listener, port) = bind_redirect_listener()?;
        let redirect_uri = format!("http://localhost:{port}");

        let auth_url = build_auth_url(&redirect_uri, &challenge);
        log::info!("Opening browser for Google OAuth consent on port {port}");
        if let Err(e) = open::that(&auth_url) {
            log::warn!("Failed to open browser: {e}. URL: {auth_url}");
        }

        self.state = FlowState::AwaitingRedirect;
        let rx = spawn_redirect_listener(listener);
        let outcome = wait_for_redirect(&rx, cancel, REDIRECT_TIMEOUT)?;

        let code = match outcome {
            RedirectOutcome::Code(code) => code,
            RedirectOutcome::Denied(reason) => return Err(GoogleApiError::FlowDenied(reason)),
        };

        self.state = FlowState::ExchangingCode;
        let credential = exchange_code(&code, &redirect_uri, &verifier)?;

        // Resolve the owning identity. On lookup failure the credential still
        // lands in the legacy slot so the user is not stuck, but no account
        // row is created.
        match super::fetch_user_identity(&credential.access_token) {
            Some((email, display_name)) => {
                self.store.save(&email, &credential)?;
                let token_file = email_to_token_filename(&email);
                let account = db
                    .register_account(&email, display_name.as_deref(), &token_file)
                    .map_err(GoogleApiError::Malformed)?;
                log::info!("Connected Google account {} (label {})", email, account.label);
                Ok(AuthOutcome {
                    email: Some(email),
                    label: Some(account.label),
                    is_primary: account.is_primary,
                })
            }
            None => {
                log::warn!("Userinfo lookup failed; saving credential to the legacy slot");
                self.store.save(LEGACY_IDENTITY, &credential)?;
                Ok(AuthOutcome {
                    email: None,
                    label: None,
                    is_primary: false,
                })
            }
        }
    }
}

/// Generate a PKCE verifier/challenge pair (S256).
fn pkce_pair() -> (String, String) {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let random_bytes: [u8; 48] = rand::random();
    let verifier = engine.encode(random_bytes);
    let challenge = engine.encode(Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

/// Bind the first free port from the candidate list.
fn bind_redirect_listener() -> Result<(TcpListener, u16), GoogleApiError> {
    for &port in REDIRECT_PORTS {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
            return Ok((listener, port));
        }
    }
    Err(GoogleApiError::NoPortAvailable)
}

fn build_auth_url(redirect_uri: &str, challenge: &str) -> String {
    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("client_id", CLIENT_ID)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .finish();
    format!("{AUTH_ENDPOINT}?{params}")
}

/// Accept exactly one redirect request on a background thread and resolve
/// the channel once. The thread ends after the first request; if the wait
/// times out first, the thread stays parked on accept until process exit.
fn spawn_redirect_listener(listener: TcpListener) -> mpsc::Receiver<RedirectOutcome> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let (mut stream, _) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("Redirect listener accept failed: {e}");
                return;
            }
        };

        let mut buffer = [0u8; 4096];
        let n = stream.read(&mut buffer).unwrap_or(0);
        let request = String::from_utf8_lossy(&buffer[..n]).to_string();

        let outcome = parse_redirect_request(&request);
        match &outcome {
            Some(RedirectOutcome::Code(_)) => send_response(
                &mut stream,
                200,
                "Connected! You can close this tab.",
            ),
            Some(RedirectOutcome::Denied(reason)) => {
                send_response(&mut stream, 400, &format!("Authorization failed: {reason}"))
            }
            None => send_response(&mut stream, 400, "No authorization code received."),
        }

        if let Some(outcome) = outcome {
            let _ = tx.send(outcome);
        }
    });
    rx
}

/// Wait for the redirect outcome, polling so cancellation stays responsive.
fn wait_for_redirect(
    rx: &mpsc::Receiver<RedirectOutcome>,
    cancel: &CancelToken,
    timeout: Duration,
) -> Result<RedirectOutcome, GoogleApiError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(GoogleApiError::FlowCancelled);
        }
        if Instant::now() >= deadline {
            return Err(GoogleApiError::FlowTimeout);
        }
        match rx.recv_timeout(WAIT_TICK) {
            Ok(outcome) => return Ok(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(GoogleApiError::FlowCancelled)
            }
        }
    }
}

/// Extract the authorization code or error from the raw redirect request.
///
/// Pure over the request text: `GET /?code=xxx&scope=... HTTP/1.1`.
pub fn parse_redirect_request(request: &str) -> Option<RedirectOutcome> {
    let path = request.lines().next()?.split_whitespace().nth(1)?;
    let query = path.split('?').nth(1)?;

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        if key == "code" && !value.is_empty() {
            return Some(RedirectOutcome::Code(value.into_owned()));
        }
        if key == "error" {
            return Some(RedirectOutcome::Denied(value.into_owned()));
        }
    }
    None
}

fn send_response(stream: &mut impl Write, status: u16, message: &str) {
    let reason = if status == 200 { "OK" } else { "Bad Request" };
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{message}</h2></body></html>"
    );
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{body}",
        body.len(),
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Exchange an authorization code (plus PKCE verifier) for tokens.
fn exchange_code(
    code: &str,
    redirect_uri: &str,
    verifier: &str,
) -> Result<Credential, GoogleApiError> {
    let client = reqwest::blocking::Client::new();
    let resp = client
        .post(TOKEN_ENDPOINT)
        .timeout(TOKEN_TIMEOUT)
        .form(&[
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
            ("code_verifier", verifier),
        ])
        .send()?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status,
            message: format!("Token exchange failed: {body}"),
        });
    }

    Ok(resp.json()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_redirect_code() {
        let request = "GET /?code=4%2F0AbCdEf&scope=email HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert_eq!(
            parse_redirect_request(request),
            Some(RedirectOutcome::Code("4/0AbCdEf".to_string()))
        );
    }

    #[test]
    fn test_parse_redirect_denied() {
        let request = "GET /?error=access_denied HTTP/1.1\r\n\r\n";
        assert_eq!(
            parse_redirect_request(request),
            Some(RedirectOutcome::Denied("access_denied".to_string()))
        );
    }

    #[test]
    fn test_parse_redirect_no_query() {
        assert_eq!(parse_redirect_request("GET /favicon.ico HTTP/1.1\r\n\r\n"), None);
        assert_eq!(parse_redirect_request(""), None);
    }

    #[test]
    fn test_wait_resolves_on_channel_send() {
        let (tx, rx) = mpsc::channel();
        tx.send(RedirectOutcome::Code("abc".to_string())).unwrap();

        let outcome =
            wait_for_redirect(&rx, &CancelToken::new(), Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, RedirectOutcome::Code("abc".to_string()));
    }

    #[test]
    fn test_wait_times_out() {
        let (_tx, rx) = mpsc::channel::<RedirectOutcome>();
        let err = wait_for_redirect(&rx, &CancelToken::new(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, GoogleApiError::FlowTimeout));
    }

    #[test]
    fn test_wait_observes_cancellation() {
        let (_tx, rx) = mpsc::channel::<RedirectOutcome>();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = wait_for_redirect(&rx, &cancel, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, GoogleApiError::FlowCancelled));
    }

    #[test]
    fn test_pkce_pair_shape() {
        let (verifier, challenge) = pkce_pair();
        assert!(verifier.len() >= 43, "verifier must meet RFC 7636 minimum");
        assert_ne!(verifier, challenge);
        // base64url alphabet, no padding
        assert!(!challenge.contains('='));
        assert!(!challenge.contains('+'));
    }

    #[test]
    fn test_build_auth_url_carries_pkce() {
        let url = build_auth_url("http://localhost:8089", "challenge123");
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("code_challenge=challenge123"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8089"));
    }
}
