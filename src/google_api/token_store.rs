//! Per-account credential files + token lifecycle.
//!
//! One token file per connected account under `tokens/`, keyed by the
//! sanitized identity, plus the legacy single-token slot from before
//! multi-account support. The legacy slot is modeled as a distinguished
//! identity so account resolution has exactly one code path.

use std::path::PathBuf;

use crate::config;
use crate::db::SyncDb;
use crate::util::{atomic_write_str, email_to_token_filename};

use super::{Credential, GoogleApiError, CLIENT_ID, CLIENT_SECRET, REVOKE_ENDPOINT,
            TOKEN_ENDPOINT, TOKEN_TIMEOUT};

/// Distinguished identity for the pre-multi-account credential slot.
pub const LEGACY_IDENTITY: &str = "<legacy>";

/// Filesystem home for credential files.
pub struct TokenStore {
    base_dir: PathBuf,
}

impl TokenStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Store rooted at the configured data directory.
    pub fn default_location() -> Self {
        Self::new(config::data_dir())
    }

    fn token_path(&self, identity: &str) -> PathBuf {
        if identity == LEGACY_IDENTITY {
            self.base_dir.join("google_token.json")
        } else {
            self.base_dir
                .join("tokens")
                .join(email_to_token_filename(identity))
        }
    }

    /// Load an identity's credential, or None if none is stored.
    pub fn load(&self, identity: &str) -> Result<Option<Credential>, GoogleApiError> {
        let path = self.token_path(identity);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist a credential, stamping `saved_at` with the current time.
    pub fn save(&self, identity: &str, credential: &Credential) -> Result<(), GoogleApiError> {
        let mut stamped = credential.clone();
        stamped.saved_at = chrono::Utc::now().timestamp();

        let path = self.token_path(identity);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&stamped)?;
        atomic_write_str(&path, &content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Remove an identity's credential file if present.
    pub fn delete(&self, identity: &str) -> Result<(), GoogleApiError> {
        let path = self.token_path(identity);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    // =========================================================================
    // Token lifecycle
    // =========================================================================

    /// Refresh an expired credential via the token endpoint and rewrite the
    /// file. Returns None on any failure (no refresh token, transport error,
    /// revoked grant) — refresh failures never propagate.
    pub fn refresh(&self, identity: &str, credential: &Credential) -> Option<Credential> {
        let refresh_token = credential.refresh_token.as_deref()?;

        let client = reqwest::blocking::Client::new();
        let resp = client
            .post(TOKEN_ENDPOINT)
            .timeout(TOKEN_TIMEOUT)
            .form(&[
                ("client_id", CLIENT_ID),
                ("client_secret", CLIENT_SECRET),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send();

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Token refresh failed for {identity}: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            log::warn!("Token refresh rejected for {identity}: HTTP {status}: {body}");
            return None;
        }

        let mut refreshed: Credential = match resp.json() {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Token refresh returned malformed JSON for {identity}: {e}");
                return None;
            }
        };

        // Reissue is not guaranteed to return a refresh token; keep the original.
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token.to_string());
        }

        if let Err(e) = self.save(identity, &refreshed) {
            log::warn!("Failed to persist refreshed token for {identity}: {e}");
            return None;
        }

        self.load(identity).ok().flatten()
    }

    /// Load an identity's credential and return a usable access token,
    /// refreshing first if expired. None if absent or unrefreshable.
    pub fn valid_access_token(&self, identity: &str) -> Option<String> {
        let credential = match self.load(identity) {
            Ok(Some(c)) => c,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to load token for {identity}: {e}");
                return None;
            }
        };

        if credential.is_expired() {
            return self
                .refresh(identity, &credential)
                .map(|c| c.access_token);
        }
        Some(credential.access_token)
    }

    /// Get a currently-valid bearer token.
    ///
    /// With an account given, only that account's credential is considered.
    /// Without one, active accounts are tried primary-first in connection
    /// order, and the legacy slot last. Never errors; returns None when no
    /// candidate yields a usable token.
    pub fn get_valid_credential(&self, db: &SyncDb, account: Option<&str>) -> Option<String> {
        if let Some(email) = account {
            return self.valid_access_token(email);
        }
        self.resolve_account_token(db).map(|(_, token)| token)
    }

    /// Like `get_valid_credential` without an account, but also returns
    /// which identity the token belongs to. The syncers need the identity
    /// to classify message direction.
    pub fn resolve_account_token(&self, db: &SyncDb) -> Option<(String, String)> {
        let mut candidates: Vec<String> = match db.list_accounts() {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|a| a.is_active())
                .map(|a| a.email)
                .collect(),
            Err(e) => {
                log::warn!("Account registry unavailable: {e}");
                Vec::new()
            }
        };
        candidates.push(LEGACY_IDENTITY.to_string());

        for identity in candidates {
            if let Some(token) = self.valid_access_token(&identity) {
                return Some((identity, token));
            }
        }
        None
    }

    /// Revoke an identity's grant and forget the credential. Best-effort:
    /// remote revocation failures are swallowed; the local file is always
    /// removed and the account marked disconnected.
    pub fn revoke(&self, db: &SyncDb, identity: &str) {
        if let Ok(Some(credential)) = self.load(identity) {
            let token = if credential.access_token.is_empty() {
                credential.refresh_token.clone().unwrap_or_default()
            } else {
                credential.access_token.clone()
            };

            let client = reqwest::blocking::Client::new();
            let result = client
                .post(REVOKE_ENDPOINT)
                .timeout(TOKEN_TIMEOUT)
                .form(&[("token", token.as_str())])
                .send();
            if let Err(e) = result {
                log::debug!("Remote revocation failed for {identity}: {e}");
            }
        }

        let _ = self.delete(identity);
        if identity != LEGACY_IDENTITY {
            if let Err(e) = db.mark_account_disconnected(identity) {
                log::warn!("Failed to mark {identity} disconnected: {e}");
            }
        }
    }
}

/// Convenience wrapper over the default store location.
pub fn get_valid_credential(db: &SyncDb, account: Option<&str>) -> Option<String> {
    TokenStore::default_location().get_valid_credential(db, account)
}

/// Revoke and forget an account's credential at the default store location.
pub fn revoke_account(db: &SyncDb, identity: &str) {
    TokenStore::default_location().revoke(db, identity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SyncDb;

    fn fresh_credential(token: &str) -> Credential {
        Credential {
            access_token: token.to_string(),
            refresh_token: Some(format!("1//refresh-{token}")),
            token_type: Some("Bearer".to_string()),
            scope: None,
            expires_in: 3600,
            saved_at: 0, // save() restamps
        }
    }

    fn store() -> (TokenStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        (TokenStore::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (store, _dir) = store();
        store.save("a@one.co", &fresh_credential("tok-a")).unwrap();

        let loaded = store.load("a@one.co").unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok-a");
        assert!(loaded.saved_at > 0, "save must stamp saved_at");
        assert!(!loaded.is_expired());
    }

    #[test]
    fn test_legacy_slot_lives_at_data_root() {
        let (store, dir) = store();
        store.save(LEGACY_IDENTITY, &fresh_credential("tok-legacy")).unwrap();
        assert!(dir.path().join("google_token.json").exists());

        store.save("a@one.co", &fresh_credential("tok-a")).unwrap();
        assert!(dir.path().join("tokens").join("a_one.co.json").exists());
    }

    #[test]
    fn test_resolution_prefers_primary_account() {
        let (store, _dir) = store();
        let db = SyncDb::open_in_memory().unwrap();

        // A registered first → primary; B second; C disconnected
        db.register_account("a@one.co", None, "a_one.co.json").unwrap();
        db.register_account("b@two.co", None, "b_two.co.json").unwrap();
        db.register_account("c@three.co", None, "c_three.co.json").unwrap();
        db.mark_account_disconnected("c@three.co").unwrap();

        store.save("a@one.co", &fresh_credential("tok-a")).unwrap();
        store.save("b@two.co", &fresh_credential("tok-b")).unwrap();
        store.save("c@three.co", &fresh_credential("tok-c")).unwrap();

        let token = store.get_valid_credential(&db, None).unwrap();
        assert_eq!(token, "tok-a");
    }

    #[test]
    fn test_resolution_falls_through_to_secondary() {
        let (store, _dir) = store();
        let db = SyncDb::open_in_memory().unwrap();
        db.register_account("a@one.co", None, "a_one.co.json").unwrap();
        db.register_account("b@two.co", None, "b_two.co.json").unwrap();

        // Primary has no token on disk; secondary does
        store.save("b@two.co", &fresh_credential("tok-b")).unwrap();

        let token = store.get_valid_credential(&db, None).unwrap();
        assert_eq!(token, "tok-b");
    }

    #[test]
    fn test_resolution_never_tries_disconnected() {
        let (store, _dir) = store();
        let db = SyncDb::open_in_memory().unwrap();
        db.register_account("c@three.co", None, "c_three.co.json").unwrap();
        db.mark_account_disconnected("c@three.co").unwrap();

        // C holds the only valid token, but it is disconnected
        store.save("c@three.co", &fresh_credential("tok-c")).unwrap();

        assert!(store.get_valid_credential(&db, None).is_none());
    }

    #[test]
    fn test_resolution_falls_back_to_legacy_slot() {
        let (store, _dir) = store();
        let db = SyncDb::open_in_memory().unwrap();

        store.save(LEGACY_IDENTITY, &fresh_credential("tok-legacy")).unwrap();

        let token = store.get_valid_credential(&db, None).unwrap();
        assert_eq!(token, "tok-legacy");
    }

    #[test]
    fn test_explicit_account_bypasses_registry() {
        let (store, _dir) = store();
        let db = SyncDb::open_in_memory().unwrap();
        store.save("b@two.co", &fresh_credential("tok-b")).unwrap();

        assert_eq!(
            store.get_valid_credential(&db, Some("b@two.co")).as_deref(),
            Some("tok-b")
        );
        assert!(store.get_valid_credential(&db, Some("missing@x.co")).is_none());
    }

    #[test]
    fn test_expired_without_refresh_token_yields_none() {
        let (store, _dir) = store();
        let mut cred = fresh_credential("tok-old");
        cred.refresh_token = None;
        store.save("a@one.co", &cred).unwrap();

        // Force expiry by rewriting saved_at far into the past
        let path = store.token_path("a@one.co");
        let mut loaded: Credential =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        loaded.saved_at = 0;
        std::fs::write(&path, serde_json::to_string(&loaded).unwrap()).unwrap();

        assert!(store.valid_access_token("a@one.co").is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (store, _dir) = store();
        store.save("a@one.co", &fresh_credential("tok-a")).unwrap();
        store.delete("a@one.co").unwrap();
        store.delete("a@one.co").unwrap();
        assert!(store.load("a@one.co").unwrap().is_none());
    }
}
