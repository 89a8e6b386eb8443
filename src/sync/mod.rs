//! The three public sync operations and the staleness gate.
//!
//! Each operation resolves a credential, pulls from one Google surface in
//! two phases (network reads first, then a single write transaction), and
//! returns a report instead of an error: per-record failures accumulate,
//! only total absence of a credential aborts a run.

use crate::db::SyncDb;
use crate::google_api::token_store::{TokenStore, LEGACY_IDENTITY};

pub mod events;
pub mod messages;
pub mod transcripts;

pub use events::sync_events;
pub use messages::sync_messages;
pub use transcripts::discover_transcripts;

/// Freshness window: a source synced within this many minutes is skipped.
pub const STALENESS_WINDOW_MINUTES: i64 = 15;

pub const GMAIL_LAST_SYNCED: &str = "gmail_last_synced";
pub const CALENDAR_LAST_SYNCED: &str = "calendar_last_synced";
pub const TRANSCRIPTS_LAST_SYNCED: &str = "transcripts_last_synced";

/// One record that failed mid-run without aborting the batch.
#[derive(Debug, Clone)]
pub struct RecordError {
    pub record_id: String,
    pub message: String,
}

impl RecordError {
    fn new(record_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            record_id: record_id.into(),
            message: message.to_string(),
        }
    }
}

/// Outcome of a message or event sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Records written this pass (new inserts or upserts).
    pub synced: usize,
    pub errors: Vec<RecordError>,
    /// True when the staleness gate suppressed the run entirely.
    pub skipped: bool,
}

impl SyncReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Outcome of a transcript discovery pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub imported: usize,
    pub errors: Vec<RecordError>,
    /// Set when the documents scope was refused: the user must re-consent
    /// before discovery can make further progress.
    pub needs_reauth: bool,
    pub skipped: bool,
}

impl DiscoveryReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Whether a source is due for a sync. Fails open: a missing or malformed
/// timestamp never blocks a run.
pub fn should_sync(db: &SyncDb, meta_key: &str) -> bool {
    let stamp = match db.get_meta(meta_key) {
        Ok(Some(s)) => s,
        Ok(None) => return true,
        Err(e) => {
            log::warn!("Staleness check unavailable for {meta_key}: {e}");
            return true;
        }
    };

    let last = match chrono::DateTime::parse_from_rfc3339(&stamp) {
        Ok(dt) => dt.with_timezone(&chrono::Utc),
        Err(_) => {
            log::warn!("Unparseable sync timestamp for {meta_key}: {stamp}");
            return true;
        }
    };

    chrono::Utc::now() - last >= chrono::Duration::minutes(STALENESS_WINDOW_MINUTES)
}

/// Stamp a source as freshly synced.
fn mark_synced(db: &SyncDb, meta_key: &str) {
    if let Err(e) = db.set_meta(meta_key, &chrono::Utc::now().to_rfc3339()) {
        log::warn!("Failed to record sync timestamp for {meta_key}: {e}");
    }
}

/// Resolve the working credential and the account row it belongs to.
/// The legacy slot yields no account row.
fn resolve_sync_identity(
    db: &SyncDb,
    store: &TokenStore,
) -> Option<(String, String, Option<crate::db::Account>)> {
    let (identity, token) = store.resolve_account_token(db)?;
    let account = if identity == LEGACY_IDENTITY {
        None
    } else {
        db.get_account(&identity).ok().flatten()
    };
    Some((identity, token, account))
}
