//! daybook — multi-account personal-data sync engine.
//!
//! Pulls messages, calendar events, and meeting transcripts from the Google
//! API family, deduplicates and cross-links them against the local contact
//! registry, and persists them as queryable SQLite records.
//!
//! The orchestration layer (tool surface, report rendering, CLI) lives
//! elsewhere; this crate owns:
//! - OAuth token lifecycle across any number of connected accounts
//! - staleness-gated incremental sync of Gmail and Calendar
//! - the Gemini transcript discovery pipeline (mail → doc → transcript)
//! - entity resolution linking every synced record back to a contact

pub mod config;
pub mod db;
pub mod google_api;
pub mod migrations;
pub mod sync;
pub mod util;

pub use db::SyncDb;
pub use google_api::auth::{AuthFlow, CancelToken, FlowState};
pub use google_api::token_store::{get_valid_credential, revoke_account, TokenStore};
pub use sync::{discover_transcripts, sync_events, sync_messages, DiscoveryReport, SyncReport};
