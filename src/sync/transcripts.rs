//! Gemini meeting-transcript discovery.
//!
//! Mail → doc → transcript: Gemini's notification emails carry a link to
//! the generated notes document; this pipeline follows the link, pulls the
//! document text, pins the transcript to the nearest calendar event, and
//! imports everything atomically.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;

use crate::db::emails::SourceEmail;
use crate::db::transcripts::NewTranscript;
use crate::db::SyncDb;
use crate::google_api::docs;
use crate::google_api::gmail;
use crate::google_api::token_store::TokenStore;
use crate::google_api::GoogleApiError;

use super::{mark_synced, resolve_sync_identity, should_sync, DiscoveryReport, RecordError,
            TRANSCRIPTS_LAST_SYNCED};

/// Sender of Gemini meeting-notes notifications.
pub const GEMINI_SENDER: &str = "gemini-notes@google.com";

/// Half-width of the calendar match window around the occurrence time.
pub const EVENT_MATCH_WINDOW_MINUTES: i64 = 30;

/// Discover and import new Gemini transcripts from already-synced mail.
pub fn discover_transcripts(db: &SyncDb) -> DiscoveryReport {
    if !should_sync(db, TRANSCRIPTS_LAST_SYNCED) {
        log::debug!("Transcripts checked within the freshness window; skipping");
        return DiscoveryReport::skipped();
    }

    let mut report = DiscoveryReport::default();

    let store = TokenStore::default_location();
    let Some((_identity, token, _account)) = resolve_sync_identity(db, &store) else {
        report.errors.push(RecordError::new(
            "credential",
            "No valid Google credential; connect an account first",
        ));
        return report;
    };

    let candidates = match db.unprocessed_sender_emails(GEMINI_SENDER) {
        Ok(candidates) => candidates,
        Err(e) => {
            report.errors.push(RecordError::new("query", e));
            return report;
        }
    };

    run_discovery(
        db,
        &candidates,
        &mut report,
        |id| gmail::fetch_message_full(&token, id),
        |id| docs::fetch_document(&token, id),
    );

    mark_synced(db, TRANSCRIPTS_LAST_SYNCED);
    log::info!(
        "Transcript discovery: {} imported, {} errors ({} candidates)",
        report.imported,
        report.errors.len(),
        candidates.len()
    );
    report
}

/// Walk the candidate notifications through the mail → doc → transcript
/// pipeline. Fetchers are injected so every branch is reachable in tests.
fn run_discovery<M, D>(
    db: &SyncDb,
    candidates: &[SourceEmail],
    report: &mut DiscoveryReport,
    fetch_message: M,
    fetch_doc: D,
) where
    M: Fn(&str) -> Result<gmail::Message, GoogleApiError>,
    D: Fn(&str) -> Result<docs::Document, GoogleApiError>,
{
    for source in candidates {
        let message = match fetch_message(&source.gmail_id) {
            Ok(message) => message,
            Err(e) => {
                report.errors.push(RecordError::new(&source.gmail_id, e));
                continue;
            }
        };

        let Some(body) = gmail::extract_body_text(&message) else {
            report.errors.push(RecordError::new(
                &source.gmail_id,
                "Notification has no text body",
            ));
            continue;
        };
        let Some((doc_id, doc_url)) = extract_doc_link(&body) else {
            report.errors.push(RecordError::new(
                &source.gmail_id,
                "No Google Doc link found in message",
            ));
            continue;
        };

        match db.transcript_doc_exists(&doc_id) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                report.errors.push(RecordError::new(&doc_id, e));
                continue;
            }
        }

        let document = match fetch_doc(&doc_id) {
            Ok(document) => document,
            Err(GoogleApiError::ScopeDenied(detail)) => {
                // The documents scope was refused: every later fetch will
                // fail the same way, so stop and ask for re-consent.
                log::warn!("Docs access denied, re-auth required: {detail}");
                report.errors.push(RecordError::new(
                    &doc_id,
                    "Google Docs access denied; reconnect the account to grant it",
                ));
                report.needs_reauth = true;
                break;
            }
            Err(e) => {
                report.errors.push(RecordError::new(&doc_id, e));
                continue;
            }
        };

        let raw_text = docs::extract_doc_text(&document);
        if raw_text.trim().is_empty() {
            report.errors.push(RecordError::new(&doc_id, "Google Doc was empty"));
            continue;
        }

        let occurred_at = occurrence_time(
            &source.subject,
            source.received_at.as_deref(),
            Utc::now(),
        );
        let event_id = db
            .find_event_near(occurred_at, EVENT_MATCH_WINDOW_MINUTES)
            .unwrap_or_else(|e| {
                log::warn!("Calendar match failed for doc {doc_id}: {e}");
                None
            });

        let title = document
            .title
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| source.subject.clone());

        let transcript = NewTranscript {
            title,
            source: "gemini".to_string(),
            raw_text,
            occurred_at: occurred_at.to_rfc3339(),
            source_email_id: source.id,
            source_calendar_event_id: event_id,
            source_doc_id: doc_id.clone(),
            source_doc_url: doc_url,
        };
        match db.import_transcript(&transcript) {
            Ok(transcript_id) => {
                log::info!("Imported transcript {transcript_id} from doc {doc_id}");
                report.imported += 1;
            }
            Err(e) => report.errors.push(RecordError::new(&doc_id, e)),
        }
    }
}

/// Find the first Google Docs link in a message body.
/// Returns (doc_id, full URL).
fn extract_doc_link(body: &str) -> Option<(String, String)> {
    let re = Regex::new(r"https://docs\.google\.com/document/d/([a-zA-Z0-9_-]+)").ok()?;
    let caps = re.captures(body)?;
    Some((caps[1].to_string(), caps[0].to_string()))
}

/// Best-effort meeting time: a date in the subject line, else the
/// notification's receipt time, else `now`.
fn occurrence_time(subject: &str, received_at: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(date) = parse_subject_date(subject) {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Utc.from_utc_datetime(&midnight);
        }
    }
    if let Some(stamp) = received_at {
        if let Ok(dt) = DateTime::parse_from_rfc3339(stamp) {
            return dt.with_timezone(&Utc);
        }
    }
    now
}

/// Pull a date out of a subject line. Gemini titles its notes with the
/// meeting date in one of a few formats: `2/1/2026`, `2026-02-01`,
/// `February 1, 2026`.
fn parse_subject_date(subject: &str) -> Option<NaiveDate> {
    if let Ok(re) = Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b") {
        if let Some(caps) = re.captures(subject) {
            return NaiveDate::from_ymd_opt(
                caps[3].parse().ok()?,
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
            );
        }
    }

    if let Ok(re) = Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b") {
        if let Some(caps) = re.captures(subject) {
            return NaiveDate::from_ymd_opt(
                caps[1].parse().ok()?,
                caps[2].parse().ok()?,
                caps[3].parse().ok()?,
            );
        }
    }

    let months = r"January|February|March|April|May|June|July|August|September|October|November|December";
    if let Ok(re) = Regex::new(&format!(r"\b({months})\s+(\d{{1,2}}),?\s+(\d{{4}})\b")) {
        if let Some(caps) = re.captures(subject) {
            let month = month_number(&caps[1])?;
            return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?);
        }
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ]
    .iter()
    .position(|m| *m == name)
    .map(|i| i as u32 + 1)
}
