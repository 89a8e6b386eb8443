//! Calendar event sync.
//!
//! One fetch over the rolling window, then a single transaction of upserts.
//! Events mutate upstream (reschedules, cancellations, attendee changes),
//! so this path overwrites rather than skips.

use crate::db::{NewEvent, SyncDb};
use crate::google_api::calendar::{self, Event};
use crate::google_api::token_store::TokenStore;

use super::{mark_synced, resolve_sync_identity, should_sync, RecordError, SyncReport,
            CALENDAR_LAST_SYNCED};

/// Pull the rolling event window for the resolved account into the local store.
pub fn sync_events(db: &SyncDb) -> SyncReport {
    if !should_sync(db, CALENDAR_LAST_SYNCED) {
        log::debug!("Calendar synced within the freshness window; skipping");
        return SyncReport::skipped();
    }

    let mut report = SyncReport::default();

    let store = TokenStore::default_location();
    let Some((_identity, token, account)) = resolve_sync_identity(db, &store) else {
        report.errors.push(RecordError::new(
            "credential",
            "No valid Google credential; connect an account first",
        ));
        return report;
    };
    let account_id = account.as_ref().map(|a| a.id);

    let events = match calendar::fetch_events(&token) {
        Ok(events) => events,
        Err(e) => {
            log::warn!("Calendar event fetch failed: {e}");
            report.errors.push(RecordError::new("list", e));
            mark_synced(db, CALENDAR_LAST_SYNCED);
            return report;
        }
    };

    let mut batch: Vec<NewEvent> = Vec::new();
    for event in &events {
        match event_to_new_event(db, event, account_id) {
            Ok(new_event) => batch.push(new_event),
            Err(e) => report.errors.push(RecordError::new(&event.id, e)),
        }
    }

    let write_result = db.with_transaction(|tx| {
        for event in &batch {
            tx.upsert_event(event)?;
        }
        Ok(batch.len())
    });
    match write_result {
        Ok(upserted) => report.synced = upserted,
        Err(e) => report.errors.push(RecordError::new("batch", e)),
    }

    if let Some(account) = &account {
        if let Err(e) = db.touch_account_synced(&account.email) {
            log::warn!("Failed to stamp account sync time: {e}");
        }
    }
    mark_synced(db, CALENDAR_LAST_SYNCED);

    log::info!(
        "Calendar sync: {} upserted, {} errors",
        report.synced,
        report.errors.len()
    );
    report
}

/// Shape a fetched event into a storable record, resolving attendees
/// against the contact registry best-effort.
fn event_to_new_event(
    db: &SyncDb,
    event: &Event,
    account_id: Option<i64>,
) -> Result<NewEvent, String> {
    let start = event
        .start
        .as_ref()
        .and_then(|t| t.as_stored())
        .ok_or_else(|| format!("Event {} has no start time", event.id))?;
    let end = event
        .end
        .as_ref()
        .and_then(|t| t.as_stored())
        .unwrap_or(start);
    let all_day = event.start.as_ref().map(|t| t.is_all_day()).unwrap_or(false);

    let attendees = if event.attendees.is_empty() {
        None
    } else {
        let entries: Vec<serde_json::Value> = event
            .attendees
            .iter()
            .map(|a| {
                serde_json::json!({
                    "email": a.email,
                    "name": a.display_name,
                    "status": a.response_status,
                })
            })
            .collect();
        Some(serde_json::Value::Array(entries).to_string())
    };

    let mut contact_ids: Vec<i64> = Vec::new();
    for attendee in &event.attendees {
        let Some(email) = attendee.email.as_deref() else {
            continue;
        };
        if let Ok(Some(id)) = db.find_contact_by_email(&email.to_lowercase()) {
            contact_ids.push(id);
        }
    }
    let contact_ids = if contact_ids.is_empty() {
        None
    } else {
        serde_json::to_string(&contact_ids).ok()
    };

    Ok(NewEvent {
        google_event_id: event.id.clone(),
        account_id,
        title: event
            .summary
            .clone()
            .unwrap_or_else(|| "(no title)".to_string()),
        description: event.description.clone(),
        location: event.location.clone(),
        start_time: start.to_string(),
        end_time: end.to_string(),
        all_day,
        status: event
            .status
            .clone()
            .unwrap_or_else(|| "confirmed".to_string()),
        attendees,
        contact_ids,
    })
}
