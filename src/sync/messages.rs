//! Gmail message sync.
//!
//! Two phases: pull message metadata over the network, then write the batch
//! in one transaction. A failure on one message never blocks the rest, and
//! a transport abort still records the staleness stamp with whatever count
//! was written before the abort.

use crate::db::{NewEmail, SyncDb};
use crate::google_api::gmail::{self, Message, MessageRef};
use crate::google_api::token_store::TokenStore;
use crate::google_api::GoogleApiError;
use crate::util::parse_address;

use super::{mark_synced, resolve_sync_identity, should_sync, RecordError, SyncReport,
            GMAIL_LAST_SYNCED};

/// Pull recent messages for the resolved account into the local store.
pub fn sync_messages(db: &SyncDb) -> SyncReport {
    if !should_sync(db, GMAIL_LAST_SYNCED) {
        log::debug!("Gmail synced within the freshness window; skipping");
        return SyncReport::skipped();
    }

    let mut report = SyncReport::default();

    let store = TokenStore::default_location();
    let Some((identity, token, account)) = resolve_sync_identity(db, &store) else {
        report.errors.push(RecordError::new(
            "credential",
            "No valid Google credential; connect an account first",
        ));
        return report;
    };
    let account_id = account.as_ref().map(|a| a.id);

    let refs = match gmail::list_recent_messages(&token) {
        Ok(refs) => refs,
        Err(e) => {
            log::warn!("Gmail message listing failed: {e}");
            report.errors.push(RecordError::new("list", e));
            mark_synced(db, GMAIL_LAST_SYNCED);
            return report;
        }
    };

    // Network phase: fetch metadata for messages we have not stored yet.
    let batch = collect_batch(db, &refs, &identity, account_id, &mut report, |id| {
        gmail::fetch_message_metadata(&token, id)
    });

    // Write phase: one transaction for the whole batch.
    let write_result = db.with_transaction(|tx| {
        let mut inserted = 0usize;
        for email in &batch {
            if tx.insert_email(email)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    });
    match write_result {
        Ok(inserted) => report.synced = inserted,
        Err(e) => report.errors.push(RecordError::new("batch", e)),
    }

    if let Some(account) = &account {
        if let Err(e) = db.touch_account_synced(&account.email) {
            log::warn!("Failed to stamp account sync time: {e}");
        }
    }
    mark_synced(db, GMAIL_LAST_SYNCED);

    log::info!(
        "Gmail sync: {} new, {} errors ({} listed)",
        report.synced,
        report.errors.len(),
        refs.len()
    );
    report
}

/// Fetch metadata for every listed message not already stored.
///
/// One message's API failure is recorded and skipped; a transport-level
/// failure aborts the rest of the batch, since every later fetch would
/// fail the same way. Whatever was fetched before the abort still gets
/// written and counted.
fn collect_batch<F>(
    db: &SyncDb,
    refs: &[MessageRef],
    identity: &str,
    account_id: Option<i64>,
    report: &mut SyncReport,
    fetch: F,
) -> Vec<NewEmail>
where
    F: Fn(&str) -> Result<Message, GoogleApiError>,
{
    let mut batch = Vec::new();
    for msg_ref in refs {
        match db.email_exists(&msg_ref.id) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                report.errors.push(RecordError::new(&msg_ref.id, e));
                continue;
            }
        }

        match fetch(&msg_ref.id) {
            Ok(message) => batch.push(message_to_new_email(db, &message, identity, account_id)),
            Err(GoogleApiError::Http(e)) => {
                log::warn!("Transport failure fetching {}: {e}; aborting batch", msg_ref.id);
                report.errors.push(RecordError::new(
                    "transport",
                    format!("Batch aborted after {} fetches: {e}", batch.len()),
                ));
                break;
            }
            Err(e) => {
                log::warn!("Failed to fetch message {}: {e}", msg_ref.id);
                report.errors.push(RecordError::new(&msg_ref.id, e));
            }
        }
    }
    batch
}

/// Shape a fetched message into a storable record: direction from the
/// sender vs. the authenticated identity, contact resolved against the
/// counterpart address.
fn message_to_new_email(
    db: &SyncDb,
    message: &Message,
    identity: &str,
    account_id: Option<i64>,
) -> NewEmail {
    let (from_name, from_address) = parse_address(message.header("From").unwrap_or(""));
    let from_address = from_address.to_lowercase();
    let to_addresses = message.header("To").unwrap_or("").to_string();

    let outbound = from_address.eq_ignore_ascii_case(identity);
    let direction = if outbound { "outbound" } else { "inbound" };

    // The counterpart is whoever is not us: recipient for sent mail,
    // sender for received mail.
    let counterpart = if outbound {
        let first_recipient = to_addresses.split(',').next().unwrap_or("");
        parse_address(first_recipient).1.to_lowercase()
    } else {
        from_address.clone()
    };
    let contact_id = db.find_contact_by_email(&counterpart).ok().flatten();

    NewEmail {
        gmail_id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        account_id,
        contact_id,
        direction: direction.to_string(),
        from_address,
        from_name,
        to_addresses,
        subject: message.header("Subject").unwrap_or("").to_string(),
        snippet: message.snippet.clone(),
        labels: message.label_ids.join(","),
        is_read: !message.is_unread(),
        is_starred: message.is_starred(),
        received_at: message
            .received_at()
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
    }
}
