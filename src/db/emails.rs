use rusqlite::params;

use super::SyncDb;

/// A message ready for insertion, already resolved against the contact registry.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub gmail_id: String,
    pub thread_id: String,
    pub account_id: Option<i64>,
    pub contact_id: Option<i64>,
    /// "inbound" | "outbound", derived from sender vs. authenticated identity.
    pub direction: String,
    pub from_address: String,
    pub from_name: String,
    pub to_addresses: String,
    pub subject: String,
    pub snippet: String,
    /// Comma-joined Gmail label IDs.
    pub labels: String,
    pub is_read: bool,
    pub is_starred: bool,
    /// RFC 3339 receipt time.
    pub received_at: String,
}

/// Reference to a synced email used by the transcript discovery pipeline.
#[derive(Debug, Clone)]
pub struct SourceEmail {
    pub id: i64,
    pub gmail_id: String,
    pub subject: String,
    pub received_at: Option<String>,
}

impl SyncDb {
    // =========================================================================
    // Emails (insert-only; message history is immutable)
    // =========================================================================

    /// Whether a message with this natural ID is already stored.
    pub fn email_exists(&self, gmail_id: &str) -> Result<bool, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM emails WHERE gmail_id = ?1")
            .map_err(|e| format!("Failed to prepare email existence check: {e}"))?;
        stmt.exists([gmail_id])
            .map_err(|e| format!("Failed to check email {gmail_id}: {e}"))
    }

    /// Insert a message, silently no-oping on a duplicate natural ID.
    /// Returns true if a row was inserted.
    pub fn insert_email(&self, email: &NewEmail) -> Result<bool, String> {
        let rows = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO emails
                    (gmail_id, thread_id, account_id, contact_id, direction,
                     from_address, from_name, to_addresses, subject, snippet,
                     labels, is_read, is_starred, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    email.gmail_id,
                    email.thread_id,
                    email.account_id,
                    email.contact_id,
                    email.direction,
                    email.from_address,
                    email.from_name,
                    email.to_addresses,
                    email.subject,
                    email.snippet,
                    email.labels,
                    email.is_read as i32,
                    email.is_starred as i32,
                    email.received_at,
                ],
            )
            .map_err(|e| format!("Failed to insert email {}: {e}", email.gmail_id))?;
        Ok(rows > 0)
    }

    /// Messages from the given sender that have no transcript_sources row yet
    /// — the not-yet-processed input set for transcript discovery.
    pub fn unprocessed_sender_emails(&self, sender: &str) -> Result<Vec<SourceEmail>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT e.id, e.gmail_id, COALESCE(e.subject, ''), e.received_at
                 FROM emails e
                 WHERE e.from_address = ?1
                   AND e.id NOT IN (
                       SELECT email_id FROM transcript_sources WHERE email_id IS NOT NULL
                   )
                 ORDER BY e.received_at DESC",
            )
            .map_err(|e| format!("Failed to prepare unprocessed email query: {e}"))?;

        let rows = stmt
            .query_map([sender], |row| {
                Ok(SourceEmail {
                    id: row.get(0)?,
                    gmail_id: row.get(1)?,
                    subject: row.get(2)?,
                    received_at: row.get(3)?,
                })
            })
            .map_err(|e| format!("Failed to query unprocessed emails: {e}"))?;

        let mut emails = Vec::new();
        for row in rows {
            emails.push(row.map_err(|e| format!("Failed to read email row: {e}"))?);
        }
        Ok(emails)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::SyncDb;

    pub(crate) fn sample_email(gmail_id: &str) -> NewEmail {
        NewEmail {
            gmail_id: gmail_id.to_string(),
            thread_id: "t1".to_string(),
            account_id: None,
            contact_id: None,
            direction: "inbound".to_string(),
            from_address: "jane@customer.com".to_string(),
            from_name: "Jane".to_string(),
            to_addresses: "me@myco.com".to_string(),
            subject: "Hello".to_string(),
            snippet: "Hi there".to_string(),
            labels: "INBOX,UNREAD".to_string(),
            is_read: false,
            is_starred: false,
            received_at: "2026-02-01T09:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn test_insert_email_dedups_on_natural_id() {
        let db = SyncDb::open_in_memory().unwrap();
        let email = sample_email("msg-1");

        assert!(db.insert_email(&email).unwrap());
        // Same natural ID, even from a different batch: no second row
        assert!(!db.insert_email(&email).unwrap());

        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM emails", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_email_exists() {
        let db = SyncDb::open_in_memory().unwrap();
        assert!(!db.email_exists("msg-1").unwrap());
        db.insert_email(&sample_email("msg-1")).unwrap();
        assert!(db.email_exists("msg-1").unwrap());
    }

    #[test]
    fn test_unprocessed_sender_emails_excludes_imported() {
        let db = SyncDb::open_in_memory().unwrap();

        let mut gemini = sample_email("g-1");
        gemini.from_address = "gemini-notes@google.com".to_string();
        db.insert_email(&gemini).unwrap();

        let mut gemini2 = sample_email("g-2");
        gemini2.from_address = "gemini-notes@google.com".to_string();
        db.insert_email(&gemini2).unwrap();

        // Unrelated sender never appears
        db.insert_email(&sample_email("other-1")).unwrap();

        let pending = db
            .unprocessed_sender_emails("gemini-notes@google.com")
            .unwrap();
        assert_eq!(pending.len(), 2);

        // Import the first one; it drops out of the candidate set
        let email_id = pending.iter().find(|e| e.gmail_id == "g-1").unwrap().id;
        db.conn_ref()
            .execute(
                "INSERT INTO transcripts (title, source, raw_text) VALUES ('T', 'gemini', 'x')",
                [],
            )
            .unwrap();
        db.conn_ref()
            .execute(
                "INSERT INTO transcript_sources (transcript_id, email_id, doc_id)
                 VALUES (1, ?1, 'DOC1')",
                [email_id],
            )
            .unwrap();

        let pending = db
            .unprocessed_sender_emails("gemini-notes@google.com")
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].gmail_id, "g-2");
    }
}
