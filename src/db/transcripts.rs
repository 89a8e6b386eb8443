use rusqlite::params;

use super::SyncDb;

/// A discovered transcript with its provenance, ready for atomic import.
#[derive(Debug, Clone)]
pub struct NewTranscript {
    pub title: String,
    /// Source tag, e.g. "gemini".
    pub source: String,
    pub raw_text: String,
    /// RFC 3339 occurrence time.
    pub occurred_at: String,
    pub source_email_id: i64,
    pub source_calendar_event_id: Option<i64>,
    pub source_doc_id: String,
    pub source_doc_url: String,
}

impl SyncDb {
    // =========================================================================
    // Transcripts
    // =========================================================================

    /// Whether a document has already been imported as a transcript.
    pub fn transcript_doc_exists(&self, doc_id: &str) -> Result<bool, String> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM transcript_sources WHERE doc_id = ?1")
            .map_err(|e| format!("Failed to prepare doc existence check: {e}"))?;
        stmt.exists([doc_id])
            .map_err(|e| format!("Failed to check doc {doc_id}: {e}"))
    }

    /// Insert a transcript, its provenance junction row, and the activity-log
    /// entry as one transaction. The UNIQUE index on transcript_sources.doc_id
    /// makes a repeat import of the same document fail the whole unit.
    ///
    /// Returns the new transcript ID.
    pub fn import_transcript(&self, transcript: &NewTranscript) -> Result<i64, String> {
        self.with_transaction(|tx| {
            tx.conn
                .execute(
                    "INSERT INTO transcripts
                        (title, source, raw_text, occurred_at, source_email_id,
                         source_calendar_event_id, source_doc_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        transcript.title,
                        transcript.source,
                        transcript.raw_text,
                        transcript.occurred_at,
                        transcript.source_email_id,
                        transcript.source_calendar_event_id,
                        transcript.source_doc_id,
                    ],
                )
                .map_err(|e| format!("Failed to insert transcript: {e}"))?;
            let transcript_id = tx.conn.last_insert_rowid();

            tx.conn
                .execute(
                    "INSERT INTO transcript_sources
                        (transcript_id, email_id, doc_id, doc_url, source_type)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        transcript_id,
                        transcript.source_email_id,
                        transcript.source_doc_id,
                        transcript.source_doc_url,
                        transcript.source,
                    ],
                )
                .map_err(|e| {
                    format!(
                        "Failed to insert transcript source for doc {}: {e}",
                        transcript.source_doc_id
                    )
                })?;

            let details = serde_json::json!({
                "title": transcript.title,
                "source": transcript.source,
                "doc_id": transcript.source_doc_id,
            });
            tx.conn
                .execute(
                    "INSERT INTO activity_log (entity_type, entity_id, action, details)
                     VALUES ('transcript', ?1, 'auto_imported', ?2)",
                    params![transcript_id, details.to_string()],
                )
                .map_err(|e| format!("Failed to log transcript import: {e}"))?;

            Ok(transcript_id)
        })
    }
}
