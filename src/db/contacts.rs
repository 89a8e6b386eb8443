use rusqlite::OptionalExtension;

use super::SyncDb;

impl SyncDb {
    // =========================================================================
    // Contact registry (read-only: the surrounding system owns writes)
    // =========================================================================

    /// Resolve a contact by exact address match. Case-insensitive on the
    /// stored side via lower(); addresses arrive already lowercased from
    /// the syncers.
    pub fn find_contact_by_email(&self, email: &str) -> Result<Option<i64>, String> {
        if email.is_empty() {
            return Ok(None);
        }
        self.conn
            .query_row(
                "SELECT id FROM contacts WHERE lower(email) = lower(?1)",
                [email],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("Failed to look up contact {email}: {e}"))
    }
}
