use rusqlite::{params, OptionalExtension};

use super::SyncDb;
use crate::util::label_from_email;

/// A connected Google account.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub email: String,
    pub label: String,
    pub display_name: Option<String>,
    pub token_file: String,
    pub is_primary: bool,
    pub status: String,
    pub connected_at: String,
    pub last_synced_at: Option<String>,
}

impl Account {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

fn map_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        label: row.get(2)?,
        display_name: row.get(3)?,
        token_file: row.get(4)?,
        is_primary: row.get::<_, i64>(5)? != 0,
        status: row.get(6)?,
        connected_at: row.get(7)?,
        last_synced_at: row.get(8)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, email, label, display_name, token_file, is_primary, \
                               status, connected_at, last_synced_at";

impl SyncDb {
    // =========================================================================
    // Account registry
    // =========================================================================

    /// Register or update an account after a successful authorization.
    ///
    /// The first account ever registered becomes primary; the flag is never
    /// transferred afterward. Re-registration resets status to active and
    /// refreshes the token-file reference without disturbing `is_primary`.
    pub fn register_account(
        &self,
        email: &str,
        display_name: Option<&str>,
        token_file: &str,
    ) -> Result<Account, String> {
        let label = label_from_email(email);

        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM google_accounts", [], |row| row.get(0))
            .map_err(|e| format!("Failed to count accounts: {e}"))?;
        let is_primary = if count == 0 { 1 } else { 0 };

        self.conn
            .execute(
                "INSERT INTO google_accounts (email, label, display_name, token_file, is_primary)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(email) DO UPDATE SET
                    display_name = excluded.display_name,
                    token_file = excluded.token_file,
                    status = 'active'",
                params![email, label, display_name, token_file, is_primary],
            )
            .map_err(|e| format!("Failed to register account {email}: {e}"))?;

        self.get_account(email)?
            .ok_or_else(|| format!("Account {email} missing after registration"))
    }

    /// Look up one account by identity.
    pub fn get_account(&self, email: &str) -> Result<Option<Account>, String> {
        self.conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM google_accounts WHERE email = ?1"),
                [email],
                map_account_row,
            )
            .optional()
            .map_err(|e| format!("Failed to read account {email}: {e}"))
    }

    /// All accounts, primary first then by connection order.
    pub fn list_accounts(&self) -> Result<Vec<Account>, String> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ACCOUNT_COLUMNS} FROM google_accounts
                 ORDER BY is_primary DESC, connected_at ASC, id ASC"
            ))
            .map_err(|e| format!("Failed to prepare account list: {e}"))?;

        let rows = stmt
            .query_map([], map_account_row)
            .map_err(|e| format!("Failed to query accounts: {e}"))?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row.map_err(|e| format!("Failed to read account row: {e}"))?);
        }
        Ok(accounts)
    }

    /// Mark an account disconnected. Accounts are never deleted.
    pub fn mark_account_disconnected(&self, email: &str) -> Result<(), String> {
        self.conn
            .execute(
                "UPDATE google_accounts SET status = 'disconnected' WHERE email = ?1",
                [email],
            )
            .map_err(|e| format!("Failed to disconnect account {email}: {e}"))?;
        Ok(())
    }

    /// Stamp an account's last-synced time.
    pub fn touch_account_synced(&self, email: &str) -> Result<(), String> {
        self.conn
            .execute(
                "UPDATE google_accounts SET last_synced_at = datetime('now') WHERE email = ?1",
                [email],
            )
            .map_err(|e| format!("Failed to stamp account sync time {email}: {e}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::SyncDb;

    #[test]
    fn test_first_account_becomes_primary() {
        let db = SyncDb::open_in_memory().unwrap();

        let a = db
            .register_account("a@one.co", Some("Alice"), "a_one.co.json")
            .unwrap();
        assert!(a.is_primary);
        assert_eq!(a.label, "one.co");
        assert_eq!(a.status, "active");

        let b = db.register_account("b@two.co", None, "b_two.co.json").unwrap();
        assert!(!b.is_primary, "primary must not transfer to later accounts");
    }

    #[test]
    fn test_reregistration_keeps_primary_and_reactivates() {
        let db = SyncDb::open_in_memory().unwrap();
        db.register_account("a@one.co", None, "a_one.co.json").unwrap();
        db.register_account("b@two.co", None, "b_two.co.json").unwrap();

        db.mark_account_disconnected("a@one.co").unwrap();
        let a = db.get_account("a@one.co").unwrap().unwrap();
        assert_eq!(a.status, "disconnected");

        // Re-auth: status resets, primary flag untouched
        let a = db
            .register_account("a@one.co", Some("Alice"), "a_one.co.json")
            .unwrap();
        assert_eq!(a.status, "active");
        assert!(a.is_primary);
        assert_eq!(a.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_list_accounts_orders_primary_first() {
        let db = SyncDb::open_in_memory().unwrap();
        db.register_account("a@one.co", None, "a.json").unwrap();
        db.register_account("b@two.co", None, "b.json").unwrap();
        db.register_account("c@three.co", None, "c.json").unwrap();

        let accounts = db.list_accounts().unwrap();
        assert_eq!(accounts[0].email, "a@one.co");
        assert!(accounts[0].is_primary);
        assert_eq!(accounts.len(), 3);
    }
}
