use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use super::SyncDb;

/// A calendar event ready for upsert.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub google_event_id: String,
    pub account_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    /// RFC 3339 datetime, or bare date for all-day events.
    pub start_time: String,
    pub end_time: String,
    pub all_day: bool,
    pub status: String,
    /// JSON array of {email, name, status}, None when the event has no attendees.
    pub attendees: Option<String>,
    /// JSON array of resolved contact IDs, None when nothing matched.
    pub contact_ids: Option<String>,
}

impl SyncDb {
    // =========================================================================
    // Calendar events (upsert; calendar data mutates upstream)
    // =========================================================================

    /// Insert or update an event keyed by its external ID. Later syncs
    /// overwrite mutable fields (title, times, status, attendees) without
    /// ever duplicating the row.
    pub fn upsert_event(&self, event: &NewEvent) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT INTO calendar_events
                    (google_event_id, account_id, title, description, location,
                     start_time, end_time, all_day, status, attendees, contact_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(google_event_id) DO UPDATE SET
                    title = excluded.title,
                    description = excluded.description,
                    location = excluded.location,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    all_day = excluded.all_day,
                    status = excluded.status,
                    attendees = excluded.attendees,
                    contact_ids = excluded.contact_ids,
                    synced_at = datetime('now')",
                params![
                    event.google_event_id,
                    event.account_id,
                    event.title,
                    event.description,
                    event.location,
                    event.start_time,
                    event.end_time,
                    event.all_day as i32,
                    event.status,
                    event.attendees,
                    event.contact_ids,
                ],
            )
            .map_err(|e| format!("Failed to upsert event {}: {e}", event.google_event_id))?;
        Ok(())
    }

    /// Find the calendar event whose start time is nearest the given moment,
    /// within ±`window_minutes` inclusive. Nearest-neighbor, not first match.
    ///
    /// The window test runs through julianday so stored start times compare
    /// as instants regardless of their offset format (`Z`, `+00:00`,
    /// `-05:00`); a lexical range check would drop non-UTC calendars.
    pub fn find_event_near(
        &self,
        moment: DateTime<Utc>,
        window_minutes: i64,
    ) -> Result<Option<i64>, String> {
        let window_start = (moment - Duration::minutes(window_minutes)).to_rfc3339();
        let window_end = (moment + Duration::minutes(window_minutes)).to_rfc3339();
        let target = moment.to_rfc3339();

        self.conn
            .query_row(
                "SELECT id FROM calendar_events
                 WHERE julianday(start_time) >= julianday(?1)
                   AND julianday(start_time) <= julianday(?2)
                 ORDER BY ABS(julianday(start_time) - julianday(?3))
                 LIMIT 1",
                params![window_start, window_end, target],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| format!("Failed to match event near {target}: {e}"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::SyncDb;

    pub(crate) fn sample_event(google_event_id: &str, start: &str, status: &str) -> NewEvent {
        NewEvent {
            google_event_id: google_event_id.to_string(),
            account_id: None,
            title: "Standup".to_string(),
            description: None,
            location: None,
            start_time: start.to_string(),
            end_time: start.to_string(),
            all_day: false,
            status: status.to_string(),
            attendees: None,
            contact_ids: None,
        }
    }

    #[test]
    fn test_upsert_overwrites_without_duplicating() {
        let db = SyncDb::open_in_memory().unwrap();

        db.upsert_event(&sample_event("evt-1", "2026-02-01T09:00:00+00:00", "confirmed"))
            .unwrap();
        db.upsert_event(&sample_event("evt-1", "2026-02-01T10:00:00+00:00", "cancelled"))
            .unwrap();

        let (count, status, start): (i64, String, String) = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*), MAX(status), MAX(start_time) FROM calendar_events
                 WHERE google_event_id = 'evt-1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1, "upsert must never create a second row");
        assert_eq!(status, "cancelled");
        assert_eq!(start, "2026-02-01T10:00:00+00:00");
    }

    #[test]
    fn test_upsert_title_change() {
        let db = SyncDb::open_in_memory().unwrap();
        let mut event = sample_event("evt-2", "2026-02-01T09:00:00+00:00", "confirmed");
        db.upsert_event(&event).unwrap();

        event.title = "Renamed".to_string();
        db.upsert_event(&event).unwrap();

        let title: String = db
            .conn_ref()
            .query_row(
                "SELECT title FROM calendar_events WHERE google_event_id = 'evt-2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(title, "Renamed");
    }

    #[test]
    fn test_find_event_near_window_boundary() {
        let db = SyncDb::open_in_memory().unwrap();
        let start: DateTime<Utc> = "2026-02-01T10:00:00Z".parse().unwrap();
        db.upsert_event(&sample_event("evt-1", &start.to_rfc3339(), "confirmed"))
            .unwrap();

        // Exactly 30 minutes away: must link
        let at_30 = start + Duration::minutes(30);
        assert!(db.find_event_near(at_30, 30).unwrap().is_some());

        // 31 minutes away: must not link
        let at_31 = start + Duration::minutes(31);
        assert!(db.find_event_near(at_31, 30).unwrap().is_none());
    }

    #[test]
    fn test_find_event_near_matches_offset_timestamps() {
        let db = SyncDb::open_in_memory().unwrap();
        // 05:10 at -05:00 is 10:10Z: ten minutes from the probe moment
        db.upsert_event(&sample_event("evt-est", "2026-02-01T05:10:00-05:00", "confirmed"))
            .unwrap();

        let moment: DateTime<Utc> = "2026-02-01T10:00:00Z".parse().unwrap();
        assert!(
            db.find_event_near(moment, 30).unwrap().is_some(),
            "an event 10 minutes away must link regardless of its offset format"
        );

        // Same instant family at the window edge: 05:30-05:00 == 10:30Z
        db.upsert_event(&sample_event("evt-edge", "2026-02-01T05:30:00-05:00", "confirmed"))
            .unwrap();
        let at_edge: DateTime<Utc> = "2026-02-01T10:30:00Z".parse().unwrap();
        assert!(db.find_event_near(at_edge, 0).unwrap().is_some());

        // And outside the window it must not link
        let far: DateTime<Utc> = "2026-02-01T12:00:00Z".parse().unwrap();
        assert!(db.find_event_near(far, 30).unwrap().is_none());
    }

    #[test]
    fn test_find_event_near_picks_nearest_not_first() {
        let db = SyncDb::open_in_memory().unwrap();
        // Earlier event is 25 minutes away, later event only 5
        db.upsert_event(&sample_event("far", "2026-02-01T09:35:00+00:00", "confirmed"))
            .unwrap();
        db.upsert_event(&sample_event("near", "2026-02-01T10:05:00+00:00", "confirmed"))
            .unwrap();

        let moment: DateTime<Utc> = "2026-02-01T10:00:00Z".parse().unwrap();
        let matched = db.find_event_near(moment, 30).unwrap().unwrap();

        let matched_event_id: String = db
            .conn_ref()
            .query_row(
                "SELECT google_event_id FROM calendar_events WHERE id = ?1",
                [matched],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(matched_event_id, "near");
    }
}
