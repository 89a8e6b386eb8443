//! Google Calendar API v3 client.
//!
//! Reads the primary calendar over a rolling window: 7 days back for
//! attendance history, 14 days forward for planning. Recurring events are
//! expanded server-side (`singleEvents=true`).

use chrono::{Duration, Utc};
use serde::Deserialize;

use super::{api_get, GoogleApiError, CALENDAR_API};

/// Days of history included in the sync window.
pub const WINDOW_DAYS_BACK: i64 = 7;
/// Days of future events included in the sync window.
pub const WINDOW_DAYS_FORWARD: i64 = 14;
/// Event cap per sync pass.
pub const MAX_RESULTS: u32 = 100;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<Event>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
}

/// Either a timed instant (`dateTime`) or a bare date for all-day events.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    #[serde(default)]
    pub date_time: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendee {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub response_status: Option<String>,
}

impl EventTime {
    /// The stored representation: the instant when timed, the bare date
    /// when all-day.
    pub fn as_stored(&self) -> Option<&str> {
        self.date_time.as_deref().or(self.date.as_deref())
    }

    pub fn is_all_day(&self) -> bool {
        self.date_time.is_none() && self.date.is_some()
    }
}

// ============================================================================
// API calls
// ============================================================================

/// Fetch primary-calendar events over the rolling window, expanded and
/// ordered by start time.
pub fn fetch_events(access_token: &str) -> Result<Vec<Event>, GoogleApiError> {
    let now = Utc::now();
    let time_min = (now - Duration::days(WINDOW_DAYS_BACK)).to_rfc3339();
    let time_max = (now + Duration::days(WINDOW_DAYS_FORWARD)).to_rfc3339();

    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("timeMin", &time_min)
        .append_pair("timeMax", &time_max)
        .append_pair("singleEvents", "true")
        .append_pair("orderBy", "startTime")
        .append_pair("maxResults", &MAX_RESULTS.to_string())
        .finish();

    let url = format!("{CALENDAR_API}/calendars/primary/events?{params}");
    let list: EventList = api_get(&url, access_token)?;
    Ok(list.items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_list_deserializes() {
        let list: EventList = serde_json::from_str(
            r#"{
                "kind": "calendar#events",
                "items": [{
                    "id": "evt1",
                    "summary": "Customer sync",
                    "status": "confirmed",
                    "start": {"dateTime": "2026-02-01T10:00:00Z"},
                    "end": {"dateTime": "2026-02-01T10:30:00Z"},
                    "attendees": [
                        {"email": "jane@customer.com", "displayName": "Jane",
                         "responseStatus": "accepted"}
                    ]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(list.items.len(), 1);
        let event = &list.items[0];
        assert_eq!(event.summary.as_deref(), Some("Customer sync"));
        assert_eq!(event.attendees[0].email.as_deref(), Some("jane@customer.com"));
        assert_eq!(event.attendees[0].response_status.as_deref(), Some("accepted"));
        assert_eq!(
            event.start.as_ref().unwrap().as_stored(),
            Some("2026-02-01T10:00:00Z")
        );
        assert!(!event.start.as_ref().unwrap().is_all_day());
    }

    #[test]
    fn test_all_day_event_uses_bare_date() {
        let event: Event = serde_json::from_str(
            r#"{"id": "evt2", "start": {"date": "2026-02-03"}, "end": {"date": "2026-02-04"}}"#,
        )
        .unwrap();

        let start = event.start.as_ref().unwrap();
        assert!(start.is_all_day());
        assert_eq!(start.as_stored(), Some("2026-02-03"));
        assert!(event.summary.is_none());
        assert!(event.attendees.is_empty());
    }

    #[test]
    fn test_empty_window_deserializes() {
        let list: EventList = serde_json::from_str(r#"{"kind": "calendar#events"}"#).unwrap();
        assert!(list.items.is_empty());
    }
}
