//! Gmail API v1 client.
//!
//! List + fetch only; message mutation is out of scope for the sync engine.
//! Body extraction walks the MIME tree iteratively with an explicit stack,
//! so a pathological nesting depth degrades to a large Vec instead of a
//! stack overflow.

use base64::Engine;
use serde::Deserialize;

use super::{api_get, GoogleApiError, GMAIL_API};

/// How far back the recent-message window reaches.
pub const RECENT_QUERY: &str = "newer_than:7d";
/// Page cap per sync pass.
pub const MAX_RESULTS: u32 = 50;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    /// Epoch milliseconds as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub size: i64,
}

impl Message {
    /// Case-insensitive header lookup on the top-level payload.
    pub fn header(&self, name: &str) -> Option<&str> {
        let payload = self.payload.as_ref()?;
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn is_unread(&self) -> bool {
        self.label_ids.iter().any(|l| l == "UNREAD")
    }

    pub fn is_starred(&self) -> bool {
        self.label_ids.iter().any(|l| l == "STARRED")
    }

    /// Receipt time as RFC 3339, from Gmail's epoch-millisecond stamp.
    pub fn received_at(&self) -> Option<String> {
        let millis: i64 = self.internal_date.as_deref()?.parse().ok()?;
        chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.to_rfc3339())
    }
}

// ============================================================================
// API calls
// ============================================================================

/// List recent message references (last 7 days, capped at one page).
pub fn list_recent_messages(access_token: &str) -> Result<Vec<MessageRef>, GoogleApiError> {
    let url = format!(
        "{GMAIL_API}/messages?q={}&maxResults={MAX_RESULTS}",
        urlencode(RECENT_QUERY),
    );
    let list: MessageList = api_get(&url, access_token)?;
    Ok(list.messages)
}

/// Fetch a message with headers only (From/To/Subject), no body payload.
pub fn fetch_message_metadata(
    access_token: &str,
    message_id: &str,
) -> Result<Message, GoogleApiError> {
    let url = format!(
        "{GMAIL_API}/messages/{message_id}?format=metadata\
         &metadataHeaders=From&metadataHeaders=To&metadataHeaders=Subject"
    );
    api_get(&url, access_token)
}

/// Fetch a message with the full MIME payload.
pub fn fetch_message_full(access_token: &str, message_id: &str) -> Result<Message, GoogleApiError> {
    let url = format!("{GMAIL_API}/messages/{message_id}?format=full");
    api_get(&url, access_token)
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

// ============================================================================
// Body extraction
// ============================================================================

/// Extract the message body as text, preferring HTML over plain text
/// (Gemini notification links only appear in the HTML part).
///
/// Walks the part tree iteratively; returns None when no decodable
/// text part exists.
pub fn extract_body_text(message: &Message) -> Option<String> {
    let payload = message.payload.as_ref()?;

    let mut html: Option<String> = None;
    let mut plain: Option<String> = None;

    let mut stack: Vec<&MessagePart> = vec![payload];
    while let Some(part) = stack.pop() {
        if html.is_none() && part.mime_type == "text/html" {
            html = decode_part(part);
        } else if plain.is_none() && part.mime_type == "text/plain" {
            plain = decode_part(part);
        }
        if html.is_some() {
            break;
        }
        // Reversed push so LIFO pop visits siblings in document order
        for child in part.parts.iter().rev() {
            stack.push(child);
        }
    }

    html.or(plain)
}

fn decode_part(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_deref()?;
    decode_body_data(data)
}

/// Decode Gmail's base64url body data (padding optional) to UTF-8,
/// lossily where the charset disagrees.
pub fn decode_body_data(data: &str) -> Option<String> {
    let trimmed = data.trim_end_matches('=');
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(trimmed)
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text)
    }

    fn leaf(mime_type: &str, text: &str) -> MessagePart {
        MessagePart {
            mime_type: mime_type.to_string(),
            headers: Vec::new(),
            body: Some(PartBody {
                data: Some(encode(text)),
                size: text.len() as i64,
            }),
            parts: Vec::new(),
        }
    }

    fn with_payload(payload: MessagePart) -> Message {
        Message {
            id: "m1".to_string(),
            thread_id: "t1".to_string(),
            label_ids: Vec::new(),
            snippet: String::new(),
            internal_date: None,
            payload: Some(payload),
        }
    }

    #[test]
    fn test_message_list_deserializes_sparse_response() {
        // An empty mailbox window returns no `messages` key at all
        let list: MessageList = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());

        let list: MessageList = serde_json::from_str(
            r#"{"messages": [{"id": "m1", "threadId": "t1"}], "nextPageToken": "tok"}"#,
        )
        .unwrap();
        assert_eq!(list.messages.len(), 1);
        assert_eq!(list.messages[0].id, "m1");
        assert_eq!(list.messages[0].thread_id, "t1");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let message: Message = serde_json::from_str(
            r#"{
                "id": "m1",
                "threadId": "t1",
                "labelIds": ["INBOX", "UNREAD"],
                "payload": {
                    "headers": [
                        {"name": "From", "value": "Jane <jane@customer.com>"},
                        {"name": "Subject", "value": "Notes"}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(message.header("from"), Some("Jane <jane@customer.com>"));
        assert_eq!(message.header("SUBJECT"), Some("Notes"));
        assert_eq!(message.header("To"), None);
        assert!(message.is_unread());
        assert!(!message.is_starred());
    }

    #[test]
    fn test_received_at_from_internal_date() {
        let mut message = with_payload(leaf("text/plain", "x"));
        message.internal_date = Some("1767225600000".to_string());
        assert_eq!(
            message.received_at().unwrap(),
            "2026-01-01T00:00:00+00:00"
        );

        message.internal_date = Some("garbage".to_string());
        assert!(message.received_at().is_none());
    }

    #[test]
    fn test_extract_prefers_html_over_plain() {
        let payload = MessagePart {
            mime_type: "multipart/alternative".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![leaf("text/plain", "plain body"), leaf("text/html", "<p>html body</p>")],
        };
        assert_eq!(
            extract_body_text(&with_payload(payload)).unwrap(),
            "<p>html body</p>"
        );
    }

    #[test]
    fn test_extract_falls_back_to_plain() {
        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![leaf("text/plain", "only plain")],
        };
        assert_eq!(extract_body_text(&with_payload(payload)).unwrap(), "only plain");
    }

    #[test]
    fn test_extract_descends_nested_multiparts() {
        let inner = MessagePart {
            mime_type: "multipart/alternative".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![leaf("text/html", "<p>deep</p>")],
        };
        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![inner, leaf("application/pdf", "binary")],
        };
        assert_eq!(extract_body_text(&with_payload(payload)).unwrap(), "<p>deep</p>");
    }

    #[test]
    fn test_extract_takes_first_part_in_document_order() {
        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![
                leaf("text/plain", "first plain"),
                leaf("text/plain", "second plain"),
            ],
        };
        assert_eq!(
            extract_body_text(&with_payload(payload)).unwrap(),
            "first plain"
        );

        // Same ordering rule among HTML siblings
        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![leaf("text/html", "<p>one</p>"), leaf("text/html", "<p>two</p>")],
        };
        assert_eq!(extract_body_text(&with_payload(payload)).unwrap(), "<p>one</p>");
    }

    #[test]
    fn test_extract_none_without_text_parts() {
        let payload = MessagePart {
            mime_type: "multipart/mixed".to_string(),
            headers: Vec::new(),
            body: None,
            parts: vec![leaf("application/pdf", "binary")],
        };
        assert!(extract_body_text(&with_payload(payload)).is_none());
    }

    #[test]
    fn test_decode_body_data_handles_padding_and_url_alphabet() {
        // '>' encodes to Pg== in standard base64; url-safe alphabet + padding
        assert_eq!(decode_body_data("Pg==").unwrap(), ">");
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode("a?b~c");
        assert_eq!(decode_body_data(&encoded).unwrap(), "a?b~c");
        assert!(decode_body_data("%%%invalid%%%").is_none());
    }
}
