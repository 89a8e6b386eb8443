//! Google Docs API v1 client.
//!
//! Used by transcript discovery to pull the full text of Gemini meeting-notes
//! documents. A 403 here surfaces as ScopeDenied: the documents scope was
//! added after the first release, so older grants need re-consent.

use serde::Deserialize;

use super::{api_get, GoogleApiError, DOCS_API};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<Body>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub content: Vec<StructuralElement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuralElement {
    #[serde(default)]
    pub paragraph: Option<Paragraph>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub elements: Vec<ParagraphElement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphElement {
    #[serde(default)]
    pub text_run: Option<TextRun>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextRun {
    #[serde(default)]
    pub content: String,
}

// ============================================================================
// API calls
// ============================================================================

/// Fetch a document by ID.
pub fn fetch_document(access_token: &str, doc_id: &str) -> Result<Document, GoogleApiError> {
    let url = format!("{DOCS_API}/{doc_id}");
    api_get(&url, access_token)
}

/// Flatten a document's paragraphs into plain text. Tables, images, and
/// other structural elements carry no text runs and are skipped.
pub fn extract_doc_text(document: &Document) -> String {
    let mut text = String::new();
    let Some(body) = &document.body else {
        return text;
    };
    for element in &body.content {
        let Some(paragraph) = &element.paragraph else {
            continue;
        };
        for part in &paragraph.elements {
            if let Some(run) = &part.text_run {
                text.push_str(&run.content);
            }
        }
    }
    text
}
