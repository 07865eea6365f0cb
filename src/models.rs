//! Core data types flowing through the harvest pipeline.
//!
//! A [`Page`] is one fetched response; it lives for one orchestration
//! iteration. A [`Record`] is one collection item, persisted as a metadata
//! document under a directory named by its derived identifier. Asset
//! references and sync decisions are transient and recomputed on every
//! visit; the filesystem is the only cross-run state.

use serde_json::Value;

/// Directory names derived from record fields are capped at this length.
pub const MAX_NAME_LEN: usize = 100;

/// One fetched page of the collection listing.
#[derive(Debug)]
pub struct Page {
    /// The `sp` value this page was fetched with.
    pub number: u32,
    /// Child records in source order.
    pub records: Vec<Record>,
}

impl Page {
    /// An empty record list signals the natural end of the collection.
    pub fn has_more(&self) -> bool {
        !self.records.is_empty()
    }
}

/// One collection item extracted from a page.
#[derive(Debug, Clone)]
pub struct Record {
    /// Raw metadata document exactly as returned by the API.
    pub raw: Value,
    /// 1-based position within its page, used for fallback identifiers.
    pub position: usize,
}

impl Record {
    /// Derive the filesystem identifier for this record.
    ///
    /// Priority: `id`, then `url`, then `title`; first field that is a
    /// non-empty string after sanitization. Records with none of these get
    /// an ordinal token unique per page position.
    pub fn identifier(&self) -> String {
        for key in ["id", "url", "title"] {
            if let Some(value) = self.raw.get(key).and_then(Value::as_str) {
                let name = sanitize_name(value, MAX_NAME_LEN);
                if !name.is_empty() {
                    return name;
                }
            }
        }
        format!("item_{}", self.position)
    }
}

/// What one record synchronization actually wrote.
#[derive(Debug, Default)]
pub struct RecordOutcome {
    /// The metadata document was created or updated.
    pub json_written: bool,
    /// Number of assets newly written for this record.
    pub images_written: u32,
    /// Bytes of asset data newly written for this record.
    pub bytes_written: u64,
}

/// Turn an arbitrary field value into a filesystem-safe token.
///
/// Runs of non-alphanumeric characters collapse to a single `_`; leading
/// and trailing underscores are trimmed; the result is truncated to
/// `max_len` bytes on a character boundary.
pub fn sanitize_name(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            out.push(ch);
            pending_sep = false;
        } else {
            pending_sep = true;
        }
    }
    while out.len() > max_len {
        out.pop();
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_replaces_and_collapses() {
        assert_eq!(
            sanitize_name("Title: with / weird * chars", MAX_NAME_LEN),
            "Title_with_weird_chars"
        );
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(200);
        assert!(sanitize_name(&long, 50).len() <= 50);
    }

    #[test]
    fn test_sanitize_trims_edges() {
        assert_eq!(sanitize_name("  hello!  ", MAX_NAME_LEN), "hello");
        assert_eq!(sanitize_name("***", MAX_NAME_LEN), "");
    }

    #[test]
    fn test_identifier_prefers_id() {
        let record = Record {
            raw: json!({"id": "abc 123", "url": "http://x/y", "title": "T"}),
            position: 1,
        };
        assert_eq!(record.identifier(), "abc_123");
    }

    #[test]
    fn test_identifier_falls_back_to_url_then_title() {
        let record = Record {
            raw: json!({"url": "http://example.org/item/9"}),
            position: 1,
        };
        assert_eq!(record.identifier(), "http_example_org_item_9");

        let record = Record {
            raw: json!({"title": "Only a title"}),
            position: 1,
        };
        assert_eq!(record.identifier(), "Only_a_title");
    }

    #[test]
    fn test_identifier_ordinal_fallback() {
        let record = Record {
            raw: json!({"subject": ["nothing usable"]}),
            position: 7,
        };
        assert_eq!(record.identifier(), "item_7");

        // an id that sanitizes to nothing also falls through
        let record = Record {
            raw: json!({"id": "///"}),
            position: 2,
        };
        assert_eq!(record.identifier(), "item_2");
    }

    #[test]
    fn test_page_has_more() {
        let empty = Page {
            number: 3,
            records: vec![],
        };
        assert!(!empty.has_more());
    }
}
