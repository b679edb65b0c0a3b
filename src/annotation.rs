//! Annotation codec
//!
//! Annotations are operator notes stored out-of-band in a row, under odd
//! length qualifiers starting with the annotation prefix. Their values are
//! JSON documents; the compaction engine extracts them before merging and
//! never folds them into the canonical cell.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A note attached to a timeseries row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Annotation {
    /// Timeseries the note belongs to (hex UID string), empty for global notes
    pub tsuid: String,
    /// UNIX epoch start of the annotated period, in seconds
    pub start_time: i64,
    /// UNIX epoch end of the annotated period; 0 when open-ended
    pub end_time: i64,
    /// Short human-readable summary
    pub description: String,
    /// Free-form detail text
    pub notes: String,
    /// Arbitrary user key/value pairs
    pub custom: Option<HashMap<String, String>>,
}

impl Annotation {
    /// Decode an annotation cell value.
    ///
    /// Corrupt JSON propagates as an error; the caller reports it as
    /// malformed row data.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_document() {
        let json = br#"{
            "tsuid": "000001000001000001",
            "startTime": 1356998400,
            "endTime": 1356998460,
            "description": "deploy",
            "notes": "rolled v42 to the west cluster",
            "custom": {"owner": "sre"}
        }"#;

        let note = Annotation::parse(json).unwrap();
        assert_eq!(note.tsuid, "000001000001000001");
        assert_eq!(note.start_time, 1356998400);
        assert_eq!(note.end_time, 1356998460);
        assert_eq!(note.description, "deploy");
        assert_eq!(
            note.custom.as_ref().unwrap().get("owner").map(String::as_str),
            Some("sre")
        );
    }

    #[test]
    fn test_parse_sparse_document() {
        let note = Annotation::parse(br#"{"startTime": 100}"#).unwrap();
        assert_eq!(note.start_time, 100);
        assert_eq!(note.end_time, 0);
        assert!(note.description.is_empty());
        assert!(note.custom.is_none());
    }

    #[test]
    fn test_parse_corrupt_json() {
        assert!(Annotation::parse(b"{not json").is_err());
    }

    #[test]
    fn test_roundtrip_uses_wire_names() {
        let note = Annotation {
            start_time: 7,
            description: "x".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"startTime\":7"));
        assert!(json.contains("\"endTime\":0"));
    }
}
