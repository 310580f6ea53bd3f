//! Out-of-band row metadata.
//!
//! An annotation is a note a human or a monitoring system attached to a row
//! (an incident marker, a rollout note). It lives in its own odd-length cell
//! led by [`crate::codec::ANNOTATION_PREFIX`] with a JSON document as the
//! value. Compaction lifts annotations out of the merge and hands them back
//! to the caller untouched; they are never folded into the canonical cell.

use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::errors::Result;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Annotation {
    pub start_time: u64,
    pub end_time: u64,
    pub description: String,
    pub notes: String,
    pub custom: HashMap<String, String>,
}

impl Annotation {
    /// Decode an annotation cell's JSON payload. A decode failure means the
    /// row carries corrupt metadata and is surfaced as malformed data.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let ann = Annotation::parse(
            br#"{"startTime":1288946300,"description":"outage","notes":"db failover"}"#,
        )
        .unwrap();
        assert_eq!(ann.start_time, 1288946300);
        assert_eq!(ann.description, "outage");
        assert_eq!(ann.end_time, 0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Annotation::parse(b"{not json").is_err());
    }
}
