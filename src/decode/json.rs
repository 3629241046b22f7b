//! JSON dumps of the tagged message stream
//!
//! Accepts either `{"messages": [...]}` or a bare array of messages:
//!
//! ```json
//! [
//!   {"kind": "sport", "fields": [
//!     {"name": "sport", "value": "walking", "raw_value": 11},
//!     {"name": "sub_sport", "value": "generic", "raw_value": 0}
//!   ]}
//! ]
//! ```

use super::{DecodedFile, DecodedMessage};
use crate::error::IngestError;
use serde::de::Error as _;
use std::path::Path;

/// Parse a dump from a string
pub fn parse_str(json: &str) -> Result<DecodedFile, serde_json::Error> {
    let dump: serde_json::Value = serde_json::from_str(json)?;
    let messages = match dump {
        serde_json::Value::Object(mut wrapper) => wrapper
            .remove("messages")
            .ok_or_else(|| serde_json::Error::custom("expected a `messages` array"))?,
        bare => bare,
    };
    let messages: Vec<DecodedMessage> = serde_json::from_value(messages)?;
    Ok(DecodedFile::new(messages))
}

/// Read and parse a dump from disk
pub fn load<P: AsRef<Path>>(path: P) -> Result<DecodedFile, IngestError> {
    let path = path.as_ref();
    let unreadable = |reason: String| IngestError::FileUnreadable {
        path: path.display().to_string(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let file = parse_str(&text).map_err(|e| unreadable(e.to_string()))?;

    tracing::debug!(path = %path.display(), messages = file.messages.len(), "Decoded message dump");
    Ok(file)
}
