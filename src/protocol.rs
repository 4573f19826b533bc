//! The messages exchanged between the daemon and a page endpoint.
//!
//! Every payload is a JSON object in a websocket text frame, tagged by its
//! `type` field. There is only one kind of payload, "apply this content", and
//! the tag records which way it travels:
//!
//! * `{"type":"update","value":"..."}` goes from the page to the daemon
//! * `{"type":"sync","value":"..."}` goes from the daemon to the page
//!
//! Both sides accept either tag. There are no acknowledgements or sequence
//! numbers; the last message applied wins.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncMessage {
    /// Content edited on the page, to be written to the file.
    Update { value: String },

    /// Content changed on disk, to be applied to the page's field.
    Sync { value: String },
}

impl SyncMessage {
    pub fn update(value: impl Into<String>) -> Self {
        SyncMessage::Update {
            value: value.into(),
        }
    }

    pub fn sync(value: impl Into<String>) -> Self {
        SyncMessage::Sync {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            SyncMessage::Update { value } | SyncMessage::Sync { value } => value,
        }
    }

    pub fn into_value(self) -> String {
        match self {
            SyncMessage::Update { value } | SyncMessage::Sync { value } => value,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing an enum of plain strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(text).map_err(|source| DecodeError::Json {
            preview: preview(text),
            source,
        })
    }

    /// Decodes a binary frame. Some clients send JSON as binary; anything
    /// that isn't UTF-8 is rejected.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8 {
            len: bytes.len(),
        })?;

        Self::decode(text)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed sync message {preview:?}")]
    Json {
        preview: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Binary frame of {len} bytes was not UTF-8")]
    NotUtf8 { len: usize },
}

/// Shortens text for log lines. Cuts on a character boundary.
pub fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 50;

    match text.char_indices().nth(MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_owned(),
    }
}
