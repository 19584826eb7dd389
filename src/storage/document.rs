//! Document blobs.
//!
//! Each document is stored as its own JSON file. Metadata fields carry a `_`
//! prefix so they never collide with the document body:
//!
//! ```text
//! {
//!   "_key": "01hx...",
//!   "_version": 2,
//!   "_updated_at": "2024-01-01T00:00:00Z",
//!   "body": { "name": "Alice" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::DocumentKey;

/// A stored document with its bookkeeping metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    /// starts at 1, bumped on every overwrite
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub body: Value,
}

impl Document {
    pub fn new(key: DocumentKey, body: Value) -> Self {
        Self {
            key,
            version: 1,
            updated_at: Utc::now(),
            body,
        }
    }

    /// The next revision of this document carrying `body`.
    pub fn revise(self, body: Value) -> Self {
        Self {
            key: self.key,
            version: self.version + 1,
            updated_at: Utc::now(),
            body,
        }
    }

    /// Look up a top-level field of an object body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_updated_at")]
    updated_at: DateTime<Utc>,
    body: Value,
}

pub(crate) fn encode(document: &Document) -> StorageResult<Vec<u8>> {
    let stored = StoredDocument {
        key: document.key.as_str().to_string(),
        version: document.version,
        updated_at: document.updated_at,
        body: document.body.clone(),
    };
    Ok(serde_json::to_vec_pretty(&stored)?)
}

/// Decode a blob, checking the embedded key against the file it came from.
pub(crate) fn decode(bytes: &[u8], expected: &DocumentKey) -> StorageResult<Document> {
    let stored: StoredDocument = serde_json::from_slice(bytes)?;

    if stored.key != expected.as_str() {
        return Err(StorageError::CorruptedData {
            path: expected.file_name().into(),
            reason: format!(
                "key mismatch: file name says '{}' but content has '{}'",
                expected, stored.key
            ),
        });
    }

    Ok(Document {
        key: expected.clone(),
        version: stored.version,
        updated_at: stored.updated_at,
        body: stored.body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_and_decode() {
        let key = DocumentKey::new("alice").unwrap();
        let doc = Document::new(key.clone(), json!({"name": "Alice", "age": 30}));

        let bytes = encode(&doc).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"_key\": \"alice\""));

        let decoded = decode(&bytes, &key).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.field("age"), Some(&json!(30)));
    }

    #[test]
    fn test_decode_rejects_foreign_key() {
        let doc = Document::new(DocumentKey::new("alice").unwrap(), json!({}));
        let bytes = encode(&doc).unwrap();

        let err = decode(&bytes, &DocumentKey::new("bob").unwrap()).unwrap_err();
        assert!(matches!(err, StorageError::CorruptedData { .. }));
    }

    #[test]
    fn test_revise_bumps_version() {
        let doc = Document::new(DocumentKey::new("k").unwrap(), json!(1));
        let next = doc.revise(json!(2));
        assert_eq!(next.version, 2);
        assert_eq!(next.body, json!(2));
    }
}
