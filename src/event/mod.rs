//! Object-created notification parsing
//!
//! Accepts the S3 event notification document and extracts the bucket and
//! key of the object to process. Keys arrive form-encoded (`+` for space,
//! `%XX` escapes) and are decoded here.

use percent_encoding::percent_decode_str;
use serde::Deserialize;

/// S3 event notification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct S3Event {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3EventRecord {
    #[serde(rename = "eventName", default)]
    pub event_name: Option<String>,
    pub s3: S3Entity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Object {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A bucket/key pair with the key already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl S3Event {
    /// Parse a notification document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The object named by the first record, if any.
    ///
    /// Only one object is processed per invocation; extra records are
    /// logged and ignored.
    pub fn first_object(&self) -> Option<ObjectRef> {
        let record = self.records.first()?;
        if self.records.len() > 1 {
            tracing::warn!(
                records = self.records.len(),
                "Notification carries multiple records, only the first is processed"
            );
        }
        Some(ObjectRef {
            bucket: record.s3.bucket.name.clone(),
            key: decode_object_key(&record.s3.object.key),
        })
    }
}

/// Decode a form-encoded object key.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
