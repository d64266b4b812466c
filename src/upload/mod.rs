//! Upload module
//!
//! Multipart upload orchestration for compressed output.

use thiserror::Error;

use crate::s3::S3ClientError;

pub mod multipart;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to initiate multipart upload for {bucket}/{key}: {source}")]
    Initiation {
        bucket: String,
        key: String,
        #[source]
        source: S3ClientError,
    },

    #[error("Failed to upload part {part_number} of {upload_id}: {source}")]
    PartUpload {
        upload_id: String,
        part_number: u32,
        #[source]
        source: S3ClientError,
    },

    #[error("Failed to complete multipart upload {upload_id}: {source}")]
    Completion {
        upload_id: String,
        #[source]
        source: S3ClientError,
    },

    /// Rejected locally before reaching the store
    #[error("Multipart upload {upload_id} out of sequence: {reason}")]
    OutOfSequence { upload_id: String, reason: String },

    #[error("Failed to abort multipart upload {upload_id}: {source}")]
    Abort {
        upload_id: String,
        #[source]
        source: S3ClientError,
    },
}

/// Result of a completed multipart upload
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub etag: Option<String>,
    pub parts: usize,
    pub bytes_written: u64,
}
