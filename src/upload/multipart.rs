//! Multipart upload handler
//!
//! Owns one multipart session at a time: create it, append parts in order,
//! then complete or abort it.

use super::{UploadError, UploadResult};
use crate::metrics;
use crate::s3::{ObjectStore, S3CompletedPart};
use bytes::Bytes;
use std::sync::Arc;

/// Minimum size of a non-final part (5MB) - S3 requirement
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Maximum parts allowed
pub const MAX_PARTS: u32 = 10000;

/// Multipart upload state
#[derive(Debug)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub parts: Vec<CompletedPart>,
    pub bytes_written: u64,
}

impl MultipartUpload {
    /// Number the next part must carry
    pub fn next_part_number(&self) -> u32 {
        self.parts.len() as u32 + 1
    }
}

/// Completed part info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Multipart upload handler
pub struct MultipartHandler {
    store: Arc<dyn ObjectStore>,
}

impl MultipartHandler {
    /// Create a new multipart handler
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Initiate a multipart upload
    #[tracing::instrument(
        name = "upload.multipart.create",
        skip_all,
        fields(s3.bucket = %bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    pub async fn create(&self, bucket: &str, key: &str) -> Result<MultipartUpload, UploadError> {
        let response = self
            .store
            .create_multipart_upload(bucket, key)
            .await
            .map_err(|source| UploadError::Initiation {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source,
            })?;

        tracing::Span::current().record("s3.upload_id", response.upload_id.as_str());
        tracing::info!("Created multipart upload");

        Ok(MultipartUpload {
            upload_id: response.upload_id,
            bucket: bucket.to_string(),
            key: key.to_string(),
            parts: Vec::new(),
            bytes_written: 0,
        })
    }

    /// Upload a part
    ///
    /// Intermediate parts declare their length up front. The final part is
    /// sent without one since it is allowed to fall below the store's
    /// minimum part size.
    #[tracing::instrument(
        name = "upload.multipart.upload_part",
        skip_all,
        fields(
            s3.upload_id = %upload.upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            is_final = is_final
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        upload: &mut MultipartUpload,
        part_number: u32,
        body: Bytes,
        is_final: bool,
    ) -> Result<CompletedPart, UploadError> {
        let expected = upload.next_part_number();
        if part_number != expected || part_number > MAX_PARTS {
            return Err(UploadError::OutOfSequence {
                upload_id: upload.upload_id.clone(),
                reason: format!(
                    "got part {}, expected {} (max {})",
                    part_number, expected, MAX_PARTS
                ),
            });
        }

        if !is_final && body.len() < MIN_PART_SIZE {
            tracing::warn!(
                part_number = part_number,
                size = body.len(),
                "Intermediate part is below the 5MB store minimum"
            );
        }

        let size = body.len() as u64;
        let content_length = if is_final { None } else { Some(size) };

        let response = self
            .store
            .upload_part(
                &upload.bucket,
                &upload.key,
                &upload.upload_id,
                part_number,
                body,
                content_length,
            )
            .await
            .map_err(|source| UploadError::PartUpload {
                upload_id: upload.upload_id.clone(),
                part_number,
                source,
            })?;

        let part = CompletedPart {
            part_number,
            etag: response.etag,
        };
        upload.parts.push(part.clone());
        upload.bytes_written += size;
        metrics::record_part_uploaded(size);

        tracing::info!(size = size, "Uploaded part");

        Ok(part)
    }

    /// Complete a multipart upload
    #[tracing::instrument(
        name = "upload.multipart.complete",
        skip_all,
        fields(s3.upload_id = %upload.upload_id, parts_count = upload.parts.len()),
        err
    )]
    pub async fn complete(&self, upload: &MultipartUpload) -> Result<UploadResult, UploadError> {
        if upload.parts.is_empty() {
            return Err(UploadError::OutOfSequence {
                upload_id: upload.upload_id.clone(),
                reason: "no parts uploaded".into(),
            });
        }

        if let Some((index, part)) = upload
            .parts
            .iter()
            .enumerate()
            .find(|(i, p)| p.part_number != *i as u32 + 1)
        {
            return Err(UploadError::OutOfSequence {
                upload_id: upload.upload_id.clone(),
                reason: format!(
                    "part sequence not contiguous: position {} holds part {}",
                    index + 1,
                    part.part_number
                ),
            });
        }

        let parts = upload
            .parts
            .iter()
            .map(|p| S3CompletedPart {
                part_number: p.part_number,
                etag: p.etag.clone(),
            })
            .collect();

        let response = self
            .store
            .complete_multipart_upload(&upload.bucket, &upload.key, &upload.upload_id, parts)
            .await
            .map_err(|source| UploadError::Completion {
                upload_id: upload.upload_id.clone(),
                source,
            })?;

        tracing::info!(
            parts = upload.parts.len(),
            bytes = upload.bytes_written,
            "Completed multipart upload"
        );

        Ok(UploadResult {
            etag: response.etag,
            parts: upload.parts.len(),
            bytes_written: upload.bytes_written,
        })
    }

    /// Abort a multipart upload, discarding any uploaded parts
    #[tracing::instrument(
        name = "upload.multipart.abort",
        skip_all,
        fields(s3.upload_id = %upload.upload_id),
        err
    )]
    pub async fn abort(&self, upload: &MultipartUpload) -> Result<(), UploadError> {
        self.store
            .abort_multipart_upload(&upload.bucket, &upload.key, &upload.upload_id)
            .await
            .map_err(|source| UploadError::Abort {
                upload_id: upload.upload_id.clone(),
                source,
            })?;

        tracing::info!(parts = upload.parts.len(), "Aborted multipart upload");

        Ok(())
    }
}
