//! Compression pipeline
//!
//! Drives one object from notification to compressed copy:
//!
//! ```text
//! HeadObject ──► already .gz? ──yes──► Skipped
//!                    │ no
//!                    ▼
//!    GetObject ──► fill_part ──► UploadPart ──┐
//!                    ▲                        │ not final
//!                    └────────────────────────┘
//!                    │ final
//!                    ▼
//!          CompleteMultipartUpload ──► (delete source)
//! ```
//!
//! The multipart session is only created once the first compressed bytes
//! exist, so an empty source never touches the multipart API.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::Instrument;

use crate::compress::{CompressionBuffer, COMPRESSED_SUFFIX};
use crate::config::TransferConfig;
use crate::event::{ObjectRef, S3Event};
use crate::metrics;
use crate::s3::ObjectStore;
use crate::telemetry::InvocationContext;
use crate::upload::multipart::{MultipartHandler, MultipartUpload};
use crate::upload::{UploadError, UploadResult};

pub mod key;

pub use key::{derive_output_location, OutputLocation};

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to read source object {bucket}/{key}: {source}")]
    SourceRead {
        bucket: String,
        key: String,
        /// Store error from Head/Get, or the stream's I/O error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Invalid notification: {0}")]
    InvalidEvent(#[from] serde_json::Error),
}

impl PipelineError {
    fn source_read<E>(object: &ObjectRef, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PipelineError::SourceRead {
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            source: Box::new(cause),
        }
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceRead { .. } => "source_read",
            PipelineError::Upload(UploadError::Initiation { .. }) => "upload_initiation",
            PipelineError::Upload(UploadError::PartUpload { .. }) => "part_upload",
            PipelineError::Upload(UploadError::Completion { .. }) => "upload_completion",
            PipelineError::Upload(UploadError::Abort { .. }) => "upload_abort",
            PipelineError::Upload(UploadError::OutOfSequence { .. }) => "upload_sequence",
            PipelineError::InvalidEvent(_) => "invalid_event",
        }
    }
}

/// Driver states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Skipped,
    Streaming,
    FlushingFinal,
    Completed,
    Failed,
}

/// What happened to one object
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The key already carries the compressed suffix
    Skipped,
    Completed(CompletionReport),
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub output: OutputLocation,
    /// Zero when the source was empty and nothing was written
    pub parts: usize,
    pub raw_bytes: u64,
    pub compressed_bytes: u64,
    pub etag: Option<String>,
    pub source_deleted: bool,
    /// Set when deleting the source failed after a successful upload
    pub delete_error: Option<String>,
}

/// Result of processing one object
#[derive(Debug, Clone)]
pub struct ObjectResult {
    /// Content type of the source object
    pub content_type: Option<String>,
    pub outcome: ProcessOutcome,
}

/// Compression pipeline
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    uploader: MultipartHandler,
    config: TransferConfig,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ObjectStore>, config: TransferConfig) -> Self {
        Self {
            uploader: MultipartHandler::new(Arc::clone(&store)),
            store,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Handle a notification.
    ///
    /// Returns the source object's content type, or `None` when the
    /// notification carries no record.
    pub async fn handle_event(
        &self,
        event: &S3Event,
        ctx: &InvocationContext,
    ) -> Result<Option<String>, PipelineError> {
        let Some(object) = ctx.span().in_scope(|| event.first_object()) else {
            tracing::info!(
                parent: ctx.span(),
                "Notification carries no object record, nothing to do"
            );
            return Ok(None);
        };

        let result = self.process_object(&object, ctx).await?;
        Ok(result.content_type)
    }

    /// Compress one object.
    ///
    /// Errors are logged with the request id and source identifiers, then
    /// returned unchanged; no retry happens here.
    pub async fn process_object(
        &self,
        source: &ObjectRef,
        ctx: &InvocationContext,
    ) -> Result<ObjectResult, PipelineError> {
        let start = Instant::now();
        let result = self.run(source).instrument(ctx.span().clone()).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(object) => {
                let status = match &object.outcome {
                    ProcessOutcome::Skipped => "skipped",
                    ProcessOutcome::Completed(report) if report.parts == 0 => "empty",
                    ProcessOutcome::Completed(_) => "completed",
                };
                metrics::record_object(status, elapsed);
            }
            Err(e) => {
                metrics::record_object("failed", elapsed);
                metrics::record_error(e.kind());
                tracing::error!(
                    parent: ctx.span(),
                    request_id = %ctx.request_id(),
                    s3.bucket = %source.bucket,
                    s3.key = %source.key,
                    state = ?PipelineState::Failed,
                    error = %e,
                    "Compression failed"
                );
            }
        }

        result
    }

    async fn run(&self, source: &ObjectRef) -> Result<ObjectResult, PipelineError> {
        let head = self
            .store
            .head_object(&source.bucket, &source.key)
            .await
            .map_err(|e| PipelineError::source_read(source, e))?;
        let content_type = head.content_type;

        if source.key.ends_with(COMPRESSED_SUFFIX) {
            tracing::info!(
                s3.bucket = %source.bucket,
                s3.key = %source.key,
                state = ?PipelineState::Skipped,
                "Object is already compressed, skipping"
            );
            return Ok(ObjectResult {
                content_type,
                outcome: ProcessOutcome::Skipped,
            });
        }

        let output = derive_output_location(&source.bucket, &source.key, &self.config);
        tracing::info!(
            source_bucket = %source.bucket,
            source_key = %source.key,
            output_bucket = %output.bucket,
            output_key = %output.key,
            size = ?head.content_length,
            "Compressing object"
        );

        let reader = self
            .store
            .get_object(&source.bucket, &source.key)
            .await
            .map_err(|e| PipelineError::source_read(source, e))?;
        let mut buffer = CompressionBuffer::new(
            reader,
            self.config.file_part_read_size,
            self.config.minimum_upload_size,
            self.config.compression_level,
        );

        let mut session: Option<MultipartUpload> = None;
        let mut raw_bytes = 0u64;
        let transferred = self
            .transfer(source, &output, &mut buffer, &mut session, &mut raw_bytes)
            .await;

        let upload = match transferred {
            Ok(upload) => upload,
            Err(e) => {
                if let Some(ref session) = session {
                    self.abandon(session).await;
                }
                return Err(e);
            }
        };

        let mut report = CompletionReport {
            output,
            parts: 0,
            raw_bytes,
            compressed_bytes: 0,
            etag: None,
            source_deleted: false,
            delete_error: None,
        };

        match upload {
            Some(result) => {
                report.parts = result.parts;
                report.compressed_bytes = result.bytes_written;
                report.etag = result.etag;
                metrics::record_upload_completed(raw_bytes, result.parts);

                if self.config.delete_initial_file_after_compression {
                    self.delete_source(source, &mut report).await;
                }
            }
            None => {
                tracing::info!(
                    s3.bucket = %source.bucket,
                    s3.key = %source.key,
                    "Source object is empty, nothing uploaded"
                );
            }
        }

        tracing::info!(
            state = ?PipelineState::Completed,
            parts = report.parts,
            raw_bytes = report.raw_bytes,
            compressed_bytes = report.compressed_bytes,
            "Compression completed"
        );

        Ok(ObjectResult {
            content_type,
            outcome: ProcessOutcome::Completed(report),
        })
    }

    /// Read, compress and upload until the source is exhausted, then
    /// complete the session. Returns `None` when nothing was written.
    async fn transfer<R: AsyncRead + Unpin>(
        &self,
        source: &ObjectRef,
        output: &OutputLocation,
        buffer: &mut CompressionBuffer<R>,
        session: &mut Option<MultipartUpload>,
        raw_bytes: &mut u64,
    ) -> Result<Option<UploadResult>, PipelineError> {
        let mut state = PipelineState::Streaming;

        loop {
            let part = buffer
                .fill_part()
                .await
                .map_err(|e| PipelineError::source_read(source, e))?;
            *raw_bytes += part.raw_bytes;

            if part.is_final {
                transition(&mut state, PipelineState::FlushingFinal);
            }

            if !part.is_empty() {
                if session.is_none() {
                    *session = Some(self.uploader.create(&output.bucket, &output.key).await?);
                }
                if let Some(upload) = session.as_mut() {
                    let part_number = upload.next_part_number();
                    self.uploader
                        .upload_part(upload, part_number, part.bytes, part.is_final)
                        .await?;
                }
            }

            if part.is_final {
                let result = match session.as_ref() {
                    Some(upload) => Some(self.uploader.complete(upload).await?),
                    None => None,
                };
                transition(&mut state, PipelineState::Completed);
                return Ok(result);
            }
        }
    }

    /// Best-effort cleanup of a session left open by a failure
    async fn abandon(&self, session: &MultipartUpload) {
        if !self.config.abort_on_failure {
            tracing::warn!(
                upload_id = %session.upload_id,
                parts = session.parts.len(),
                "Leaving multipart upload open after failure"
            );
            return;
        }

        if let Err(e) = self.uploader.abort(session).await {
            metrics::record_error("upload_abort");
            tracing::error!(
                upload_id = %session.upload_id,
                error = %e,
                "Failed to abort multipart upload after failure"
            );
        }
    }

    async fn delete_source(&self, source: &ObjectRef, report: &mut CompletionReport) {
        match self
            .store
            .delete_object(&source.bucket, &source.key)
            .await
        {
            Ok(()) => {
                report.source_deleted = true;
                tracing::info!(
                    s3.bucket = %source.bucket,
                    s3.key = %source.key,
                    "Deleted source object"
                );
            }
            Err(e) => {
                metrics::record_error("delete");
                tracing::error!(
                    s3.bucket = %source.bucket,
                    s3.key = %source.key,
                    error = %e,
                    "Failed to delete source object after compression"
                );
                report.delete_error = Some(e.to_string());
            }
        }
    }
}

/// Parse a notification document, counting malformed input as an error
pub fn parse_event(json: &str) -> Result<S3Event, PipelineError> {
    S3Event::from_json(json).map_err(|e| {
        metrics::record_error("invalid_event");
        PipelineError::InvalidEvent(e)
    })
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    if *state != next {
        tracing::debug!(from = ?state, to = ?next, "Pipeline state change");
        *state = next;
    }
}
