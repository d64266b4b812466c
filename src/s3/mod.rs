//! Object store module
//!
//! Defines the [`ObjectStore`] capability the pipeline consumes and an
//! S3 implementation on top of `aws-sdk-s3`.
//!
//! # Tracing
//!
//! Every store call creates a span:
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | HeadObject | `s3.head_object` | bucket, key, content_type |
//! | GetObject | `s3.get_object` | bucket, key, content_length |
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | bucket, upload_id, part_number, bytes, etag |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | bucket, upload_id, parts_count, etag |
//! | AbortMultipartUpload | `s3.abort_multipart_upload` | bucket, upload_id |
//! | DeleteObject | `s3.delete_object` | bucket, key |

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::config::StoreConfig;

/// Content type set on compressed objects
pub const GZIP_CONTENT_TYPE: &str = "application/gzip";

/// Object store errors
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Response error: {0}")]
    ResponseError(String),
}

impl S3ClientError {
    fn request<E>(err: E) -> Self
    where
        E: std::error::Error,
    {
        S3ClientError::RequestError(DisplayErrorContext(err).to_string())
    }
}

/// Streaming object body
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// HeadObject response
#[derive(Debug, Clone, Default)]
pub struct S3HeadObjectResponse {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// CreateMultipartUpload response
#[derive(Debug, Clone)]
pub struct S3CreateMultipartUploadResponse {
    pub upload_id: String,
}

/// UploadPart response
#[derive(Debug, Clone)]
pub struct S3UploadPartResponse {
    pub etag: String,
}

/// CompleteMultipartUpload response
#[derive(Debug, Clone)]
pub struct S3CompleteMultipartUploadResponse {
    pub etag: Option<String>,
}

/// Part reference passed to CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Store operations used by the pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head_object(&self, bucket: &str, key: &str)
        -> Result<S3HeadObjectResponse, S3ClientError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3ClientError>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<S3CreateMultipartUploadResponse, S3ClientError>;

    /// `content_length` is declared up front when present; `None` leaves the
    /// length to the transport.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        content_length: Option<u64>,
    ) -> Result<S3UploadPartResponse, S3ClientError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<S3CompletedPart>,
    ) -> Result<S3CompleteMultipartUploadResponse, S3ClientError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError>;
}

/// S3 client
#[derive(Debug, Clone)]
pub struct S3Client {
    client: aws_sdk_s3::Client,
}

impl S3Client {
    /// Build a client from store settings.
    ///
    /// Unset fields fall back to the AWS default provider chain.
    pub async fn from_config(config: &StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(ref region) = config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "s3-gzip-compressor",
            ));
        }

        let sdk_config = loader.load().await;
        let client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&sdk_config)
                .force_path_style(config.force_path_style)
                .build(),
        );

        Self { client }
    }

    /// Wrap an already configured SDK client
    pub fn from_sdk_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    #[tracing::instrument(
        name = "s3.head_object",
        skip_all,
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.content_type = tracing::field::Empty
        ),
        err
    )]
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<S3HeadObjectResponse, S3ClientError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(S3ClientError::request)?;

        let content_type = output.content_type;
        if let Some(ref ct) = content_type {
            tracing::Span::current().record("s3.content_type", ct.as_str());
        }

        Ok(S3HeadObjectResponse {
            content_type,
            content_length: output.content_length.and_then(|len| u64::try_from(len).ok()),
        })
    }

    #[tracing::instrument(
        name = "s3.get_object",
        skip_all,
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.content_length = tracing::field::Empty
        ),
        err
    )]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3ClientError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(S3ClientError::request)?;

        if let Some(len) = output.content_length {
            tracing::Span::current().record("s3.content_length", len);
        }

        Ok(Box::pin(output.body.into_async_read()))
    }

    #[tracing::instrument(
        name = "s3.create_multipart_upload",
        skip_all,
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<S3CreateMultipartUploadResponse, S3ClientError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(GZIP_CONTENT_TYPE)
            .send()
            .await
            .map_err(S3ClientError::request)?;

        let upload_id = output.upload_id.ok_or_else(|| {
            S3ClientError::ResponseError("CreateMultipartUpload response missing UploadId".into())
        })?;
        tracing::Span::current().record("s3.upload_id", upload_id.as_str());

        Ok(S3CreateMultipartUploadResponse { upload_id })
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip_all,
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        content_length: Option<u64>,
    ) -> Result<S3UploadPartResponse, S3ClientError> {
        let part_number = i32::try_from(part_number).map_err(|_| {
            S3ClientError::RequestError(format!("Part number {} out of range", part_number))
        })?;

        let mut request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body));

        if let Some(len) = content_length {
            let len = i64::try_from(len).map_err(|_| {
                S3ClientError::RequestError(format!("Content length {} out of range", len))
            })?;
            request = request.content_length(len);
        }

        let output = request.send().await.map_err(S3ClientError::request)?;
        let etag = output.e_tag.ok_or_else(|| {
            S3ClientError::ResponseError("UploadPart response missing ETag".into())
        })?;
        tracing::Span::current().record("s3.etag", etag.as_str());

        Ok(S3UploadPartResponse { etag })
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip_all,
        fields(
            s3.bucket = %bucket,
            s3.upload_id = %upload_id,
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<S3CompletedPart>,
    ) -> Result<S3CompleteMultipartUploadResponse, S3ClientError> {
        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            let part_number = i32::try_from(part.part_number).map_err(|_| {
                let message = format!("Part number {} out of range", part.part_number);
                S3ClientError::RequestError(message)
            })?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part.etag)
                    .build(),
            );
        }

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(S3ClientError::request)?;

        if let Some(ref etag) = output.e_tag {
            tracing::Span::current().record("s3.etag", etag.as_str());
        }

        Ok(S3CompleteMultipartUploadResponse { etag: output.e_tag })
    }

    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip_all,
        fields(s3.bucket = %bucket, s3.upload_id = %upload_id),
        err
    )]
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(S3ClientError::request)?;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.delete_object",
        skip_all,
        fields(s3.bucket = %bucket, s3.key = %key),
        err
    )]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(S3ClientError::request)?;
        Ok(())
    }
}
