//! Common Test Infrastructure
//!
//! In-memory object store that records every call and can be told to fail
//! specific operations.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use s3_gzip_compressor::s3::{
    ObjectReader, ObjectStore, S3ClientError, S3CompleteMultipartUploadResponse,
    S3CompletedPart, S3CreateMultipartUploadResponse, S3HeadObjectResponse, S3UploadPartResponse,
};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;

/// Calls observed by the store, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head,
    Get,
    Create { bucket: String, key: String },
    UploadPart { part_number: u32, size: usize, declared: Option<u64> },
    Complete { parts: Vec<u32> },
    Abort,
    Delete { bucket: String, key: String },
}

/// A finished multipart upload
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub bucket: String,
    pub key: String,
    pub parts: Vec<Bytes>,
}

#[derive(Default)]
struct State {
    objects: HashMap<(String, String), (Bytes, Option<String>)>,
    next_upload: u32,
    pending: HashMap<String, (String, String, Vec<(u32, Bytes)>)>,
    completed: Vec<StoredUpload>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    /// Reads are served in slices of this size to simulate short reads
    pub read_slice: Option<usize>,
    pub fail_create: bool,
    pub fail_part: Option<u32>,
    pub fail_complete: bool,
    pub fail_delete: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str) -> Self {
        self.state.lock().unwrap().objects.insert(
            (bucket.to_string(), key.to_string()),
            (Bytes::from(data), Some(content_type.to_string())),
        );
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn completed(&self) -> Vec<StoredUpload> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn uploaded_part_sizes(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::UploadPart { size, .. } => Some(size),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Decode a multi-member gzip payload
pub fn gunzip_all(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    flate2::read::MultiGzDecoder::new(bytes)
        .read_to_end(&mut out)
        .unwrap();
    out
}

/// Deterministic incompressible bytes
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    use rand::{RngCore, SeedableRng};
    let mut data = vec![0u8; len];
    rand::rngs::StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

/// Reader that hands out at most `slice` bytes per poll
struct SlicedReader {
    data: Bytes,
    slice: usize,
}

impl tokio::io::AsyncRead for SlicedReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let n = self.data.len().min(self.slice).min(buf.remaining());
        let chunk = self.data.split_to(n);
        buf.put_slice(&chunk);
        std::task::Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<S3HeadObjectResponse, S3ClientError> {
        self.record(Call::Head);
        let state = self.state.lock().unwrap();
        let (data, content_type) = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| S3ClientError::ResponseError("NoSuchKey".into()))?;
        Ok(S3HeadObjectResponse {
            content_type: content_type.clone(),
            content_length: Some(data.len() as u64),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, S3ClientError> {
        self.record(Call::Get);
        let data = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| S3ClientError::ResponseError("NoSuchKey".into()))?;
        let slice = self.read_slice.unwrap_or(usize::MAX).max(1);
        Ok(Box::pin(SlicedReader { data, slice }))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<S3CreateMultipartUploadResponse, S3ClientError> {
        self.record(Call::Create {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if self.fail_create {
            return Err(S3ClientError::RequestError("AccessDenied".into()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.pending.insert(
            upload_id.clone(),
            (bucket.to_string(), key.to_string(), Vec::new()),
        );
        Ok(S3CreateMultipartUploadResponse { upload_id })
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        content_length: Option<u64>,
    ) -> Result<S3UploadPartResponse, S3ClientError> {
        self.record(Call::UploadPart {
            part_number,
            size: body.len(),
            declared: content_length,
        });
        if self.fail_part == Some(part_number) {
            return Err(S3ClientError::RequestError("connection reset".into()));
        }
        let mut state = self.state.lock().unwrap();
        let pending = state
            .pending
            .get_mut(upload_id)
            .ok_or_else(|| S3ClientError::ResponseError("NoSuchUpload".into()))?;
        pending.2.push((part_number, body));
        Ok(S3UploadPartResponse {
            etag: format!("\"etag-{}\"", part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<S3CompletedPart>,
    ) -> Result<S3CompleteMultipartUploadResponse, S3ClientError> {
        self.record(Call::Complete {
            parts: parts.iter().map(|p| p.part_number).collect(),
        });
        if self.fail_complete {
            return Err(S3ClientError::RequestError("InvalidPart".into()));
        }
        let mut state = self.state.lock().unwrap();
        let (bucket, key, mut uploaded) = state
            .pending
            .remove(upload_id)
            .ok_or_else(|| S3ClientError::ResponseError("NoSuchUpload".into()))?;
        uploaded.sort_by_key(|(n, _)| *n);
        let parts: Vec<Bytes> = uploaded.into_iter().map(|(_, body)| body).collect();
        let joined: Vec<u8> = parts.iter().flat_map(|p| p.iter().copied()).collect();
        state.objects.insert(
            (bucket.clone(), key.clone()),
            (Bytes::from(joined), Some("application/gzip".into())),
        );
        state.completed.push(StoredUpload { bucket, key, parts });
        Ok(S3CompleteMultipartUploadResponse {
            etag: Some(format!("\"final-{}\"", upload_id)),
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError> {
        self.record(Call::Abort);
        self.state.lock().unwrap().pending.remove(upload_id);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), S3ClientError> {
        self.record(Call::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if self.fail_delete {
            return Err(S3ClientError::RequestError("AccessDenied".into()));
        }
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
