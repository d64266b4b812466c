//! S3 Gzip Compressor Library
//!
//! Compresses a freshly written S3 object with gzip and re-uploads it using
//! multipart upload, without holding the whole object in memory.
//!
//! # Features
//!
//! - **Streaming**: bounded reads, one part of compressed output in memory
//! - **Independent parts**: every part is a complete gzip member
//! - **Idempotent trigger**: objects already ending in `.gz` are skipped
//! - **Clean failures**: open multipart sessions are aborted on error
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use s3_gzip_compressor::config::{EnvSource, StoreConfig, TransferConfig};
//! use s3_gzip_compressor::event::S3Event;
//! use s3_gzip_compressor::pipeline::Pipeline;
//! use s3_gzip_compressor::s3::S3Client;
//! use s3_gzip_compressor::telemetry::InvocationContext;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let event = S3Event::from_json(&std::fs::read_to_string("event.json")?)?;
//!     let store = S3Client::from_config(&StoreConfig::default()).await;
//!     let pipeline = Pipeline::new(Arc::new(store), TransferConfig::from_source(&EnvSource));
//!     let content_type = pipeline
//!         .handle_event(&event, &InvocationContext::generate())
//!         .await?;
//!     println!("{:?}", content_type);
//!     Ok(())
//! }
//! ```

pub mod compress;
pub mod config;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod s3;
pub mod telemetry;
pub mod upload;

// Re-export commonly used types
pub use config::{Config, TransferConfig};
pub use pipeline::{Pipeline, PipelineError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
