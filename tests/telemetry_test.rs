//! Integration tests for subscriber setup
//!
//! Installing the global subscriber is process-wide, so these live in their
//! own test binary.

use s3_gzip_compressor::telemetry::{init_subscriber, LogFormat, TelemetryError};

/// Only the first install succeeds; the second reports `SubscriberInit`
#[test]
fn test_init_subscriber_twice() {
    let first = init_subscriber("info", LogFormat::Pretty);
    assert!(first.is_ok());

    let second = init_subscriber("debug", LogFormat::Json);
    assert!(matches!(second, Err(TelemetryError::SubscriberInit(_))));
}
