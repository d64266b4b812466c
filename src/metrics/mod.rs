//! Metrics module
//!
//! Prometheus counters for compression runs. A single invocation is short
//! lived, so the binary renders the registry to a file on exit instead of
//! serving it.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref OBJECTS_TOTAL: CounterVec = register_counter_vec!(
        "s3gz_objects_total",
        "Objects handled, by outcome",
        &["status"]  // "completed", "empty", "skipped", "failed"
    ).unwrap();

    pub static ref RAW_BYTES_TOTAL: Counter = register_counter!(
        "s3gz_raw_bytes_total",
        "Uncompressed bytes read from source objects"
    ).unwrap();

    pub static ref COMPRESSED_BYTES_TOTAL: Counter = register_counter!(
        "s3gz_compressed_bytes_total",
        "Compressed bytes uploaded"
    ).unwrap();

    pub static ref PARTS_UPLOADED: Counter = register_counter!(
        "s3gz_parts_uploaded_total",
        "Multipart parts uploaded"
    ).unwrap();

    pub static ref PARTS_PER_UPLOAD: Histogram = register_histogram!(
        "s3gz_parts_per_upload",
        "Number of parts per completed multipart upload",
        vec![1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0]
    ).unwrap();

    pub static ref PIPELINE_DURATION: HistogramVec = register_histogram_vec!(
        "s3gz_pipeline_duration_seconds",
        "Time spent processing one object",
        &["status"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    ).unwrap();

    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "s3gz_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record an uploaded part
pub fn record_part_uploaded(bytes: u64) {
    PARTS_UPLOADED.inc();
    COMPRESSED_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record the outcome of one object
pub fn record_object(status: &str, duration_secs: f64) {
    OBJECTS_TOTAL.with_label_values(&[status]).inc();
    PIPELINE_DURATION
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Record a completed upload
pub fn record_upload_completed(raw_bytes: u64, parts: usize) {
    RAW_BYTES_TOTAL.inc_by(raw_bytes as f64);
    PARTS_PER_UPLOAD.observe(parts as f64);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the default registry in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
