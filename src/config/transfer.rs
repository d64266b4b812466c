//! Per-invocation transfer settings
//!
//! Resolved once from a [`ConfigSource`] at the start of an invocation and
//! passed into the pipeline by value.

use std::collections::HashMap;

/// One mebibyte
pub const MB: usize = 1024 * 1024;

pub const DEFAULT_FILE_PART_READ_SIZE_MB: usize = 100;
pub const MIN_FILE_PART_READ_SIZE_MB: usize = 5;
/// The read buffer is allocated up front, so it gets a ceiling too
pub const MAX_FILE_PART_READ_SIZE_MB: usize = 4096;

pub const DEFAULT_MINIMUM_UPLOAD_SIZE_MB: usize = 100;
/// S3 rejects non-final parts below 5 MiB
pub const MIN_MINIMUM_UPLOAD_SIZE_MB: usize = 5;
pub const MAX_MINIMUM_UPLOAD_SIZE_MB: usize = 4096;

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

const FILE_PART_READ_SIZE_MB: &str = "FilePartReadSizeMB";
const MINIMUM_UPLOAD_SIZE_MB: &str = "MinimumUploadSizeMB";
const OUTPUT_BUCKET: &str = "OutputBucket";
const OUTPUT_FOLDER_PATH: &str = "OutputFolderPath";
const FLATTEN_FILE_PATHS: &str = "FlattenFilePaths";
const DELETE_INITIAL_FILE: &str = "DeleteInitialFileAfterCompression";
const ABORT_ON_FAILURE: &str = "AbortOnFailure";
const COMPRESSION_LEVEL: &str = "CompressionLevel";

/// A named key/value lookup that configuration is resolved from
pub trait ConfigSource {
    fn get(&self, name: &str) -> Option<String>;
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Looks a name up in `primary` first, then `fallback`.
#[derive(Debug, Clone)]
pub struct LayeredSource<P, F> {
    primary: P,
    fallback: F,
}

impl<P: ConfigSource, F: ConfigSource> LayeredSource<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: ConfigSource, F: ConfigSource> ConfigSource for LayeredSource<P, F> {
    fn get(&self, name: &str) -> Option<String> {
        self.primary.get(name).or_else(|| self.fallback.get(name))
    }
}

/// Transfer settings for one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Raw bytes pulled from the source per read cycle
    pub file_part_read_size: usize,
    /// Compressed bytes accumulated before a part is uploaded
    pub minimum_upload_size: usize,
    /// `None` writes to the source bucket
    pub output_bucket: Option<String>,
    /// Normalized: no leading `/`, exactly one trailing `/`
    pub output_folder_path: Option<String>,
    pub flatten_file_paths: bool,
    pub delete_initial_file_after_compression: bool,
    /// Abort the multipart session when the pipeline fails mid-upload
    pub abort_on_failure: bool,
    /// gzip level, 0-9
    pub compression_level: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            file_part_read_size: DEFAULT_FILE_PART_READ_SIZE_MB * MB,
            minimum_upload_size: DEFAULT_MINIMUM_UPLOAD_SIZE_MB * MB,
            output_bucket: None,
            output_folder_path: None,
            flatten_file_paths: false,
            delete_initial_file_after_compression: false,
            abort_on_failure: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl TransferConfig {
    /// Resolve settings from `source`.
    ///
    /// Never fails: unparsable values are logged and replaced by defaults,
    /// numeric values are clamped into their allowed ranges.
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        let read_size_mb = clamp_setting(
            FILE_PART_READ_SIZE_MB,
            read_integer(source, FILE_PART_READ_SIZE_MB, DEFAULT_FILE_PART_READ_SIZE_MB),
            MIN_FILE_PART_READ_SIZE_MB,
            MAX_FILE_PART_READ_SIZE_MB,
        );
        let upload_size_mb = clamp_setting(
            MINIMUM_UPLOAD_SIZE_MB,
            read_integer(source, MINIMUM_UPLOAD_SIZE_MB, DEFAULT_MINIMUM_UPLOAD_SIZE_MB),
            MIN_MINIMUM_UPLOAD_SIZE_MB,
            MAX_MINIMUM_UPLOAD_SIZE_MB,
        );
        let level = clamp_setting(
            COMPRESSION_LEVEL,
            read_integer(source, COMPRESSION_LEVEL, DEFAULT_COMPRESSION_LEVEL as usize),
            0,
            MAX_COMPRESSION_LEVEL as usize,
        );

        Self {
            file_part_read_size: read_size_mb * MB,
            minimum_upload_size: upload_size_mb * MB,
            output_bucket: read_string(source, OUTPUT_BUCKET),
            output_folder_path: read_string(source, OUTPUT_FOLDER_PATH)
                .and_then(|path| normalize_folder_path(&path)),
            flatten_file_paths: read_bool(source, FLATTEN_FILE_PATHS, false),
            delete_initial_file_after_compression: read_bool(source, DELETE_INITIAL_FILE, false),
            abort_on_failure: read_bool(source, ABORT_ON_FAILURE, true),
            compression_level: level as u32,
        }
    }
}

/// Strip leading separators and force exactly one trailing separator.
///
/// Returns `None` when nothing but separators and whitespace remain.
pub(crate) fn normalize_folder_path(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{}/", trimmed))
    }
}

fn read_string(source: &dyn ConfigSource, name: &str) -> Option<String> {
    source
        .get(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Signed so that negative sizes reach the clamp instead of the default.
fn read_integer(source: &dyn ConfigSource, name: &str, default: usize) -> i64 {
    let fallback = i64::try_from(default).unwrap_or(i64::MAX);
    let Some(raw) = read_string(source, name) else {
        return fallback;
    };
    match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(
                variable = name,
                value = %raw,
                default = default,
                "Invalid integer, using default"
            );
            fallback
        }
    }
}

fn read_bool(source: &dyn ConfigSource, name: &str, default: bool) -> bool {
    let Some(raw) = read_string(source, name) else {
        return default;
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            tracing::warn!(
                variable = name,
                value = %raw,
                default = default,
                "Invalid boolean, using default"
            );
            default
        }
    }
}

fn clamp_setting(name: &str, value: i64, min: usize, max: usize) -> usize {
    let clamped = if value < 0 {
        min
    } else {
        usize::try_from(value).unwrap_or(max).clamp(min, max)
    };
    if i64::try_from(clamped).ok() != Some(value) {
        tracing::warn!(variable = name, value, clamped, "Value out of range, clamped");
    }
    clamped
}
