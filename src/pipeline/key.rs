//! Output key derivation

use crate::compress::COMPRESSED_SUFFIX;
use crate::config::TransferConfig;

/// Where compressed output is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLocation {
    pub bucket: String,
    pub key: String,
}

/// Map a source object to its compressed destination.
///
/// Flattening strips only the first path segment of the suffixed key
/// (`a/b/c.txt` becomes `b/c.txt.gz`); a key without a separator is kept as
/// is. The configured folder, already normalized, is prepended.
pub fn derive_output_location(
    input_bucket: &str,
    input_key: &str,
    config: &TransferConfig,
) -> OutputLocation {
    let suffixed = format!("{}{}", input_key, COMPRESSED_SUFFIX);

    let relative = if config.flatten_file_paths {
        match suffixed.split_once('/') {
            Some((_, rest)) => rest,
            None => suffixed.as_str(),
        }
    } else {
        suffixed.as_str()
    };

    let key = match config.output_folder_path {
        Some(ref folder) => format!("{}{}", folder, relative),
        None => relative.to_string(),
    };

    OutputLocation {
        bucket: config
            .output_bucket
            .clone()
            .unwrap_or_else(|| input_bucket.to_string()),
        key,
    }
}
