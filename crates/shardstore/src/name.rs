//! File name cleaning applied before routing.

use crate::error::{Result, StoreError};

/// Normalizes a client-supplied file name into a single path segment.
///
/// Backslashes are treated as separators, and `.` and empty segments are
/// dropped. Any `..` segment is rejected. The result must be a single
/// non-empty segment without NUL bytes.
pub fn clean_name(raw: &str) -> Result<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(StoreError::InvalidName(raw.to_string())),
            other => segments.push(other),
        }
    }
    match segments.as_slice() {
        [name] if !name.contains('\0') => Ok((*name).to_string()),
        _ => Err(StoreError::InvalidName(raw.to_string())),
    }
}
