//! Filename decoder
//!
//! Recording files are named `YYYYMMDD_E_P_NAME_COUNT.txt`:
//!
//! | part  | pattern          | meaning                                  |
//! |-------|------------------|------------------------------------------|
//! | date  | 8 digits         | capture date, not calendar-checked       |
//! | E     | 1 digit          | exercise code, see [`Exercise::from_code`] |
//! | P     | `0` or `1`       | sensor position, see [`Position::from_code`] |
//! | NAME  | word characters  | subject                                  |
//! | COUNT | word characters  | recording number for that day            |
//!
//! Matching is anchored at the start only, so anything after the first
//! `.txt` is ignored (`..._07.txt.txt` decodes). The digit groups are ASCII;
//! NAME and COUNT take Unicode word characters (`Jörg`). Since `_` is also
//! the separator, NAME takes as much as it can and COUNT gets what follows
//! the last separator (`Anna_Lee_07` → `Anna_Lee` / `07`).

use crate::error::FormatError;
use crate::models::{Exercise, FileRecordMetadata, Position};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{8})_([0-9])_([01])_(\w+)_(\w+)\.txt")
        .expect("filename pattern is valid")
});

/// Decode a bare filename into its metadata
pub fn decode(filename: &str) -> Result<FileRecordMetadata, FormatError> {
    let format_error = || FormatError {
        filename: filename.to_string(),
    };

    let caps = FILENAME_PATTERN.captures(filename).ok_or_else(format_error)?;

    // Both code groups are a single ASCII digit, so the parses cannot fail
    let exercise_code: u8 = caps[2].parse().map_err(|_| format_error())?;
    let position_code: u8 = caps[3].parse().map_err(|_| format_error())?;

    Ok(FileRecordMetadata {
        date: caps[1].to_string(),
        exercise: Exercise::from_code(exercise_code),
        position: Position::from_code(position_code),
        name: caps[4].to_string(),
        daily_count: caps[5].to_string(),
    })
}

/// Decode the final component of a path
pub fn decode_path(path: &Path) -> Result<FileRecordMetadata, FormatError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FormatError {
            filename: path.to_string_lossy().into_owned(),
        })?;
    decode(filename)
}
