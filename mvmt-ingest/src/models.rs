//! Data model: decoded file metadata and per-run results

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag keys attached to every decoded object, in column order
pub const TAG_KEYS: [&str; 5] = ["date", "exercise", "position", "name", "daily_count"];

/// Exercise recorded in a file, decoded from a single-digit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exercise {
    Walk,
    Squat,
    SitUps,
    BizepsCurl,
    PushUp,
    Unknown,
}

impl Exercise {
    /// Codes 0-4 are known; every other code is `Unknown`
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Exercise::Walk,
            1 => Exercise::Squat,
            2 => Exercise::SitUps,
            3 => Exercise::BizepsCurl,
            4 => Exercise::PushUp,
            _ => Exercise::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Exercise::Walk => "Walk",
            Exercise::Squat => "Squat",
            Exercise::SitUps => "Sit-Ups",
            Exercise::BizepsCurl => "Bizeps Curl",
            Exercise::PushUp => "Push-Up",
            Exercise::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Exercise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sensor placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Pocket,
    Wrist,
    Unknown,
}

impl Position {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Position::Pocket,
            1 => Position::Wrist,
            _ => Position::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Pocket => "Pocket",
            Position::Wrist => "Wrist",
            Position::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata decoded from one filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordMetadata {
    /// YYYYMMDD, kept verbatim
    pub date: String,
    pub exercise: Exercise,
    pub position: Position,
    pub name: String,
    pub daily_count: String,
}

impl FileRecordMetadata {
    /// Tag set for the remote object, keyed by [`TAG_KEYS`]
    pub fn tags(&self) -> BTreeMap<String, String> {
        TAG_KEYS
            .iter()
            .map(|k| (k.to_string(), self.field(k).unwrap_or_default().to_string()))
            .collect()
    }

    /// Column values in [`TAG_KEYS`] order
    pub fn values(&self) -> [&str; 5] {
        [
            &self.date,
            self.exercise.as_str(),
            self.position.as_str(),
            &self.name,
            &self.daily_count,
        ]
    }

    fn field(&self, key: &str) -> Option<&str> {
        match key {
            "date" => Some(&self.date),
            "exercise" => Some(self.exercise.as_str()),
            "position" => Some(self.position.as_str()),
            "name" => Some(&self.name),
            "daily_count" => Some(&self.daily_count),
            _ => None,
        }
    }
}

/// Terminal state of one file in an ingestion run
///
/// `Discovered → AlreadyRemote`, or
/// `Discovered → Uploading → Uploaded → Tagged | TagFailed`, or
/// `Uploading → UploadFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileOutcome {
    /// Object with this name already in the store; untouched
    AlreadyRemote,
    /// Uploaded and tagged
    Tagged,
    /// Uploaded, tags not applied (undecodable name or tag update failure)
    TagFailed,
    /// Upload did not happen (or existence check failed)
    UploadFailed,
}

impl FileOutcome {
    pub fn was_uploaded(&self) -> bool {
        matches!(self, FileOutcome::Tagged | FileOutcome::TagFailed)
    }
}

/// Result for one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub name: String,
    pub outcome: FileOutcome,
    /// Error code when the outcome is a failure
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Summary of one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
    /// Dataset version registered at the end of the run
    pub dataset: crate::catalog::DatasetVersion,
}

impl FileReport {
    pub fn new(name: impl Into<String>, outcome: FileOutcome) -> Self {
        Self {
            name: name.into(),
            outcome,
            error_code: None,
            error_message: None,
        }
    }

    /// Terminal state reached because of `error`
    pub fn with_error(name: impl Into<String>, outcome: FileOutcome, error: &IngestError) -> Self {
        Self {
            name: name.into(),
            outcome,
            error_code: Some(error.code().to_string()),
            error_message: Some(error.to_string()),
        }
    }
}

impl IngestReport {
    pub fn considered(&self) -> usize {
        self.files.len()
    }

    pub fn tagged(&self) -> usize {
        self.count(FileOutcome::Tagged)
    }

    pub fn already_remote(&self) -> usize {
        self.count(FileOutcome::AlreadyRemote)
    }

    /// Files that ended in `TagFailed` or `UploadFailed`
    pub fn failed(&self) -> usize {
        self.files.iter().filter(|f| f.error_code.is_some()).count()
    }

    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.files.iter().filter(|f| f.outcome == outcome).count()
    }

    pub fn uploaded(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.was_uploaded()).count()
    }

    pub fn outcome_of(&self, name: &str) -> Option<FileOutcome> {
        self.files.iter().find(|f| f.name == name).map(|f| f.outcome)
    }
}
