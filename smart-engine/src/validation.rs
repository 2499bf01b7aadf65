//! Upload validation
//!
//! Turns raw upload bytes into [`DataRow`]s, or explains why it cannot. Runs
//! before ingestion and touches nothing persistent.

use crate::db::data::DataRow;
use std::collections::BTreeSet;
use thiserror::Error;

/// Header every upload must carry, in this order
pub const REQUIRED_HEADER: [&str; 2] = ["Text", "Label"];

const CSV_TYPE: &str = "text/csv";
const TSV_TYPE: &str = "text/tab-separated-values";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file is too large: received {size} bytes but max size is {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("file type {0} is not supported; use text/csv or text/tab-separated-values")]
    UnsupportedType(String),

    #[error("unable to read file: {0}")]
    Unparsable(String),

    #[error("file headers are incorrect: received {0:?} but header must be Text, Label")]
    HeaderMismatch(Vec<String>),

    #[error("file should contain some data")]
    Empty,

    #[error("labels in file {file:?} do not match project labels {supplied:?}")]
    LabelMismatch {
        file: Vec<String>,
        supplied: Vec<String>,
    },

    #[error("all text in the file already has a label; unlabeled data is needed for active learning")]
    NoUnlabeledRows,

    #[error("a project needs at least two labels, got {0}")]
    TooFewLabels(usize),

    #[error("label '{0}' is given more than once")]
    DuplicateLabel(String),
}

/// Upload limits taken from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: u64,
}

impl From<&smart_common::config::EngineConfig> for UploadLimits {
    fn from(config: &smart_common::config::EngineConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
        }
    }
}

/// An upload that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub rows: Vec<DataRow>,
    /// Original bytes, kept as the raw artifact
    pub raw: Vec<u8>,
    pub content_type: String,
}

impl ValidatedUpload {
    pub fn unlabeled_count(&self) -> usize {
        self.rows.iter().filter(|r| r.label.is_none()).count()
    }
}

/// Validate an uploaded file against the project's label names
pub fn validate_upload(
    bytes: &[u8],
    content_type: &str,
    supplied_labels: &[String],
    limits: UploadLimits,
) -> Result<ValidatedUpload, ValidationError> {
    let size = bytes.len() as u64;
    if size > limits.max_bytes {
        return Err(ValidationError::TooLarge {
            size,
            max: limits.max_bytes,
        });
    }

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let delimiter = match mime.as_str() {
        CSV_TYPE => b',',
        TSV_TYPE => b'\t',
        _ => return Err(ValidationError::UnsupportedType(content_type.to_string())),
    };

    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .from_reader(body);

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ValidationError::Unparsable(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if header != REQUIRED_HEADER {
        return Err(ValidationError::HeaderMismatch(header));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ValidationError::Unparsable(e.to_string()))?;
        let text = record.get(0).unwrap_or_default();
        let label = record.get(1).map(str::trim).filter(|l| !l.is_empty());

        if text.trim().is_empty() {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(ValidationError::Unparsable(format!("line {} has no text", line)));
        }

        rows.push(DataRow {
            text: text.to_string(),
            label: label.map(str::to_string),
        });
    }

    if rows.is_empty() {
        return Err(ValidationError::Empty);
    }

    let file_labels: BTreeSet<&str> = rows.iter().filter_map(|r| r.label.as_deref()).collect();
    let supplied: BTreeSet<&str> = supplied_labels.iter().map(String::as_str).collect();
    if !file_labels.is_empty() && file_labels != supplied {
        return Err(ValidationError::LabelMismatch {
            file: file_labels.iter().map(|s| s.to_string()).collect(),
            supplied: supplied.iter().map(|s| s.to_string()).collect(),
        });
    }

    if rows.iter().all(|r| r.label.is_some()) {
        return Err(ValidationError::NoUnlabeledRows);
    }

    Ok(ValidatedUpload {
        rows,
        raw: bytes.to_vec(),
        content_type: mime,
    })
}

/// Trim and check the label names of a new project
pub fn validate_label_set(labels: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::with_capacity(labels.len());

    for label in labels.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if !seen.insert(label) {
            return Err(ValidationError::DuplicateLabel(label.to_string()));
        }
        names.push(label.to_string());
    }

    if names.len() < 2 {
        return Err(ValidationError::TooFewLabels(names.len()));
    }
    Ok(names)
}
