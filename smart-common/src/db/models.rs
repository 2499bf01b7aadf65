//! Database models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parse a TEXT id column
pub fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Invalid UUID in {}: {} ({})", column, value, e)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub creator_id: Uuid,
    /// Labeled items needed in the current training set before retraining
    pub batch_size: u32,
    /// `set_number` of the current training set
    pub current_training_set: i64,
    pub training_in_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Target capacity
    pub length: u32,
}

/// A single text record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    pub id: Uuid,
    pub project_id: Uuid,
    pub training_set: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded
    pub hash: String,
}
