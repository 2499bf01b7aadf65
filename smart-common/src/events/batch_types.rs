//! Training-trigger batch lifecycle types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one ingestion batch through the training-trigger pipeline
///
/// ```text
/// SUBMITTED -> VECTORIZING -> ALL_VECTORIZED -> CHECKING -> TRAINING_STARTED
///                                                        \-> NO_ACTION
/// SUBMITTED | VECTORIZING | CHECKING -> FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    /// Handed off, vectorization tasks being scheduled
    Submitted,
    /// Vectorization tasks in flight
    Vectorizing,
    /// Every vectorization task succeeded
    AllVectorized,
    /// Trigger check running
    Checking,
    /// Training job enqueued
    TrainingStarted,
    /// Threshold not met or training already running
    NoAction,
    /// A task exhausted its retries
    Failed,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Submitted => "SUBMITTED",
            BatchState::Vectorizing => "VECTORIZING",
            BatchState::AllVectorized => "ALL_VECTORIZED",
            BatchState::Checking => "CHECKING",
            BatchState::TrainingStarted => "TRAINING_STARTED",
            BatchState::NoAction => "NO_ACTION",
            BatchState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::TrainingStarted | BatchState::NoAction | BatchState::Failed
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(&self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Submitted, Vectorizing)
                | (Submitted, AllVectorized)
                | (Submitted, Failed)
                | (Vectorizing, AllVectorized)
                | (Vectorizing, Failed)
                | (AllVectorized, Checking)
                | (Checking, TrainingStarted)
                | (Checking, NoAction)
                | (Checking, Failed)
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(BatchState::Submitted),
            "VECTORIZING" => Ok(BatchState::Vectorizing),
            "ALL_VECTORIZED" => Ok(BatchState::AllVectorized),
            "CHECKING" => Ok(BatchState::Checking),
            "TRAINING_STARTED" => Ok(BatchState::TrainingStarted),
            "NO_ACTION" => Ok(BatchState::NoAction),
            "FAILED" => Ok(BatchState::Failed),
            other => Err(format!("Unknown batch state: {}", other)),
        }
    }
}
