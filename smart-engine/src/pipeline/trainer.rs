//! Model training collaborator

use crate::db::projects;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smart_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What the trainer did with a training request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A training job was enqueued
    Started,
    /// The trainer declined; nothing was enqueued
    Skipped,
}

/// Model training subsystem as seen by the trigger check
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    /// Whether a training job for the project is queued or running
    async fn is_training(&self, project_id: Uuid) -> Result<bool>;

    /// Enqueue training on the labels of `training_set`
    async fn enqueue_training(&self, project_id: Uuid, training_set: i64) -> Result<TriggerOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingRequest {
    pub project_id: Uuid,
    pub training_set: i64,
    pub requested_at: DateTime<Utc>,
}

/// Trainer that records requests instead of training
///
/// Used by the CLI, where no training backend is attached, and by tests.
#[derive(Clone, Default)]
pub struct RecordingTrainer {
    requests: Arc<Mutex<Vec<TrainingRequest>>>,
    busy: Arc<Mutex<Vec<Uuid>>>,
}

impl RecordingTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<TrainingRequest> {
        self.requests.lock().await.clone()
    }

    /// Report `project_id` as training until [`RecordingTrainer::set_idle`]
    pub async fn set_busy(&self, project_id: Uuid) {
        let mut busy = self.busy.lock().await;
        if !busy.contains(&project_id) {
            busy.push(project_id);
        }
    }

    pub async fn set_idle(&self, project_id: Uuid) {
        self.busy.lock().await.retain(|id| *id != project_id);
    }
}

#[async_trait]
impl ModelTrainer for RecordingTrainer {
    async fn is_training(&self, project_id: Uuid) -> Result<bool> {
        Ok(self.busy.lock().await.contains(&project_id))
    }

    async fn enqueue_training(&self, project_id: Uuid, training_set: i64) -> Result<TriggerOutcome> {
        self.requests.lock().await.push(TrainingRequest {
            project_id,
            training_set,
            requested_at: Utc::now(),
        });
        tracing::info!(%project_id, training_set, "Training requested");
        Ok(TriggerOutcome::Started)
    }
}

/// Record that training on `training_set` finished
///
/// Advances the project's current training set so new labels land in a fresh
/// set, and releases the training slot. Fails with `Error::Conflict` if the
/// set was already advanced.
pub async fn complete_training(pool: &SqlitePool, project_id: Uuid, training_set: i64) -> Result<i64> {
    projects::advance_training_set(pool, project_id, training_set).await
}
