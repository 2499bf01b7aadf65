//! Task bodies for the training-trigger pipeline

use super::emit_state_change;
use super::trainer::{ModelTrainer, TriggerOutcome};
use super::vectorizer::Vectorizer;
use crate::db::batches::{self, TaskProgress, TriggerDecision};
use crate::db::{data, projects};
use crate::tasks::{TaskDescriptor, TaskError, TaskHandler, TaskKind};
use async_trait::async_trait;
use chrono::Utc;
use smart_common::events::{BatchState, EventBus, PipelineEvent};
use smart_common::{Error, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs vectorization and trigger-check tasks against the database
pub struct PipelineTaskHandler {
    db: SqlitePool,
    vectorizer: Arc<dyn Vectorizer>,
    trainer: Arc<dyn ModelTrainer>,
    event_bus: EventBus,
}

impl PipelineTaskHandler {
    pub fn new(
        db: SqlitePool,
        vectorizer: Arc<dyn Vectorizer>,
        trainer: Arc<dyn ModelTrainer>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            vectorizer,
            trainer,
            event_bus,
        }
    }

    async fn run_vectorize(
        &self,
        task_key: &str,
        batch_id: Uuid,
        project_id: Uuid,
        data_ids: &[Uuid],
    ) -> Result<()> {
        let record = batches::get_batch(&self.db, batch_id).await?;
        if record.state == BatchState::Submitted {
            // Retried until the submitter moves the batch on
            return Err(Error::Conflict(format!(
                "batch {} is still {}",
                batch_id, record.state
            )));
        }
        if record.state != BatchState::Vectorizing {
            debug!(%batch_id, task = task_key, state = %record.state, "Batch not vectorizing, nothing to do");
            return Ok(());
        }

        let data = data::load_data(&self.db, data_ids).await?;
        if data.len() != data_ids.len() {
            warn!(
                %batch_id,
                task = task_key,
                expected = data_ids.len(),
                found = data.len(),
                "Some batch data no longer exists"
            );
        }

        self.vectorizer.vectorize(project_id, &data).await?;

        match batches::record_task_success(&self.db, batch_id, task_key).await? {
            TaskProgress::Counted { outstanding } => {
                debug!(%batch_id, task = task_key, outstanding, "Vectorization task counted");
            }
            TaskProgress::AlreadyCounted => {
                debug!(%batch_id, task = task_key, "Vectorization task already counted");
            }
        }

        // Re-read: a retried attempt may find the counter already at zero
        let record = batches::get_batch(&self.db, batch_id).await?;
        if record.outstanding == 0
            && record.state == BatchState::Vectorizing
            && batches::transition(
                &self.db,
                batch_id,
                BatchState::Vectorizing,
                BatchState::AllVectorized,
            )
            .await?
        {
            info!(%batch_id, %project_id, tasks = record.total_tasks, "All vectorization tasks succeeded");
            emit_state_change(
                &self.event_bus,
                batch_id,
                project_id,
                BatchState::Vectorizing,
                BatchState::AllVectorized,
            );
        }

        Ok(())
    }

    async fn run_check(&self, batch_id: Uuid, project_id: Uuid) -> Result<()> {
        let record = batches::get_batch(&self.db, batch_id).await?;

        match record.state {
            BatchState::AllVectorized => {
                if batches::transition(
                    &self.db,
                    batch_id,
                    BatchState::AllVectorized,
                    BatchState::Checking,
                )
                .await?
                {
                    emit_state_change(
                        &self.event_bus,
                        batch_id,
                        project_id,
                        BatchState::AllVectorized,
                        BatchState::Checking,
                    );
                } else if batches::get_batch(&self.db, batch_id).await?.state != BatchState::Checking {
                    debug!(%batch_id, "Trigger check already decided");
                    return Ok(());
                }
            }
            BatchState::Checking => {
                debug!(%batch_id, "Resuming interrupted trigger check");
            }
            state if state.is_terminal() => {
                debug!(%batch_id, %state, "Trigger check already decided");
                return Ok(());
            }
            state => {
                return Err(Error::Conflict(format!(
                    "batch {} is {} when its trigger check ran",
                    batch_id, state
                )));
            }
        }

        let outcome = self.decide(batch_id, project_id).await?;

        if batches::transition(&self.db, batch_id, BatchState::Checking, outcome).await? {
            info!(%batch_id, %project_id, outcome = %outcome, "Trigger check finished");
            emit_state_change(&self.event_bus, batch_id, project_id, BatchState::Checking, outcome);
        }

        Ok(())
    }

    /// Decide between TRAINING_STARTED and NO_ACTION for the project
    ///
    /// A check resumed after an interrupted attempt reuses the decision that
    /// attempt persisted instead of deciding again.
    async fn decide(&self, batch_id: Uuid, project_id: Uuid) -> Result<BatchState> {
        let record = batches::get_batch(&self.db, batch_id).await?;

        let mut conn = self.db.acquire().await?;
        let project = projects::get_project(&mut *conn, project_id).await?;
        let training_set = project.current_training_set;
        let labeled = projects::labeled_count(&mut *conn, project_id, training_set).await?;
        drop(conn);

        match record.trigger_decision {
            Some(TriggerDecision::Started) => {
                info!(%batch_id, %project_id, "Training already started by this check");
                return Ok(BatchState::TrainingStarted);
            }
            Some(TriggerDecision::Claimed) => {
                if self.trainer.is_training(project_id).await? {
                    batches::record_training_started(&self.db, batch_id).await?;
                    info!(%batch_id, %project_id, "Trainer already running the claimed request");
                    return Ok(BatchState::TrainingStarted);
                }
                info!(%batch_id, %project_id, "Resuming claimed training request");
            }
            None => {
                if project.training_in_progress || self.trainer.is_training(project_id).await? {
                    info!(%batch_id, %project_id, "Training already in progress, no action");
                    return Ok(BatchState::NoAction);
                }

                let threshold = u64::from(project.batch_size);
                if threshold == 0 || labeled < threshold {
                    debug!(%batch_id, %project_id, labeled, threshold, "Not enough labels to train");
                    return Ok(BatchState::NoAction);
                }

                if !batches::claim_training(&self.db, batch_id, project_id).await? {
                    info!(%batch_id, %project_id, "Another check claimed training, no action");
                    return Ok(BatchState::NoAction);
                }
            }
        }

        match self.trainer.enqueue_training(project_id, training_set).await {
            Ok(TriggerOutcome::Started) => {
                batches::record_training_started(&self.db, batch_id).await?;
                info!(%batch_id, %project_id, training_set, labeled, "Training triggered");
                self.event_bus.emit_lossy(PipelineEvent::TrainingTriggered {
                    batch_id,
                    project_id,
                    training_set,
                    labeled_count: labeled,
                    timestamp: Utc::now(),
                });
                Ok(BatchState::TrainingStarted)
            }
            Ok(TriggerOutcome::Skipped) => {
                batches::release_training_claim(&self.db, batch_id, project_id).await?;
                info!(%batch_id, %project_id, "Trainer skipped request, no action");
                Ok(BatchState::NoAction)
            }
            Err(e) => {
                if let Err(release_err) =
                    batches::release_training_claim(&self.db, batch_id, project_id).await
                {
                    warn!(%project_id, error = %release_err, "Failed to release training slot");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TaskHandler for PipelineTaskHandler {
    async fn run(&self, task: &TaskDescriptor) -> Result<()> {
        match &task.kind {
            TaskKind::Vectorize {
                batch_id,
                project_id,
                data_ids,
            } => {
                self.run_vectorize(&task.idempotency_key, *batch_id, *project_id, data_ids)
                    .await
            }
            TaskKind::CheckAndTrigger {
                batch_id,
                project_id,
            } => self.run_check(*batch_id, *project_id).await,
        }
    }

    async fn on_failed(&self, task: &TaskDescriptor, task_error: &TaskError) {
        let batch_id = task.kind.batch_id();
        let project_id = task.kind.project_id();
        let reason = format!(
            "{} task {} failed: {}",
            task.kind.name(),
            task.idempotency_key,
            task_error
        );

        match task.kind {
            TaskKind::Vectorize { .. } => {
                if let Err(e) = batches::mark_task_failed(&self.db, &task.idempotency_key, &reason).await {
                    warn!(%batch_id, task = %task.idempotency_key, error = %e, "Failed to record task failure");
                }
            }
            // An attempt cut off mid-request can leave the slot claimed
            TaskKind::CheckAndTrigger { .. } => {
                match batches::release_training_claim(&self.db, batch_id, project_id).await {
                    Ok(true) => info!(%batch_id, %project_id, "Released training slot of failed check"),
                    Ok(false) => {}
                    Err(e) => warn!(%batch_id, %project_id, error = %e, "Failed to release training slot"),
                }
            }
        }

        match batches::fail_batch(&self.db, batch_id, &reason).await {
            Ok(Some(old_state)) => {
                error!(
                    %batch_id,
                    %project_id,
                    task = %task.idempotency_key,
                    reason = %reason,
                    "Batch failed; training check will not run for it"
                );
                emit_state_change(&self.event_bus, batch_id, project_id, old_state, BatchState::Failed);
                self.event_bus.emit_lossy(PipelineEvent::BatchFailed {
                    batch_id,
                    project_id,
                    reason,
                    timestamp: Utc::now(),
                });
            }
            Ok(None) => {
                warn!(%batch_id, task = %task.idempotency_key, "Task failed after its batch was already decided");
            }
            Err(e) => {
                error!(%batch_id, %project_id, error = %e, reason = %reason, "Failed to record batch failure");
            }
        }
    }
}
