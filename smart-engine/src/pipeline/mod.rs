//! Training-Trigger Pipeline
//!
//! A committed batch fans out into one vectorization task per partition of its
//! data; all of them fan in to a single trigger check for the batch's project.
//! Batch progress is persisted in `pipeline_batches` so every step is a
//! compare-and-swap on stored state, which keeps redelivered tasks harmless.
//!
//! ```text
//! vectorize:{batch}:0 ─┐
//! vectorize:{batch}:1 ─┼─> check:{batch}
//! vectorize:{batch}:N ─┘
//! ```

mod handler;
pub mod trainer;
pub mod vectorizer;

pub use handler::PipelineTaskHandler;
pub use trainer::{ModelTrainer, RecordingTrainer, TriggerOutcome};
pub use vectorizer::{TermFrequencyVectorizer, Vectorizer};

use crate::db::batches;
use crate::ingest::Batch;
use crate::tasks::{TaskDescriptor, TaskExecutor, TaskHandle, TaskKind, TaskStatus};
use chrono::Utc;
use smart_common::events::{BatchState, EventBus, PipelineEvent};
use smart_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Idempotency key of the `index`th vectorization task of a batch
pub fn vectorize_key(batch_id: Uuid, index: usize) -> String {
    format!("vectorize:{}:{}", batch_id, index)
}

/// Idempotency key of a batch's trigger check
pub fn check_key(batch_id: Uuid) -> String {
    format!("check:{}", batch_id)
}

/// Handles for one submitted batch
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub batch_id: Uuid,
    pub vectorize: Vec<TaskHandle>,
    pub check: TaskHandle,
}

impl PipelineRun {
    /// Wait for the trigger check to finish or be skipped
    pub async fn wait(&self) -> TaskStatus {
        self.check.wait().await
    }
}

pub struct TrainingTriggerPipeline {
    db: SqlitePool,
    executor: Arc<dyn TaskExecutor>,
    event_bus: EventBus,
    partition_size: usize,
}

impl TrainingTriggerPipeline {
    pub fn new(
        db: SqlitePool,
        executor: Arc<dyn TaskExecutor>,
        event_bus: EventBus,
        partition_size: usize,
    ) -> Self {
        Self {
            db,
            executor,
            event_bus,
            partition_size: partition_size.max(1),
        }
    }

    /// Schedule vectorization and the trigger check for a committed batch
    ///
    /// Resubmitting a batch id reuses the persisted batch and the same task
    /// keys, so nothing runs twice on this executor and nothing is counted
    /// twice on any executor.
    pub async fn submit_batch(&self, batch: &Batch) -> Result<PipelineRun> {
        let partitions: Vec<Vec<Uuid>> = batch
            .data_ids
            .chunks(self.partition_size)
            .map(<[Uuid]>::to_vec)
            .collect();
        let keys: Vec<String> = (0..partitions.len())
            .map(|i| vectorize_key(batch.batch_id, i))
            .collect();

        if batches::batch_exists(&self.db, batch.batch_id).await? {
            debug!(batch_id = %batch.batch_id, "Batch already persisted, resubmitting its tasks");

            // Advance a row an interrupted writer left in SUBMITTED
            let next = batches::first_state(keys.len());
            if batches::get_batch(&self.db, batch.batch_id).await?.state == BatchState::Submitted
                && batches::transition(&self.db, batch.batch_id, BatchState::Submitted, next).await?
            {
                warn!(batch_id = %batch.batch_id, %next, "Recovered batch stuck in SUBMITTED");
                emit_state_change(&self.event_bus, batch.batch_id, batch.project_id, BatchState::Submitted, next);
            }
        } else {
            let next = batches::insert_batch(
                &self.db,
                batch.batch_id,
                batch.project_id,
                batch.training_set,
                &keys,
            )
            .await?;

            self.event_bus.emit_lossy(PipelineEvent::BatchSubmitted {
                batch_id: batch.batch_id,
                project_id: batch.project_id,
                data_count: batch.data_ids.len(),
                vectorize_tasks: partitions.len(),
                timestamp: Utc::now(),
            });
            emit_state_change(&self.event_bus, batch.batch_id, batch.project_id, BatchState::Submitted, next);
        }

        let mut vectorize = Vec::with_capacity(partitions.len());
        for (key, data_ids) in keys.into_iter().zip(partitions) {
            let task = TaskDescriptor::new(
                key,
                TaskKind::Vectorize {
                    batch_id: batch.batch_id,
                    project_id: batch.project_id,
                    data_ids,
                },
            );
            vectorize.push(self.executor.submit(task).await?);
        }

        let check = self
            .executor
            .submit_join(
                vectorize.clone(),
                TaskDescriptor::new(
                    check_key(batch.batch_id),
                    TaskKind::CheckAndTrigger {
                        batch_id: batch.batch_id,
                        project_id: batch.project_id,
                    },
                ),
            )
            .await?;

        info!(
            batch_id = %batch.batch_id,
            project_id = %batch.project_id,
            data_count = batch.data_ids.len(),
            vectorize_tasks = vectorize.len(),
            "Batch submitted to training-trigger pipeline"
        );

        Ok(PipelineRun {
            batch_id: batch.batch_id,
            vectorize,
            check,
        })
    }
}

pub(crate) fn emit_state_change(
    event_bus: &EventBus,
    batch_id: Uuid,
    project_id: Uuid,
    old_state: BatchState,
    new_state: BatchState,
) {
    debug!(%batch_id, %old_state, %new_state, "Batch state changed");
    event_bus.emit_lossy(PipelineEvent::BatchStateChanged {
        batch_id,
        project_id,
        old_state,
        new_state,
        timestamp: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_keys_are_batch_scoped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(vectorize_key(a, 0), vectorize_key(b, 0));
        assert_ne!(vectorize_key(a, 0), vectorize_key(a, 1));
        assert_eq!(check_key(a), format!("check:{}", a));
        assert_ne!(check_key(a), check_key(b));
    }
}
