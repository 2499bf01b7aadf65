//! Ingestion Coordinator
//!
//! Persists a validated upload as one batch: data rows, upload labels, the
//! optional first queue fill and the raw artifact all commit together or not
//! at all. Only after the commit is the batch handed to the training-trigger
//! pipeline. A new project's first upload shares the transaction that creates
//! the project, so a failed upload leaves no empty project behind.

use crate::db::{data, projects, queues};
use crate::pipeline::{PipelineRun, TrainingTriggerPipeline};
use crate::project_setup::{self, ProjectSetup, ProjectSpec};
use crate::queue_fill::{self, FillOutcome};
use crate::selection::SelectionPolicy;
use crate::storage::{ArtifactRef, ArtifactStore};
use crate::utils::{begin_monitored, retry_on_lock, MonitoredTransaction};
use crate::validation::ValidatedUpload;
use chrono::Utc;
use smart_common::config::EngineConfig;
use smart_common::events::{EventBus, PipelineEvent};
use smart_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Maximum time an ingestion waits out SQLite lock contention
const INGEST_LOCK_WAIT_MS: u64 = 10_000;

/// The data created by one ingestion
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    pub project_id: Uuid,
    /// Training set the data was created in
    pub training_set: i64,
    /// Created data, in upload order
    pub data_ids: Vec<Uuid>,
    /// Created data that came with a label
    pub labeled: usize,
    pub duplicates_skipped: usize,
    /// Queue fill result when a queue was supplied
    pub fill: Option<FillOutcome>,
    pub artifact: ArtifactRef,
}

/// Result of [`IngestionCoordinator::ingest`]
#[derive(Debug)]
pub struct Ingested {
    pub batch: Batch,
    /// None when the committed batch could not be handed to the pipeline
    pub pipeline: Option<PipelineRun>,
}

pub struct IngestionCoordinator {
    db: SqlitePool,
    artifacts: Arc<dyn ArtifactStore>,
    policy: Arc<dyn SelectionPolicy>,
    pipeline: Arc<TrainingTriggerPipeline>,
    event_bus: EventBus,
    dedup_on_text: bool,
}

impl IngestionCoordinator {
    pub fn new(
        db: SqlitePool,
        artifacts: Arc<dyn ArtifactStore>,
        policy: Arc<dyn SelectionPolicy>,
        pipeline: Arc<TrainingTriggerPipeline>,
        event_bus: EventBus,
        dedup_on_text: bool,
    ) -> Self {
        Self {
            db,
            artifacts,
            policy,
            pipeline,
            event_bus,
            dedup_on_text,
        }
    }

    /// Ingest `upload` into `project_id`
    ///
    /// `queue_id` is supplied for a project's first upload, to fill its queue
    /// in the same transaction. The queue must belong to the project.
    pub async fn ingest(
        &self,
        project_id: Uuid,
        upload: &ValidatedUpload,
        queue_id: Option<Uuid>,
    ) -> Result<Ingested> {
        let batch = retry_on_lock("ingest", INGEST_LOCK_WAIT_MS, || {
            self.ingest_once(project_id, upload, queue_id)
        })
        .await?;

        Ok(self.hand_off(batch, queue_id).await)
    }

    /// Create a project and ingest its first upload in one transaction
    ///
    /// The upload fills the new project's queue. Any failure before the
    /// commit leaves neither the project nor its data behind.
    pub async fn ingest_new_project(
        &self,
        spec: &ProjectSpec,
        config: &EngineConfig,
        upload: &ValidatedUpload,
    ) -> Result<(ProjectSetup, Ingested)> {
        let (setup, batch) = retry_on_lock("create_project", INGEST_LOCK_WAIT_MS, || async {
            let mut tx = begin_monitored(&self.db, "create_project").await?;
            let setup = project_setup::create_project_in(tx.conn(), spec, config).await?;
            let batch = self
                .stage(tx.conn(), setup.project_id, upload, Some(setup.queue_id))
                .await?;
            self.commit_or_discard(tx, &batch.artifact).await?;
            Ok((setup, batch))
        })
        .await?;

        project_setup::log_created(&setup);
        let ingested = self.hand_off(batch, Some(setup.queue_id)).await;
        Ok((setup, ingested))
    }

    /// Announce a committed batch and submit it to the pipeline
    async fn hand_off(&self, batch: Batch, queue_id: Option<Uuid>) -> Ingested {
        let project_id = batch.project_id;
        info!(
            batch_id = %batch.batch_id,
            %project_id,
            data_count = batch.data_ids.len(),
            labeled = batch.labeled,
            duplicates_skipped = batch.duplicates_skipped,
            inserted = batch.fill.map(|f| f.inserted),
            "Ingestion committed"
        );

        if let (Some(queue_id), Some(fill)) = (queue_id, batch.fill) {
            self.event_bus.emit_lossy(PipelineEvent::QueueFilled {
                queue_id,
                project_id,
                inserted: fill.inserted,
                occupancy: fill.occupancy,
                timestamp: Utc::now(),
            });
        }

        let pipeline = match self.pipeline.submit_batch(&batch).await {
            Ok(run) => Some(run),
            Err(e) => {
                error!(
                    batch_id = %batch.batch_id,
                    %project_id,
                    error = %e,
                    "Committed batch could not be submitted to the pipeline"
                );
                None
            }
        };

        Ingested { batch, pipeline }
    }

    /// One transactional attempt; nothing persists unless it commits
    async fn ingest_once(
        &self,
        project_id: Uuid,
        upload: &ValidatedUpload,
        queue_id: Option<Uuid>,
    ) -> Result<Batch> {
        let mut tx = begin_monitored(&self.db, "ingest").await?;
        let batch = self.stage(tx.conn(), project_id, upload, queue_id).await?;
        self.commit_or_discard(tx, &batch.artifact).await?;
        Ok(batch)
    }

    /// Write the upload's data, queue fill and raw artifact without committing
    async fn stage(
        &self,
        conn: &mut SqliteConnection,
        project_id: Uuid,
        upload: &ValidatedUpload,
        queue_id: Option<Uuid>,
    ) -> Result<Batch> {
        let project = projects::get_project(&mut *conn, project_id).await?;
        let training_set = project.current_training_set;

        let persisted = data::persist_data(
            &mut *conn,
            project_id,
            &upload.rows,
            training_set,
            Uuid::new_v4(),
            self.dedup_on_text,
        )
        .await?;

        let fill = match queue_id {
            Some(queue_id) => {
                let queue = queues::get_queue(&mut *conn, queue_id).await?;
                if queue.project_id != project_id {
                    return Err(Error::InvalidInput(format!(
                        "queue {} does not belong to project {}",
                        queue_id, project_id
                    )));
                }
                Some(queue_fill::fill_queue_in(&mut *conn, queue_id, self.policy.as_ref()).await?)
            }
            None => None,
        };

        // Written last; removed again if the commit fails
        let artifact = self
            .artifacts
            .persist_raw_artifact(project_id, &upload.raw)
            .await?;

        Ok(Batch {
            batch_id: Uuid::new_v4(),
            project_id,
            training_set,
            data_ids: persisted.data_ids,
            labeled: persisted.labeled,
            duplicates_skipped: persisted.duplicates_skipped,
            fill,
            artifact,
        })
    }

    /// Commit, removing the already written artifact if the commit fails
    async fn commit_or_discard(&self, tx: MonitoredTransaction<'_>, artifact: &ArtifactRef) -> Result<()> {
        if let Err(e) = tx.commit().await {
            if let Err(remove_err) = self.artifacts.remove_artifact(artifact).await {
                warn!(
                    path = %artifact.path.display(),
                    error = %remove_err,
                    "Failed to remove artifact of uncommitted ingestion"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}
