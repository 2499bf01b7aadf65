//! smart-engine library
//!
//! Queue sizing and filling, transactional ingestion and the training-trigger
//! pipeline of the SMART active-learning engine. [`Engine`] wires the pieces
//! together; the modules are usable on their own.

pub mod assignment;
pub mod capacity;
pub mod db;
pub mod ingest;
pub mod pipeline;
pub mod project_setup;
pub mod queue_fill;
pub mod selection;
pub mod storage;
pub mod tasks;
pub mod utils;
pub mod validation;

use crate::ingest::{Ingested, IngestionCoordinator};
use crate::pipeline::{ModelTrainer, PipelineTaskHandler, TrainingTriggerPipeline, Vectorizer};
use crate::project_setup::{ProjectSetup, ProjectSpec};
use crate::queue_fill::FillOutcome;
use crate::selection::{OrderingPolicy, SelectionPolicy};
use crate::storage::ArtifactStore;
use crate::tasks::{ExecutorConfig, LocalTaskExecutor, TaskExecutor};
use crate::validation::ValidatedUpload;
use smart_common::config::EngineConfig;
use smart_common::events::EventBus;
use smart_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Events buffered per subscriber
pub const EVENT_BUS_CAPACITY: usize = 100;

/// Collaborators supplied by the embedding application
pub struct Collaborators {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub vectorizer: Arc<dyn Vectorizer>,
    pub trainer: Arc<dyn ModelTrainer>,
}

/// A wired engine: executor, pipeline and ingestion over one database
pub struct Engine {
    pub db: SqlitePool,
    pub config: EngineConfig,
    pub event_bus: EventBus,
    pub policy: Arc<dyn SelectionPolicy>,
    pub executor: Arc<LocalTaskExecutor>,
    pub pipeline: Arc<TrainingTriggerPipeline>,
    pub ingestion: IngestionCoordinator,
}

impl Engine {
    pub fn new(
        db: SqlitePool,
        config: EngineConfig,
        event_bus: EventBus,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let ordering: OrderingPolicy = config.ordering_policy.parse()?;
        let policy: Arc<dyn SelectionPolicy> = Arc::from(ordering.build());

        let handler = Arc::new(PipelineTaskHandler::new(
            db.clone(),
            collaborators.vectorizer,
            collaborators.trainer,
            event_bus.clone(),
        ));
        let executor = Arc::new(LocalTaskExecutor::new(handler, ExecutorConfig::from(&config)));

        let pipeline = Arc::new(TrainingTriggerPipeline::new(
            db.clone(),
            executor.clone() as Arc<dyn TaskExecutor>,
            event_bus.clone(),
            config.vectorize_partition_size,
        ));

        let ingestion = IngestionCoordinator::new(
            db.clone(),
            collaborators.artifacts,
            policy.clone(),
            pipeline.clone(),
            event_bus.clone(),
            config.dedup_on_text,
        );

        tracing::debug!(policy = policy.name(), "Engine wired");

        Ok(Self {
            db,
            config,
            event_bus,
            policy,
            executor,
            pipeline,
            ingestion,
        })
    }

    pub async fn create_project(&self, spec: &ProjectSpec) -> Result<ProjectSetup> {
        project_setup::create_project(&self.db, spec, &self.config).await
    }

    /// Create a project and ingest its first upload as one unit
    pub async fn create_project_with_upload(
        &self,
        spec: &ProjectSpec,
        upload: &ValidatedUpload,
    ) -> Result<(ProjectSetup, Ingested)> {
        self.ingestion.ingest_new_project(spec, &self.config, upload).await
    }

    pub async fn ingest(
        &self,
        project_id: Uuid,
        upload: &ValidatedUpload,
        queue_id: Option<Uuid>,
    ) -> Result<Ingested> {
        self.ingestion.ingest(project_id, upload, queue_id).await
    }

    pub async fn fill_queue(&self, queue_id: Uuid) -> Result<FillOutcome> {
        queue_fill::fill_queue(&self.db, queue_id, self.policy.as_ref()).await
    }

    /// Mark the project's running training as finished
    ///
    /// Advances the current training set and frees the training slot.
    /// Returns the new current set.
    pub async fn complete_training(&self, project_id: Uuid) -> Result<i64> {
        let mut conn = self.db.acquire().await?;
        let project = db::projects::get_project(&mut *conn, project_id).await?;
        drop(conn);

        if !project.training_in_progress {
            return Err(smart_common::Error::Conflict(format!(
                "project {} has no training in progress",
                project_id
            )));
        }
        pipeline::trainer::complete_training(&self.db, project_id, project.current_training_set).await
    }

    /// Stop the executor and wait for running tasks
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}
