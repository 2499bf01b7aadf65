//! Project creation
//!
//! Creates a project with its labels, annotator permissions and a queue sized
//! by the capacity calculator, in a single transaction. The ingestion
//! coordinator reuses [`create_project_in`] to commit a project together with
//! its first upload.

use crate::capacity::{batch_size_for_labels, compute_queue_length_with, RedundancyPolicy};
use crate::db::projects::{self, Permission};
use crate::db::queues;
use crate::utils::begin_monitored;
use crate::validation::validate_label_set;
use smart_common::config::EngineConfig;
use smart_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Everything needed to create a project
#[derive(Debug, Clone)]
pub struct ProjectSpec {
    pub name: String,
    pub description: Option<String>,
    /// Creator profile; always counts as an annotator
    pub creator: Uuid,
    pub labels: Vec<String>,
    /// Additional annotators and their permission
    pub annotators: Vec<(Uuid, Permission)>,
}

/// Identifiers and sizes of a newly created project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectSetup {
    pub project_id: Uuid,
    pub queue_id: Uuid,
    pub queue_length: u32,
    pub batch_size: u32,
    pub annotator_count: u32,
}

pub async fn create_project(
    pool: &SqlitePool,
    spec: &ProjectSpec,
    config: &EngineConfig,
) -> Result<ProjectSetup> {
    let mut tx = begin_monitored(pool, "create_project").await?;
    let setup = create_project_in(tx.conn(), spec, config).await?;
    tx.commit().await?;

    log_created(&setup);
    Ok(setup)
}

/// Create the project inside the caller's transaction
pub async fn create_project_in(
    conn: &mut SqliteConnection,
    spec: &ProjectSpec,
    config: &EngineConfig,
) -> Result<ProjectSetup> {
    let name = spec.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("project name must not be empty".to_string()));
    }
    let labels = validate_label_set(&spec.labels).map_err(|e| Error::InvalidInput(e.to_string()))?;
    if spec.annotators.iter().any(|(id, _)| *id == spec.creator) {
        return Err(Error::InvalidInput(
            "the creator is an annotator by default and takes no extra permission".to_string(),
        ));
    }

    let batch_size = batch_size_for_labels(labels.len(), config.items_per_label);

    let project_id = projects::insert_project(
        &mut *conn,
        name,
        spec.description.as_deref(),
        spec.creator,
        batch_size,
    )
    .await?;
    projects::insert_labels(&mut *conn, project_id, &labels).await?;
    for (profile_id, permission) in &spec.annotators {
        projects::add_permission(&mut *conn, project_id, *profile_id, *permission).await?;
    }

    let annotator_count = projects::annotator_count(&mut *conn, project_id).await?;
    let queue_length = compute_queue_length_with(
        batch_size,
        annotator_count,
        RedundancyPolicy::from_factor(config.redundancy_factor),
    );
    let queue = queues::add_queue(&mut *conn, project_id, queue_length).await?;

    Ok(ProjectSetup {
        project_id,
        queue_id: queue.id,
        queue_length,
        batch_size,
        annotator_count,
    })
}

pub(crate) fn log_created(setup: &ProjectSetup) {
    tracing::info!(
        project_id = %setup.project_id,
        queue_id = %setup.queue_id,
        batch_size = setup.batch_size,
        annotator_count = setup.annotator_count,
        queue_length = setup.queue_length,
        "Project created"
    );
}
