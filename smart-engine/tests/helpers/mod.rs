//! Test Helper Utilities
//!
//! Temp databases, seeded projects and a wired engine with controllable
//! collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use smart_common::config::EngineConfig;
use smart_common::db::{init_database, Datum};
use smart_common::events::EventBus;
use smart_common::{Error, Result};
use smart_engine::db::data::{self, DataRow};
use smart_engine::db::projects::{self, Permission};
use smart_engine::pipeline::{RecordingTrainer, TermFrequencyVectorizer, Vectorizer};
use smart_engine::project_setup::{create_project, ProjectSetup, ProjectSpec};
use smart_engine::storage::{ArtifactRef, ArtifactStore, FsArtifactStore};
use smart_engine::validation::ValidatedUpload;
use smart_engine::{Collaborators, Engine};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Create temporary test database with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("smart.db")).await.unwrap();
    (temp_dir, pool)
}

/// Config with short retry timings
pub fn test_config() -> EngineConfig {
    EngineConfig {
        task_retry_budget: 2,
        task_retry_backoff_ms: 5,
        task_timeout_ms: 5_000,
        ..EngineConfig::default()
    }
}

/// Create a project with `labels` and `extra_annotators` coders besides the creator
pub async fn seed_project(
    pool: &SqlitePool,
    config: &EngineConfig,
    labels: &[&str],
    extra_annotators: usize,
) -> ProjectSetup {
    let mut conn = pool.acquire().await.unwrap();
    let creator = projects::create_profile(&mut *conn, &format!("creator-{}", Uuid::new_v4()))
        .await
        .unwrap();
    let mut annotators = Vec::new();
    for i in 0..extra_annotators {
        let profile = projects::create_profile(&mut *conn, &format!("coder-{}-{}", i, Uuid::new_v4()))
            .await
            .unwrap();
        annotators.push((profile.id, Permission::Coder));
    }
    drop(conn);

    create_project(
        pool,
        &ProjectSpec {
            name: "test project".to_string(),
            description: None,
            creator: creator.id,
            labels: labels.iter().map(|l| l.to_string()).collect(),
            annotators,
        },
        config,
    )
    .await
    .unwrap()
}

pub fn unlabeled_rows(count: usize) -> Vec<DataRow> {
    (0..count)
        .map(|i| DataRow::unlabeled(format!("document number {}", i)))
        .collect()
}

pub fn upload_of(rows: Vec<DataRow>) -> ValidatedUpload {
    ValidatedUpload {
        rows,
        raw: b"Text,Label\n".to_vec(),
        content_type: "text/csv".to_string(),
    }
}

/// Persist rows straight into the current training set, bypassing ingestion
pub async fn add_data(pool: &SqlitePool, project_id: Uuid, rows: &[DataRow]) -> Vec<Uuid> {
    let mut tx = pool.begin().await.unwrap();
    let persisted = data::persist_data(&mut *tx, project_id, rows, 0, Uuid::new_v4(), false)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    persisted.data_ids
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Vectorizer that records calls and can be told to fail or stall
#[derive(Clone)]
pub struct ScriptedVectorizer {
    inner: Arc<TermFrequencyVectorizer>,
    /// Data ids whose partition always fails
    pub poison: Arc<Mutex<HashSet<Uuid>>>,
    /// Sleep before each call
    pub delay: Option<Duration>,
    pub calls: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedVectorizer {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            inner: Arc::new(TermFrequencyVectorizer::new(pool)),
            poison: Arc::new(Mutex::new(HashSet::new())),
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Vectorizer for ScriptedVectorizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn vectorize(&self, project_id: Uuid, data: &[Datum]) -> Result<()> {
        self.calls.lock().await.push(data.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let poison = self.poison.lock().await;
        if data.iter().any(|d| poison.contains(&d.id)) {
            return Err(Error::Internal("vectorizer rejected partition".to_string()));
        }
        drop(poison);

        self.inner.vectorize(project_id, data).await
    }
}

/// Artifact store that refuses every write
pub struct FailingArtifactStore;

#[async_trait]
impl ArtifactStore for FailingArtifactStore {
    async fn persist_raw_artifact(&self, _project_id: Uuid, _bytes: &[u8]) -> Result<ArtifactRef> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk full",
        )))
    }

    async fn remove_artifact(&self, _artifact: &ArtifactRef) -> Result<()> {
        Ok(())
    }
}

pub struct TestEngine {
    pub engine: Engine,
    pub trainer: RecordingTrainer,
    pub vectorizer: ScriptedVectorizer,
    pub event_bus: EventBus,
    pub temp_dir: TempDir,
}

pub async fn test_engine(config: EngineConfig) -> TestEngine {
    test_engine_with(config, |pool, _| ScriptedVectorizer::new(pool), None).await
}

/// Engine over a fresh database with a customised vectorizer and artifact store
pub async fn test_engine_with<F>(
    config: EngineConfig,
    make_vectorizer: F,
    artifacts: Option<Arc<dyn ArtifactStore>>,
) -> TestEngine
where
    F: FnOnce(SqlitePool, &EngineConfig) -> ScriptedVectorizer,
{
    let (temp_dir, pool) = create_test_db().await;
    let trainer = RecordingTrainer::new();
    let vectorizer = make_vectorizer(pool.clone(), &config);
    let event_bus = EventBus::new(256);
    let artifacts = artifacts.unwrap_or_else(|| {
        Arc::new(FsArtifactStore::new(temp_dir.path().join("data_files"))) as Arc<dyn ArtifactStore>
    });

    let engine = Engine::new(
        pool,
        config,
        event_bus.clone(),
        Collaborators {
            artifacts,
            vectorizer: Arc::new(vectorizer.clone()),
            trainer: Arc::new(trainer.clone()),
        },
    )
    .unwrap();

    TestEngine {
        engine,
        trainer,
        vectorizer,
        event_bus,
        temp_dir,
    }
}
