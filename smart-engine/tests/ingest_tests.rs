//! Ingestion Coordinator integration tests

mod helpers;

use helpers::{
    count_rows, seed_project, test_config, test_engine, test_engine_with, unlabeled_rows,
    upload_of, FailingArtifactStore, ScriptedVectorizer,
};
use smart_common::events::PipelineEvent;
use smart_common::Error;
use smart_engine::db::data::DataRow;
use smart_engine::db::projects;
use smart_engine::tasks::TaskStatus;
use std::sync::Arc;
use uuid::Uuid;

async fn assert_nothing_persisted(pool: &sqlx::SqlitePool) {
    assert_eq!(count_rows(pool, "data").await, 0);
    assert_eq!(count_rows(pool, "data_labels").await, 0);
    assert_eq!(count_rows(pool, "data_queue").await, 0);
    assert_eq!(count_rows(pool, "pipeline_batches").await, 0);
}

#[tokio::test]
async fn test_first_ingest_fills_queue_and_submits_batch() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let mut events = test.event_bus.subscribe();
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 1).await;

    let mut rows = unlabeled_rows(12);
    rows.push(DataRow::labeled("a labeled one", "pos"));
    let ingested = engine
        .ingest(setup.project_id, &upload_of(rows), Some(setup.queue_id))
        .await
        .unwrap();

    let batch = &ingested.batch;
    assert_eq!(batch.project_id, setup.project_id);
    assert_eq!(batch.training_set, 0);
    assert_eq!(batch.data_ids.len(), 13);
    assert_eq!(batch.labeled, 1);
    assert_eq!(batch.duplicates_skipped, 0);
    let fill = batch.fill.expect("queue was supplied");
    assert_eq!(fill.inserted, 12);
    assert!(batch.artifact.path.exists());

    let run = ingested.pipeline.expect("batch submitted");
    assert_eq!(run.wait().await, TaskStatus::Succeeded);

    assert_eq!(count_rows(&engine.db, "data").await, 13);
    assert_eq!(count_rows(&engine.db, "data_queue").await, 12);
    assert_eq!(count_rows(&engine.db, "data_vectors").await, 13);

    let mut saw_fill = false;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::QueueFilled {
            queue_id, inserted, ..
        } = event
        {
            assert_eq!(queue_id, setup.queue_id);
            assert_eq!(inserted, 12);
            saw_fill = true;
        }
    }
    assert!(saw_fill);
}

#[tokio::test]
async fn test_later_ingest_does_not_fill() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;

    let ingested = engine
        .ingest(setup.project_id, &upload_of(unlabeled_rows(5)), None)
        .await
        .unwrap();

    assert!(ingested.batch.fill.is_none());
    assert_eq!(count_rows(&engine.db, "data_queue").await, 0);
    ingested.pipeline.unwrap().wait().await;
}

#[tokio::test]
async fn test_unknown_queue_rolls_back_everything() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 1).await;

    let mut rows = unlabeled_rows(10);
    rows.push(DataRow::labeled("labeled", "neg"));
    let err = engine
        .ingest(setup.project_id, &upload_of(rows), Some(Uuid::new_v4()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert_nothing_persisted(&engine.db).await;

    // No artifact left behind either
    let data_files = test.temp_dir.path().join("data_files");
    let leftover = std::fs::read_dir(&data_files)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_queue_of_other_project_is_rejected() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let first = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;
    let second = seed_project(&engine.db, &engine.config, &["yes", "no"], 0).await;

    let err = engine
        .ingest(first.project_id, &upload_of(unlabeled_rows(3)), Some(second.queue_id))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_nothing_persisted(&engine.db).await;
}

#[tokio::test]
async fn test_artifact_failure_rolls_back() {
    let test = test_engine_with(
        test_config(),
        |pool, _| ScriptedVectorizer::new(pool),
        Some(Arc::new(FailingArtifactStore)),
    )
    .await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 1).await;

    let err = engine
        .ingest(setup.project_id, &upload_of(unlabeled_rows(4)), Some(setup.queue_id))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Io(_)));
    assert_nothing_persisted(&engine.db).await;
    assert_eq!(test.vectorizer.call_count().await, 0);
}

#[tokio::test]
async fn test_unknown_label_rolls_back() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;

    let rows = vec![
        DataRow::unlabeled("fine"),
        DataRow::labeled("odd one", "neutral"),
    ];
    let err = engine
        .ingest(setup.project_id, &upload_of(rows), Some(setup.queue_id))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidInput(_)));
    assert_nothing_persisted(&engine.db).await;
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let test = test_engine(test_config()).await;

    let err = test
        .engine
        .ingest(Uuid::new_v4(), &upload_of(unlabeled_rows(2)), None)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_duplicate_text_is_skipped() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;

    let rows = vec![
        DataRow::unlabeled("same text"),
        DataRow::unlabeled("same text"),
        DataRow::unlabeled("other text"),
    ];
    let first = engine
        .ingest(setup.project_id, &upload_of(rows), Some(setup.queue_id))
        .await
        .unwrap();
    assert_eq!(first.batch.data_ids.len(), 2);
    assert_eq!(first.batch.duplicates_skipped, 1);

    let second = engine
        .ingest(
            setup.project_id,
            &upload_of(vec![DataRow::unlabeled("other text"), DataRow::unlabeled("new")]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.batch.data_ids.len(), 1);
    assert_eq!(second.batch.duplicates_skipped, 1);
    assert_eq!(count_rows(&engine.db, "data").await, 3);

    first.pipeline.unwrap().wait().await;
    second.pipeline.unwrap().wait().await;
}

#[tokio::test]
async fn test_dedup_can_be_disabled() {
    let config = smart_common::config::EngineConfig {
        dedup_on_text: false,
        ..test_config()
    };
    let test = test_engine(config).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;

    let rows = vec![DataRow::unlabeled("same"), DataRow::unlabeled("same")];
    let ingested = engine
        .ingest(setup.project_id, &upload_of(rows), None)
        .await
        .unwrap();

    assert_eq!(ingested.batch.data_ids.len(), 2);
    assert_eq!(ingested.batch.duplicates_skipped, 0);
    ingested.pipeline.unwrap().wait().await;
}

#[tokio::test]
async fn test_labels_land_in_current_training_set() {
    let test = test_engine(test_config()).await;
    let engine = &test.engine;
    let setup = seed_project(&engine.db, &engine.config, &["pos", "neg"], 0).await;

    let rows = vec![
        DataRow::labeled("one", "pos"),
        DataRow::labeled("two", "neg"),
        DataRow::unlabeled("three"),
    ];
    let ingested = engine
        .ingest(setup.project_id, &upload_of(rows), None)
        .await
        .unwrap();
    ingested.pipeline.unwrap().wait().await;

    let mut conn = engine.db.acquire().await.unwrap();
    assert_eq!(
        projects::labeled_count(&mut *conn, setup.project_id, 0)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        projects::labeled_count(&mut *conn, setup.project_id, 1)
            .await
            .unwrap(),
        0
    );
}
