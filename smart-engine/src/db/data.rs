//! Data item persistence

use sha2::{Digest, Sha256};
use smart_common::db::{parse_uuid, Datum};
use smart_common::{Error, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One uploaded row, already validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    pub text: String,
    /// Label name when the uploader supplied one
    pub label: Option<String>,
}

impl DataRow {
    pub fn unlabeled(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: None,
        }
    }

    pub fn labeled(text: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            label: Some(label.into()),
        }
    }
}

/// Result of [`persist_data`]
#[derive(Debug, Clone, Default)]
pub struct PersistedData {
    /// Ids of the created data, in upload order
    pub data_ids: Vec<Uuid>,
    /// Created data that carried a label
    pub labeled: usize,
    /// Rows skipped because their text already exists in the project
    pub duplicates_skipped: usize,
}

/// Hex SHA-256 of a datum's text
pub fn hash_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Persist rows as data of `project_id` in `training_set`
///
/// Labeled rows also get a `data_labels` entry in the same training set. An
/// unknown label name is rejected with `Error::InvalidInput`.
pub async fn persist_data(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    rows: &[DataRow],
    training_set: i64,
    upload_id: Uuid,
    dedup: bool,
) -> Result<PersistedData> {
    let label_ids = label_ids_by_name(&mut *conn, project_id).await?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut persisted = PersistedData::default();

    for row in rows {
        let hash = hash_text(&row.text);

        if dedup {
            let duplicate_in_upload = !seen.insert(hash.clone());
            let duplicate_in_project = !duplicate_in_upload && hash_exists(&mut *conn, project_id, &hash).await?;
            if duplicate_in_upload || duplicate_in_project {
                persisted.duplicates_skipped += 1;
                continue;
            }
        }

        let label_id = match &row.label {
            Some(name) => Some(*label_ids.get(name).ok_or_else(|| {
                Error::InvalidInput(format!("label '{}' is not defined for project {}", name, project_id))
            })?),
            None => None,
        };

        let data_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO data (id, project_id, training_set, text, hash, upload_id)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(data_id.to_string())
        .bind(project_id.to_string())
        .bind(training_set)
        .bind(&row.text)
        .bind(&hash)
        .bind(upload_id.to_string())
        .execute(&mut *conn)
        .await?;

        if let Some(label_id) = label_id {
            sqlx::query(
                "INSERT INTO data_labels (data_id, label_id, profile_id, training_set) VALUES (?, ?, NULL, ?)",
            )
            .bind(data_id.to_string())
            .bind(label_id.to_string())
            .bind(training_set)
            .execute(&mut *conn)
            .await?;
            persisted.labeled += 1;
        }

        persisted.data_ids.push(data_id);
    }

    Ok(persisted)
}

async fn label_ids_by_name(conn: &mut SqliteConnection, project_id: Uuid) -> Result<HashMap<String, Uuid>> {
    let rows = sqlx::query("SELECT id, name FROM labels WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_all(conn)
        .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let name: String = row.get("name");
            Ok((name, parse_uuid("labels.id", &id)?))
        })
        .collect()
}

async fn hash_exists(conn: &mut SqliteConnection, project_id: Uuid, hash: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM data WHERE project_id = ? AND hash = ?)")
            .bind(project_id.to_string())
            .bind(hash)
            .fetch_one(conn)
            .await?;

    Ok(exists)
}

/// Load data by id; missing ids are silently absent from the result
pub async fn load_data(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<Datum>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT id, project_id, training_set, text, hash FROM data WHERE id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(id.to_string());
    }
    separated.push_unseparated(")");

    let rows = builder.build().fetch_all(pool).await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let project_id: String = row.get("project_id");
            Ok(Datum {
                id: parse_uuid("data.id", &id)?,
                project_id: parse_uuid("data.project_id", &project_id)?,
                training_set: row.get("training_set"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
        })
        .collect()
}

pub async fn count_data(pool: &SqlitePool, project_id: Uuid) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data WHERE project_id = ?")
        .bind(project_id.to_string())
        .fetch_one(pool)
        .await?;

    Ok(count.max(0) as u64)
}

/// Replace the feature vector of a datum
pub async fn upsert_vector(pool: &SqlitePool, data_id: Uuid, vector_json: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO data_vectors (data_id, vector) VALUES (?, ?)
        ON CONFLICT(data_id) DO UPDATE SET vector = excluded.vector, created_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(data_id.to_string())
    .bind(vector_json)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn count_vectors(pool: &SqlitePool, project_id: Uuid) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM data_vectors v JOIN data d ON d.id = v.data_id WHERE d.project_id = ?",
    )
    .bind(project_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count.max(0) as u64)
}

/// Record a model prediction for a datum
pub async fn set_prediction(pool: &SqlitePool, data_id: Uuid, label_id: Uuid, score: f64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO data_predictions (data_id, label_id, score) VALUES (?, ?, ?)
        ON CONFLICT(data_id) DO UPDATE SET label_id = excluded.label_id, score = excluded.score
        "#,
    )
    .bind(data_id.to_string())
    .bind(label_id.to_string())
    .bind(score)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record a human label for a datum in `training_set`
pub async fn label_datum(
    pool: &SqlitePool,
    data_id: Uuid,
    label_id: Uuid,
    profile_id: Uuid,
    training_set: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO data_labels (data_id, label_id, profile_id, training_set) VALUES (?, ?, ?, ?)
        ON CONFLICT(data_id) DO UPDATE SET
            label_id = excluded.label_id,
            profile_id = excluded.profile_id,
            training_set = excluded.training_set
        "#,
    )
    .bind(data_id.to_string())
    .bind(label_id.to_string())
    .bind(profile_id.to_string())
    .bind(training_set)
    .execute(pool)
    .await?;

    Ok(())
}
