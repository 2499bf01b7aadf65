//! Queue, DataQueue and AssignedData persistence

use crate::selection::Candidate;
use smart_common::db::{parse_uuid, Queue};
use smart_common::{Error, Result};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

pub async fn add_queue(conn: &mut SqliteConnection, project_id: Uuid, length: u32) -> Result<Queue> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO queues (id, project_id, length) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(project_id.to_string())
        .bind(i64::from(length))
        .execute(conn)
        .await?;

    Ok(Queue {
        id,
        project_id,
        length,
    })
}

pub async fn get_queue(conn: &mut SqliteConnection, queue_id: Uuid) -> Result<Queue> {
    let row = sqlx::query("SELECT id, project_id, length FROM queues WHERE id = ?")
        .bind(queue_id.to_string())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("queue {}", queue_id)))?;

    let project_id: String = row.get("project_id");
    let length: i64 = row.get("length");

    Ok(Queue {
        id: queue_id,
        project_id: parse_uuid("queues.project_id", &project_id)?,
        length: u32::try_from(length).unwrap_or(0),
    })
}

/// Take the queue's write claim for the current transaction
///
/// Bumping `fill_version` is a write, so SQLite hands this transaction the
/// write lock before it reads occupancy; a concurrent fill of the same queue
/// waits until this one commits.
pub async fn claim_queue(conn: &mut SqliteConnection, queue_id: Uuid) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar(
        "UPDATE queues SET fill_version = fill_version + 1 WHERE id = ? RETURNING fill_version",
    )
    .bind(queue_id.to_string())
    .fetch_optional(conn)
    .await?;

    version.ok_or_else(|| Error::NotFound(format!("queue {}", queue_id)))
}

pub async fn occupancy(conn: &mut SqliteConnection, queue_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM data_queue WHERE queue_id = ?")
        .bind(queue_id.to_string())
        .fetch_one(conn)
        .await?;

    Ok(count.max(0) as usize)
}

/// Unlabeled project data that is neither queued nor assigned anywhere
pub async fn fill_candidates(conn: &mut SqliteConnection, project_id: Uuid) -> Result<Vec<Candidate>> {
    let rows = sqlx::query(
        r#"
        SELECT d.id AS id, p.score AS score
        FROM data d
        LEFT JOIN data_predictions p ON p.data_id = d.id
        WHERE d.project_id = ?
          AND NOT EXISTS (SELECT 1 FROM data_labels l WHERE l.data_id = d.id)
          AND NOT EXISTS (SELECT 1 FROM data_queue q WHERE q.data_id = d.id)
          AND NOT EXISTS (SELECT 1 FROM assigned_data a WHERE a.data_id = d.id)
        ORDER BY d.rowid
        "#,
    )
    .bind(project_id.to_string())
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            let id: String = row.get("id");
            Ok(Candidate {
                data_id: parse_uuid("data.id", &id)?,
                score: row.get("score"),
            })
        })
        .collect()
}

/// Insert a DataQueue row; false when the datum is already queued
pub async fn insert_data_queue(conn: &mut SqliteConnection, queue_id: Uuid, data_id: Uuid) -> Result<bool> {
    let result = sqlx::query("INSERT OR IGNORE INTO data_queue (queue_id, data_id) VALUES (?, ?)")
        .bind(queue_id.to_string())
        .bind(data_id.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn queued_data(conn: &mut SqliteConnection, queue_id: Uuid) -> Result<Vec<Uuid>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT data_id FROM data_queue WHERE queue_id = ? ORDER BY rowid")
            .bind(queue_id.to_string())
            .fetch_all(conn)
            .await?;

    ids.iter().map(|id| parse_uuid("data_queue.data_id", id)).collect()
}

/// Oldest queued datum of the project not already checked out by `profile_id`
pub async fn next_queued_for(
    conn: &mut SqliteConnection,
    project_id: Uuid,
    profile_id: Uuid,
) -> Result<Option<(Uuid, Uuid)>> {
    let row = sqlx::query(
        r#"
        SELECT dq.queue_id AS queue_id, dq.data_id AS data_id
        FROM data_queue dq
        JOIN queues q ON q.id = dq.queue_id
        WHERE q.project_id = ?
          AND NOT EXISTS (
              SELECT 1 FROM assigned_data a
              WHERE a.data_id = dq.data_id AND a.profile_id = ?
          )
        ORDER BY dq.rowid
        LIMIT 1
        "#,
    )
    .bind(project_id.to_string())
    .bind(profile_id.to_string())
    .fetch_optional(conn)
    .await?;

    match row {
        Some(row) => {
            let queue_id: String = row.get("queue_id");
            let data_id: String = row.get("data_id");
            Ok(Some((
                parse_uuid("data_queue.queue_id", &queue_id)?,
                parse_uuid("data_queue.data_id", &data_id)?,
            )))
        }
        None => Ok(None),
    }
}

/// Move a DataQueue entry into AssignedData for `profile_id`
pub async fn checkout(
    conn: &mut SqliteConnection,
    queue_id: Uuid,
    data_id: Uuid,
    profile_id: Uuid,
) -> Result<()> {
    sqlx::query("INSERT INTO assigned_data (profile_id, data_id, queue_id) VALUES (?, ?, ?)")
        .bind(profile_id.to_string())
        .bind(data_id.to_string())
        .bind(queue_id.to_string())
        .execute(&mut *conn)
        .await?;

    sqlx::query("DELETE FROM data_queue WHERE queue_id = ? AND data_id = ?")
        .bind(queue_id.to_string())
        .bind(data_id.to_string())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Outcome of [`release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The profile held no checkout of the datum
    NotHeld,
    /// Back on the queue it was checked out from
    Requeued,
    /// That queue was full; the datum is back in the unqueued pool
    Unqueued,
}

/// Drop a checkout and put the datum back on the queue it came from
///
/// The queue never grows past its length: when a top-up refilled the slot in
/// the meantime, the datum goes back to the pool for a later fill instead.
pub async fn release(conn: &mut SqliteConnection, profile_id: Uuid, data_id: Uuid) -> Result<Released> {
    let queue_id: Option<String> = sqlx::query_scalar(
        "DELETE FROM assigned_data WHERE profile_id = ? AND data_id = ? RETURNING queue_id",
    )
    .bind(profile_id.to_string())
    .bind(data_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(queue_id) = queue_id else {
        return Ok(Released::NotHeld);
    };

    // Conditional insert: the capacity check and the write are one statement
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO data_queue (queue_id, data_id)
        SELECT q.id, ?
        FROM queues q
        WHERE q.id = ?
          AND (SELECT COUNT(*) FROM data_queue WHERE queue_id = q.id) < q.length
        "#,
    )
    .bind(data_id.to_string())
    .bind(&queue_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        Ok(Released::Requeued)
    } else {
        Ok(Released::Unqueued)
    }
}

pub async fn assigned_count(conn: &mut SqliteConnection, profile_id: Uuid) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assigned_data WHERE profile_id = ?")
        .bind(profile_id.to_string())
        .fetch_one(conn)
        .await?;

    Ok(count.max(0) as usize)
}
