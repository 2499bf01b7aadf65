//! Pipeline batch state persistence
//!
//! Every state change is a compare-and-swap on `pipeline_batches.state`, so
//! two workers racing on the same batch cannot both win a transition.

use smart_common::db::parse_uuid;
use smart_common::events::BatchState;
use smart_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

/// Persisted view of one submitted batch
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub batch_id: Uuid,
    pub project_id: Uuid,
    pub training_set: i64,
    pub state: BatchState,
    pub total_tasks: u32,
    pub outstanding: u32,
    pub error: Option<String>,
    pub trigger_decision: Option<TriggerDecision>,
}

/// How far a trigger check got with the project's training slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// The check holds the slot; the trainer may not have been asked yet
    Claimed,
    /// The trainer accepted the request
    Started,
}

impl TriggerDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerDecision::Claimed => "CLAIMED",
            TriggerDecision::Started => "TRAINING_STARTED",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "CLAIMED" => Ok(TriggerDecision::Claimed),
            "TRAINING_STARTED" => Ok(TriggerDecision::Started),
            other => Err(Error::Internal(format!("unknown trigger decision '{}'", other))),
        }
    }
}

/// Outcome of recording one vectorization success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskProgress {
    /// Counted; this many tasks are still outstanding
    Counted { outstanding: u32 },
    /// Already counted earlier, nothing changed
    AlreadyCounted,
}

/// State a freshly submitted batch moves to: VECTORIZING, or ALL_VECTORIZED
/// when there is nothing to vectorize
pub fn first_state(task_count: usize) -> BatchState {
    if task_count == 0 {
        BatchState::AllVectorized
    } else {
        BatchState::Vectorizing
    }
}

/// Insert a batch and one PENDING row per task key
///
/// The batch row is written already past SUBMITTED, in the same transaction
/// as its task rows, so no committed batch waits on a second write to become
/// runnable. Returns the stored state.
pub async fn insert_batch(
    pool: &SqlitePool,
    batch_id: Uuid,
    project_id: Uuid,
    training_set: i64,
    task_keys: &[String],
) -> Result<BatchState> {
    let state = first_state(task_keys.len());
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_batches (batch_id, project_id, training_set, state, total_tasks, outstanding)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(batch_id.to_string())
    .bind(project_id.to_string())
    .bind(training_set)
    .bind(state.as_str())
    .bind(task_keys.len() as i64)
    .bind(task_keys.len() as i64)
    .execute(&mut *tx)
    .await?;

    for key in task_keys {
        sqlx::query("INSERT INTO pipeline_tasks (task_key, batch_id) VALUES (?, ?)")
            .bind(key)
            .bind(batch_id.to_string())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(state)
}

pub async fn batch_exists(pool: &SqlitePool, batch_id: Uuid) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pipeline_batches WHERE batch_id = ?)")
            .bind(batch_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(exists)
}

pub async fn get_batch(pool: &SqlitePool, batch_id: Uuid) -> Result<BatchRecord> {
    let row = sqlx::query(
        r#"
        SELECT batch_id, project_id, training_set, state, total_tasks, outstanding, error,
               trigger_decision
        FROM pipeline_batches
        WHERE batch_id = ?
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;

    let project_id: String = row.get("project_id");
    let state: String = row.get("state");
    let total: i64 = row.get("total_tasks");
    let outstanding: i64 = row.get("outstanding");
    let decision: Option<String> = row.get("trigger_decision");

    Ok(BatchRecord {
        batch_id,
        project_id: parse_uuid("pipeline_batches.project_id", &project_id)?,
        training_set: row.get("training_set"),
        state: BatchState::from_str(&state).map_err(Error::Internal)?,
        total_tasks: u32::try_from(total).unwrap_or(0),
        outstanding: u32::try_from(outstanding).unwrap_or(0),
        error: row.get("error"),
        trigger_decision: decision.as_deref().map(TriggerDecision::parse).transpose()?,
    })
}

/// Move a batch from `from` to `to`
///
/// Returns false when the batch is no longer in `from`. Rejects edges the
/// batch state machine does not allow.
pub async fn transition(
    pool: &SqlitePool,
    batch_id: Uuid,
    from: BatchState,
    to: BatchState,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(Error::Internal(format!(
            "invalid batch transition {} -> {}",
            from, to
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE pipeline_batches
        SET state = ?, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND state = ?
        "#,
    )
    .bind(to.as_str())
    .bind(batch_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Move a batch into FAILED from any non-terminal state
///
/// Returns the state the batch left, or None if it was already terminal.
pub async fn fail_batch(pool: &SqlitePool, batch_id: Uuid, reason: &str) -> Result<Option<BatchState>> {
    loop {
        let record = get_batch(pool, batch_id).await?;
        if record.state.is_terminal() {
            return Ok(None);
        }
        if !record.state.can_transition_to(BatchState::Failed) {
            // ALL_VECTORIZED only moves on through CHECKING
            if !transition(pool, batch_id, record.state, BatchState::Checking).await? {
                continue;
            }
            if transition_failed(pool, batch_id, BatchState::Checking, reason).await? {
                return Ok(Some(BatchState::Checking));
            }
            continue;
        }
        if transition_failed(pool, batch_id, record.state, reason).await? {
            return Ok(Some(record.state));
        }
    }
}

async fn transition_failed(
    pool: &SqlitePool,
    batch_id: Uuid,
    from: BatchState,
    reason: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_batches
        SET state = ?, error = ?, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND state = ?
        "#,
    )
    .bind(BatchState::Failed.as_str())
    .bind(reason)
    .bind(batch_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Claim the project's training slot for a CHECKING batch
///
/// Sets the project's training flag and records the claim on the batch in
/// one transaction. Returns false when another check holds the slot or the
/// batch is no longer CHECKING.
pub async fn claim_training(pool: &SqlitePool, batch_id: Uuid, project_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let slot = sqlx::query(
        "UPDATE projects SET training_in_progress = 1 WHERE id = ? AND training_in_progress = 0",
    )
    .bind(project_id.to_string())
    .execute(&mut *tx)
    .await?;
    if slot.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let claimed = sqlx::query(
        r#"
        UPDATE pipeline_batches
        SET trigger_decision = ?, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND state = ? AND trigger_decision IS NULL
        "#,
    )
    .bind(TriggerDecision::Claimed.as_str())
    .bind(batch_id.to_string())
    .bind(BatchState::Checking.as_str())
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    tx.commit().await?;
    Ok(true)
}

/// Record that the trainer accepted the batch's claimed request
pub async fn record_training_started(pool: &SqlitePool, batch_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_batches
        SET trigger_decision = ?, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND trigger_decision = ?
        "#,
    )
    .bind(TriggerDecision::Started.as_str())
    .bind(batch_id.to_string())
    .bind(TriggerDecision::Claimed.as_str())
    .execute(pool)
    .await?;

    Ok(())
}

/// Give back a training slot the batch claimed but never started
///
/// Returns false when the batch held no claim; the project flag is then left
/// alone.
pub async fn release_training_claim(pool: &SqlitePool, batch_id: Uuid, project_id: Uuid) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let released = sqlx::query(
        r#"
        UPDATE pipeline_batches
        SET trigger_decision = NULL, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND trigger_decision = ?
        "#,
    )
    .bind(batch_id.to_string())
    .bind(TriggerDecision::Claimed.as_str())
    .execute(&mut *tx)
    .await?;
    if released.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("UPDATE projects SET training_in_progress = 0 WHERE id = ?")
        .bind(project_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// Count one vectorization success toward the batch
///
/// The task row flips PENDING -> SUCCEEDED at most once; only that flip
/// decrements `outstanding`.
pub async fn record_task_success(pool: &SqlitePool, batch_id: Uuid, task_key: &str) -> Result<TaskProgress> {
    let mut tx = pool.begin().await?;

    let flipped = sqlx::query(
        r#"
        UPDATE pipeline_tasks
        SET state = 'SUCCEEDED', updated_at = CURRENT_TIMESTAMP
        WHERE task_key = ? AND batch_id = ? AND state = 'PENDING'
        "#,
    )
    .bind(task_key)
    .bind(batch_id.to_string())
    .execute(&mut *tx)
    .await?;

    if flipped.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(TaskProgress::AlreadyCounted);
    }

    let outstanding: i64 = sqlx::query_scalar(
        r#"
        UPDATE pipeline_batches
        SET outstanding = outstanding - 1, updated_at = CURRENT_TIMESTAMP
        WHERE batch_id = ? AND outstanding > 0
        RETURNING outstanding
        "#,
    )
    .bind(batch_id.to_string())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| Error::Internal(format!("batch {} has no outstanding tasks", batch_id)))?;

    tx.commit().await?;

    Ok(TaskProgress::Counted {
        outstanding: u32::try_from(outstanding).unwrap_or(0),
    })
}

pub async fn mark_task_failed(pool: &SqlitePool, task_key: &str, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_tasks
        SET state = 'FAILED', last_error = ?, updated_at = CURRENT_TIMESTAMP
        WHERE task_key = ? AND state = 'PENDING'
        "#,
    )
    .bind(error)
    .bind(task_key)
    .execute(pool)
    .await?;

    Ok(())
}

/// Batch ids of a project, newest first
pub async fn list_batches(pool: &SqlitePool, project_id: Uuid) -> Result<Vec<BatchRecord>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT batch_id FROM pipeline_batches WHERE project_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        records.push(get_batch(pool, parse_uuid("pipeline_batches.batch_id", &id)?).await?);
    }
    Ok(records)
}
