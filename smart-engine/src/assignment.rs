//! Annotator checkout of queued data

use crate::db::queues::{self, Released};
use crate::utils::{begin_monitored, retry_on_lock};
use smart_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

const ASSIGN_LOCK_WAIT_MS: u64 = 5_000;

/// Check out the next queued datum of `project_id` to `profile_id`
///
/// The datum moves from the queue into the profile's assignments. Returns
/// `None` when nothing is queued.
pub async fn assign_datum(pool: &SqlitePool, profile_id: Uuid, project_id: Uuid) -> Result<Option<Uuid>> {
    retry_on_lock("assign_datum", ASSIGN_LOCK_WAIT_MS, || async {
        let mut tx = begin_monitored(pool, "assign_datum").await?;

        let Some((queue_id, data_id)) =
            queues::next_queued_for(tx.conn(), project_id, profile_id).await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        queues::checkout(tx.conn(), queue_id, data_id, profile_id).await?;
        tx.commit().await?;

        tracing::debug!(%profile_id, %project_id, %data_id, "Datum assigned");
        Ok(Some(data_id))
    })
    .await
}

/// Release a checkout
///
/// The datum returns to its queue while the queue has room, otherwise to the
/// unqueued pool so the next fill can pick it up again.
pub async fn unassign_datum(pool: &SqlitePool, profile_id: Uuid, data_id: Uuid) -> Result<Released> {
    let mut tx = begin_monitored(pool, "unassign_datum").await?;
    let released = queues::release(tx.conn(), profile_id, data_id).await?;
    tx.commit().await?;

    match released {
        Released::Requeued => tracing::debug!(%profile_id, %data_id, "Datum returned to queue"),
        Released::Unqueued => {
            tracing::debug!(%profile_id, %data_id, "Queue full, datum returned to the pool")
        }
        Released::NotHeld => {}
    }
    Ok(released)
}
