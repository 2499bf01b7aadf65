//! Queue Fill Selector
//!
//! Tops a queue up to its length with unlabeled data of its project. The
//! candidate pool excludes anything already queued or assigned, so a repeat
//! fill only adds what the first one could not.

use crate::db::queues;
use crate::selection::SelectionPolicy;
use crate::utils::{begin_monitored, retry_on_lock};
use smart_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum time a fill waits out SQLite lock contention
const FILL_LOCK_WAIT_MS: u64 = 5_000;

/// Result of one fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillOutcome {
    /// DataQueue rows created by this fill
    pub inserted: usize,
    /// Queue occupancy after the fill
    pub occupancy: usize,
    /// Queue length
    pub length: usize,
}

/// Fill `queue_id` in its own transaction
///
/// Unknown queue → `Error::NotFound`. An exhausted pool is `Ok` with
/// `inserted == 0`.
pub async fn fill_queue(
    pool: &SqlitePool,
    queue_id: Uuid,
    policy: &dyn SelectionPolicy,
) -> Result<FillOutcome> {
    retry_on_lock("fill_queue", FILL_LOCK_WAIT_MS, || async {
        let mut tx = begin_monitored(pool, "fill_queue").await?;
        let outcome = fill_queue_in(tx.conn(), queue_id, policy).await?;
        tx.commit().await?;
        Ok(outcome)
    })
    .await
}

/// Fill `queue_id` inside the caller's transaction
pub async fn fill_queue_in(
    conn: &mut SqliteConnection,
    queue_id: Uuid,
    policy: &dyn SelectionPolicy,
) -> Result<FillOutcome> {
    // First write of the transaction: serialises fills of this queue
    queues::claim_queue(&mut *conn, queue_id).await?;

    let queue = queues::get_queue(&mut *conn, queue_id).await?;
    let length = queue.length as usize;
    let occupancy = queues::occupancy(&mut *conn, queue_id).await?;
    let free = length.saturating_sub(occupancy);

    if free == 0 {
        debug!(%queue_id, occupancy, length, "Queue already full");
        return Ok(FillOutcome {
            inserted: 0,
            occupancy,
            length,
        });
    }

    let candidates = queues::fill_candidates(&mut *conn, queue.project_id).await?;
    let pool_size = candidates.len();
    let picked = policy.pick(candidates, free);

    let mut inserted = 0;
    for candidate in picked.into_iter().take(free) {
        if queues::insert_data_queue(&mut *conn, queue_id, candidate.data_id).await? {
            inserted += 1;
        }
    }

    info!(
        %queue_id,
        project_id = %queue.project_id,
        policy = policy.name(),
        pool_size,
        inserted,
        occupancy = occupancy + inserted,
        length,
        "Filled queue"
    );

    Ok(FillOutcome {
        inserted,
        occupancy: occupancy + inserted,
        length,
    })
}
