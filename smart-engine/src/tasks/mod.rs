//! Background task execution
//!
//! The pipeline describes its work as [`TaskDescriptor`]s and hands them to a
//! [`TaskExecutor`]. Delivery is at-least-once: every descriptor carries an
//! idempotency key, a repeated key returns the handle of the first submission,
//! and handlers must tolerate re-running an attempt.
//!
//! Fan-in is expressed with [`TaskExecutor::submit_join`]: the successor is
//! dispatched by whichever predecessor completes last (see [`join`]).

pub mod join;
pub mod local;

pub use join::{JoinBarrier, JoinProgress};
pub use local::{ExecutorConfig, LocalTaskExecutor};

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Work the pipeline can schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    /// Compute feature vectors for one partition of a batch
    Vectorize {
        batch_id: Uuid,
        project_id: Uuid,
        data_ids: Vec<Uuid>,
    },
    /// Decide whether the batch's project should start training
    CheckAndTrigger { batch_id: Uuid, project_id: Uuid },
}

impl TaskKind {
    pub fn batch_id(&self) -> Uuid {
        match self {
            TaskKind::Vectorize { batch_id, .. } | TaskKind::CheckAndTrigger { batch_id, .. } => {
                *batch_id
            }
        }
    }

    pub fn project_id(&self) -> Uuid {
        match self {
            TaskKind::Vectorize { project_id, .. }
            | TaskKind::CheckAndTrigger { project_id, .. } => *project_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Vectorize { .. } => "vectorize",
            TaskKind::CheckAndTrigger { .. } => "check_and_trigger",
        }
    }
}

/// A unit of work plus the key that makes resubmission safe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub idempotency_key: String,
    pub kind: TaskKind,
}

impl TaskDescriptor {
    pub fn new(idempotency_key: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            kind,
        }
    }
}

/// Lifecycle of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Waiting for predecessors or a worker permit
    Pending,
    /// An attempt is executing
    Running,
    Succeeded,
    /// Retry budget exhausted
    Failed,
    /// Never ran because a predecessor failed
    Skipped,
}

impl TaskStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Observer for one submitted task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    key: String,
    status: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    pub(crate) fn new(id: Uuid, key: String, status: watch::Receiver<TaskStatus>) -> Self {
        Self { id, key, status }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current status without waiting
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Wait until the task reaches a final status
    pub async fn wait(&self) -> TaskStatus {
        let mut rx = self.status.clone();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_final() {
                return status;
            }
            if rx.changed().await.is_err() {
                // Executor dropped; report whatever was last published
                return *rx.borrow();
            }
        }
    }
}

/// Why a task attempt did not succeed
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Failed(#[from] smart_common::Error),

    #[error("executor shut down")]
    ShutDown,
}

/// Executes task bodies on behalf of an executor
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run one attempt
    ///
    /// May be called again for the same descriptor after a failure or a
    /// timeout, so it must be idempotent.
    async fn run(&self, task: &TaskDescriptor) -> smart_common::Result<()>;

    /// Called once when the task has failed for good
    async fn on_failed(&self, task: &TaskDescriptor, error: &TaskError);
}

/// Schedules tasks with at-least-once delivery
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Schedule `task`; a known idempotency key returns the existing handle
    async fn submit(&self, task: TaskDescriptor) -> smart_common::Result<TaskHandle>;

    /// Schedule `successor` to run once every predecessor has succeeded
    ///
    /// With no predecessors the successor is dispatched at once. If any
    /// predecessor fails the successor ends as [`TaskStatus::Skipped`].
    async fn submit_join(
        &self,
        predecessors: Vec<TaskHandle>,
        successor: TaskDescriptor,
    ) -> smart_common::Result<TaskHandle>;

    /// Stop accepting work and wait for running tasks to wind down
    async fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_statuses() {
        assert!(!TaskStatus::Pending.is_final());
        assert!(!TaskStatus::Running.is_final());
        assert!(TaskStatus::Succeeded.is_final());
        assert!(TaskStatus::Failed.is_final());
        assert!(TaskStatus::Skipped.is_final());
    }

    #[test]
    fn test_kind_accessors() {
        let batch_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let kind = TaskKind::CheckAndTrigger {
            batch_id,
            project_id,
        };
        assert_eq!(kind.batch_id(), batch_id);
        assert_eq!(kind.project_id(), project_id);
        assert_eq!(kind.name(), "check_and_trigger");
    }

    #[tokio::test]
    async fn test_handle_wait_returns_final_status() {
        let (tx, rx) = watch::channel(TaskStatus::Pending);
        let handle = TaskHandle::new(Uuid::new_v4(), "k".to_string(), rx);

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait().await })
        };

        tx.send_replace(TaskStatus::Running);
        tx.send_replace(TaskStatus::Succeeded);

        assert_eq!(waiter.await.unwrap(), TaskStatus::Succeeded);
        assert_eq!(handle.status(), TaskStatus::Succeeded);
    }
}
