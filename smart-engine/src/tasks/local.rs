//! In-process task executor
//!
//! Tasks run as tokio tasks, at most `concurrency` at a time. Each attempt is
//! bounded by a timeout; failed attempts are retried with exponential backoff
//! until the retry budget is spent, after which the handler's `on_failed` is
//! called once.
//!
//! Join successors wait in the registry behind a [`JoinBarrier`]. Publishing a
//! predecessor's final status and reading its dependents happen under the
//! same registry lock as join registration, so a join can never miss a
//! completion that raced with it.
//!
//! Finished tasks leave the registry as soon as they settle. Their keys stay
//! deduplicated for the most recent `retained_keys` completions only; an older
//! key submitted again runs again, which the handlers already tolerate.

use super::join::{JoinBarrier, JoinProgress};
use super::{TaskDescriptor, TaskError, TaskExecutor, TaskHandle, TaskHandler, TaskStatus};
use async_trait::async_trait;
use futures::future::BoxFuture;
use smart_common::config::EngineConfig;
use smart_common::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

/// Retry, timeout and concurrency limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Attempts per task, including the first
    pub retry_budget: u32,
    /// Delay before the second attempt; doubles afterwards
    pub initial_backoff: Duration,
    pub attempt_timeout: Duration,
    /// Tasks allowed to run at once
    pub concurrency: usize,
    /// Finished task keys remembered for duplicate detection
    pub retained_keys: usize,
}

pub const DEFAULT_RETAINED_KEYS: usize = 1024;

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry_budget: config.task_retry_budget.max(1),
            initial_backoff: Duration::from_millis(config.task_retry_backoff_ms),
            attempt_timeout: Duration::from_millis(config.task_timeout_ms),
            concurrency: config.worker_concurrency.max(1),
            retained_keys: DEFAULT_RETAINED_KEYS,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

struct Entry {
    key: String,
    status: watch::Sender<TaskStatus>,
    /// Join ids waiting on this task
    dependents: Vec<Uuid>,
}

struct PendingJoin {
    barrier: JoinBarrier,
    successor: TaskDescriptor,
}

struct Registry {
    by_key: HashMap<String, TaskHandle>,
    /// Tasks that have not settled yet
    entries: HashMap<Uuid, Entry>,
    /// Keyed by the successor's task id
    joins: HashMap<Uuid, PendingJoin>,
    /// Settled keys still in `by_key`, oldest first
    finished: VecDeque<String>,
    retained_keys: usize,
}

impl Registry {
    fn new(retained_keys: usize) -> Self {
        Self {
            by_key: HashMap::new(),
            entries: HashMap::new(),
            joins: HashMap::new(),
            finished: VecDeque::new(),
            retained_keys,
        }
    }

    fn register(&mut self, key: &str) -> (Uuid, TaskHandle) {
        let id = Uuid::new_v4();
        let (tx, rx) = watch::channel(TaskStatus::Pending);
        let handle = TaskHandle::new(id, key.to_string(), rx);

        self.entries.insert(
            id,
            Entry {
                key: key.to_string(),
                status: tx,
                dependents: Vec::new(),
            },
        );
        self.by_key.insert(key.to_string(), handle.clone());

        (id, handle)
    }

    fn publish(&self, id: Uuid, status: TaskStatus) {
        if let Some(entry) = self.entries.get(&id) {
            entry.status.send_replace(status);
        }
    }

    /// Publish a final status and resolve every join waiting on it
    ///
    /// Returns the successors that became ready to run. A failure cascades:
    /// abandoned successors are themselves settled as skipped.
    fn settle(&mut self, id: Uuid, status: TaskStatus) -> Vec<(Uuid, TaskDescriptor)> {
        let mut ready = Vec::new();
        let mut work = vec![(id, status)];

        while let Some((id, status)) = work.pop() {
            // Handles keep the last published status once the sender is gone
            let dependents = match self.entries.remove(&id) {
                Some(entry) => {
                    entry.status.send_replace(status);
                    self.retire(entry.key);
                    entry.dependents
                }
                None => continue,
            };

            let success = status == TaskStatus::Succeeded;
            for join_id in dependents {
                let progress = match self.joins.get_mut(&join_id) {
                    Some(join) => join.barrier.complete_one(success),
                    None => continue,
                };

                match progress {
                    JoinProgress::Ready => {
                        if let Some(join) = self.joins.remove(&join_id) {
                            ready.push((join_id, join.successor));
                        }
                    }
                    JoinProgress::Abandoned => {
                        if let Some(join) = self.joins.remove(&join_id) {
                            debug!(
                                task = %join.successor.idempotency_key,
                                "Skipping task after predecessor failure"
                            );
                        }
                        work.push((join_id, TaskStatus::Skipped));
                    }
                    JoinProgress::Waiting { .. } | JoinProgress::Resolved => {}
                }
            }
        }

        ready
    }

    /// Keep a settled key for duplicate detection, forgetting the oldest
    fn retire(&mut self, key: String) {
        self.finished.push_back(key);
        while self.finished.len() > self.retained_keys {
            if let Some(old) = self.finished.pop_front() {
                self.by_key.remove(&old);
            }
        }
    }
}

struct Inner {
    handler: Arc<dyn TaskHandler>,
    config: ExecutorConfig,
    permits: Semaphore,
    registry: Mutex<Registry>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Inner {
    fn dispatch(self: &Arc<Self>, id: Uuid, task: TaskDescriptor) {
        let inner = Arc::clone(self);
        let fut: BoxFuture<'static, ()> = Box::pin(async move { inner.execute(id, task).await });
        self.tracker.spawn(fut);
    }

    async fn execute(self: Arc<Self>, id: Uuid, task: TaskDescriptor) {
        let outcome = self.attempt_all(id, &task).await;

        let status = match &outcome {
            Ok(()) => TaskStatus::Succeeded,
            Err(error) => {
                self.handler.on_failed(&task, error).await;
                TaskStatus::Failed
            }
        };

        let ready = self.registry.lock().await.settle(id, status);
        for (successor_id, successor) in ready {
            debug!(task = %successor.idempotency_key, "All predecessors succeeded, dispatching");
            self.dispatch(successor_id, successor);
        }
    }

    async fn attempt_all(&self, id: Uuid, task: &TaskDescriptor) -> std::result::Result<(), TaskError> {
        let budget = self.config.retry_budget.max(1);
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match self.attempt_once(id, task).await {
                Ok(()) => {
                    debug!(task = %task.idempotency_key, kind = task.kind.name(), attempt, "Task succeeded");
                    return Ok(());
                }
                Err(error) => error,
            };

            if matches!(error, TaskError::ShutDown) || attempt >= budget {
                warn!(
                    task = %task.idempotency_key,
                    kind = task.kind.name(),
                    attempt,
                    error = %error,
                    "Giving up on task"
                );
                return Err(error);
            }

            warn!(
                task = %task.idempotency_key,
                kind = task.kind.name(),
                attempt,
                budget,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Task attempt failed, retrying"
            );

            self.registry.lock().await.publish(id, TaskStatus::Pending);

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.cancel.cancelled() => return Err(TaskError::ShutDown),
            }
            backoff = backoff.saturating_mul(2);
        }
    }

    async fn attempt_once(&self, id: Uuid, task: &TaskDescriptor) -> std::result::Result<(), TaskError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| TaskError::ShutDown)?,
            _ = self.cancel.cancelled() => return Err(TaskError::ShutDown),
        };

        self.registry.lock().await.publish(id, TaskStatus::Running);

        let timeout = self.config.attempt_timeout;
        tokio::select! {
            result = tokio::time::timeout(timeout, self.handler.run(task)) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(_) => Err(TaskError::Timeout(timeout)),
            },
            _ = self.cancel.cancelled() => Err(TaskError::ShutDown),
        }
    }
}

/// Executor running tasks on the current tokio runtime
#[derive(Clone)]
pub struct LocalTaskExecutor {
    inner: Arc<Inner>,
}

impl LocalTaskExecutor {
    pub fn new(handler: Arc<dyn TaskHandler>, config: ExecutorConfig) -> Self {
        let permits = Semaphore::new(config.concurrency.max(1));
        let registry = Mutex::new(Registry::new(config.retained_keys));
        Self {
            inner: Arc::new(Inner {
                handler,
                config,
                permits,
                registry,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Handle previously returned for `key`, if any
    pub async fn handle(&self, key: &str) -> Option<TaskHandle> {
        self.inner.registry.lock().await.by_key.get(key).cloned()
    }

    /// (keys, unsettled tasks, pending joins) currently held
    #[cfg(test)]
    async fn registry_size(&self) -> (usize, usize, usize) {
        let registry = self.inner.registry.lock().await;
        (registry.by_key.len(), registry.entries.len(), registry.joins.len())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(Error::Internal("task executor is shut down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskExecutor for LocalTaskExecutor {
    async fn submit(&self, task: TaskDescriptor) -> Result<TaskHandle> {
        self.ensure_open()?;

        let mut registry = self.inner.registry.lock().await;
        if let Some(existing) = registry.by_key.get(&task.idempotency_key) {
            debug!(task = %task.idempotency_key, "Duplicate submission, returning existing handle");
            return Ok(existing.clone());
        }

        let (id, handle) = registry.register(&task.idempotency_key);
        drop(registry);

        self.inner.dispatch(id, task);
        Ok(handle)
    }

    async fn submit_join(
        &self,
        predecessors: Vec<TaskHandle>,
        successor: TaskDescriptor,
    ) -> Result<TaskHandle> {
        self.ensure_open()?;

        let mut registry = self.inner.registry.lock().await;
        if let Some(existing) = registry.by_key.get(&successor.idempotency_key) {
            debug!(task = %successor.idempotency_key, "Duplicate join submission, returning existing handle");
            return Ok(existing.clone());
        }

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        let mut failed = false;

        for predecessor in &predecessors {
            if !seen.insert(predecessor.id()) {
                continue;
            }
            let status = match registry.entries.get(&predecessor.id()) {
                Some(entry) => *entry.status.borrow(),
                // Settled and pruned; the handle still holds its final status
                None if predecessor.status().is_final() => predecessor.status(),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "predecessor {} was not submitted to this executor",
                        predecessor.key()
                    )))
                }
            };
            match status {
                TaskStatus::Succeeded => {}
                TaskStatus::Failed | TaskStatus::Skipped => failed = true,
                TaskStatus::Pending | TaskStatus::Running => pending.push(predecessor.id()),
            }
        }

        let (id, handle) = registry.register(&successor.idempotency_key);

        if failed {
            debug!(task = %successor.idempotency_key, "Predecessor already failed, skipping");
            registry.settle(id, TaskStatus::Skipped);
            return Ok(handle);
        }

        if pending.is_empty() {
            drop(registry);
            self.inner.dispatch(id, successor);
            return Ok(handle);
        }

        for predecessor_id in &pending {
            if let Some(entry) = registry.entries.get_mut(predecessor_id) {
                entry.dependents.push(id);
            }
        }
        debug!(
            task = %successor.idempotency_key,
            waiting_on = pending.len(),
            "Join registered"
        );
        registry.joins.insert(
            id,
            PendingJoin {
                barrier: JoinBarrier::new(pending.len()),
                successor,
            },
        );

        Ok(handle)
    }

    async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        // Joins whose predecessors never finished will not run now
        let mut registry = self.inner.registry.lock().await;
        let stranded: Vec<Uuid> = registry.joins.keys().copied().collect();
        for id in stranded {
            registry.joins.remove(&id);
            registry.settle(id, TaskStatus::Skipped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// Handler driven by per-key scripts
    #[derive(Default)]
    struct ScriptedHandler {
        /// Key -> number of leading attempts that fail
        fail_first: HashMap<String, u32>,
        /// Key -> sleep per attempt
        delays: HashMap<String, Duration>,
        attempts: StdMutex<HashMap<String, u32>>,
        completed: StdMutex<Vec<String>>,
        failures: StdMutex<Vec<(String, String)>>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ScriptedHandler {
        fn attempts(&self, key: &str) -> u32 {
            self.attempts.lock().unwrap().get(key).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl TaskHandler for ScriptedHandler {
        async fn run(&self, task: &TaskDescriptor) -> Result<()> {
            let key = task.idempotency_key.clone();
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(key.clone()).or_insert(0);
                *n += 1;
                *n
            };

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delays.get(&key) {
                tokio::time::sleep(*delay).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if attempt <= self.fail_first.get(&key).copied().unwrap_or(0) {
                return Err(Error::Internal(format!("scripted failure {}", attempt)));
            }

            self.completed.lock().unwrap().push(key);
            Ok(())
        }

        async fn on_failed(&self, task: &TaskDescriptor, error: &TaskError) {
            self.failures
                .lock()
                .unwrap()
                .push((task.idempotency_key.clone(), error.to_string()));
        }
    }

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            retry_budget: 2,
            initial_backoff: Duration::from_millis(5),
            attempt_timeout: Duration::from_secs(5),
            concurrency: 4,
            retained_keys: 64,
        }
    }

    fn vectorize(key: &str) -> TaskDescriptor {
        TaskDescriptor::new(
            key,
            TaskKind::Vectorize {
                batch_id: Uuid::nil(),
                project_id: Uuid::nil(),
                data_ids: Vec::new(),
            },
        )
    }

    fn check(key: &str) -> TaskDescriptor {
        TaskDescriptor::new(
            key,
            TaskKind::CheckAndTrigger {
                batch_id: Uuid::nil(),
                project_id: Uuid::nil(),
            },
        )
    }

    #[tokio::test]
    async fn test_join_runs_after_every_predecessor() {
        let mut handler = ScriptedHandler::default();
        handler.delays.insert("v0".into(), Duration::from_millis(30));
        handler.delays.insert("v1".into(), Duration::from_millis(5));
        handler.delays.insert("v2".into(), Duration::from_millis(15));
        let handler = Arc::new(handler);
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let mut preds = Vec::new();
        for key in ["v0", "v1", "v2"] {
            preds.push(executor.submit(vectorize(key)).await.unwrap());
        }
        let join = executor.submit_join(preds.clone(), check("c")).await.unwrap();

        assert_eq!(join.wait().await, TaskStatus::Succeeded);
        for pred in &preds {
            assert_eq!(pred.status(), TaskStatus::Succeeded);
        }

        let completed = handler.completed.lock().unwrap().clone();
        assert_eq!(completed.len(), 4);
        assert_eq!(completed.last().map(String::as_str), Some("c"));
        assert_eq!(handler.attempts("c"), 1);
    }

    #[tokio::test]
    async fn test_join_without_predecessors_runs_immediately() {
        let handler = Arc::new(ScriptedHandler::default());
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let join = executor.submit_join(Vec::new(), check("c")).await.unwrap();

        assert_eq!(join.wait().await, TaskStatus::Succeeded);
        assert_eq!(handler.attempts("c"), 1);
    }

    #[tokio::test]
    async fn test_join_after_predecessors_already_finished() {
        let handler = Arc::new(ScriptedHandler::default());
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let pred = executor.submit(vectorize("v0")).await.unwrap();
        assert_eq!(pred.wait().await, TaskStatus::Succeeded);

        let join = executor.submit_join(vec![pred], check("c")).await.unwrap();
        assert_eq!(join.wait().await, TaskStatus::Succeeded);
        assert_eq!(handler.attempts("c"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_existing_handle() {
        let handler = Arc::new(ScriptedHandler::default());
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let first = executor.submit(vectorize("v0")).await.unwrap();
        let second = executor.submit(vectorize("v0")).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.wait().await, TaskStatus::Succeeded);

        let third = executor.submit(vectorize("v0")).await.unwrap();
        assert_eq!(third.id(), first.id());
        assert_eq!(handler.attempts("v0"), 1);
    }

    #[tokio::test]
    async fn test_failed_predecessor_skips_successor() {
        let mut handler = ScriptedHandler::default();
        handler.fail_first.insert("v1".into(), u32::MAX);
        let handler = Arc::new(handler);
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let v0 = executor.submit(vectorize("v0")).await.unwrap();
        let v1 = executor.submit(vectorize("v1")).await.unwrap();
        let join = executor.submit_join(vec![v0.clone(), v1.clone()], check("c")).await.unwrap();

        assert_eq!(join.wait().await, TaskStatus::Skipped);
        assert_eq!(v1.wait().await, TaskStatus::Failed);
        assert_eq!(v0.wait().await, TaskStatus::Succeeded);

        // Budget of two attempts, then exactly one failure notification
        assert_eq!(handler.attempts("v1"), 2);
        assert_eq!(handler.attempts("c"), 0);
        let failures = handler.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "v1");
    }

    #[tokio::test]
    async fn test_join_on_failed_predecessor_is_skipped_at_submit() {
        let mut handler = ScriptedHandler::default();
        handler.fail_first.insert("v0".into(), u32::MAX);
        let handler = Arc::new(handler);
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let v0 = executor.submit(vectorize("v0")).await.unwrap();
        assert_eq!(v0.wait().await, TaskStatus::Failed);

        let join = executor.submit_join(vec![v0], check("c")).await.unwrap();
        assert_eq!(join.status(), TaskStatus::Skipped);
        assert_eq!(handler.attempts("c"), 0);
    }

    #[tokio::test]
    async fn test_retry_then_succeed() {
        let mut handler = ScriptedHandler::default();
        handler.fail_first.insert("v0".into(), 1);
        let handler = Arc::new(handler);
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let handle = executor.submit(vectorize("v0")).await.unwrap();

        assert_eq!(handle.wait().await, TaskStatus::Succeeded);
        assert_eq!(handler.attempts("v0"), 2);
        assert!(handler.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_attempts_fail_the_task() {
        let mut handler = ScriptedHandler::default();
        handler.delays.insert("v0".into(), Duration::from_secs(10));
        let handler = Arc::new(handler);
        let config = ExecutorConfig {
            attempt_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let executor = LocalTaskExecutor::new(handler.clone(), config);

        let handle = executor.submit(vectorize("v0")).await.unwrap();

        assert_eq!(handle.wait().await, TaskStatus::Failed);
        assert_eq!(handler.attempts("v0"), 2);
        let failures = handler.failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut handler = ScriptedHandler::default();
        for i in 0..8 {
            handler.delays.insert(format!("v{}", i), Duration::from_millis(20));
        }
        let handler = Arc::new(handler);
        let config = ExecutorConfig {
            concurrency: 2,
            ..test_config()
        };
        let executor = LocalTaskExecutor::new(handler.clone(), config);

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(executor.submit(vectorize(&format!("v{}", i))).await.unwrap());
        }
        for handle in &handles {
            assert_eq!(handle.wait().await, TaskStatus::Succeeded);
        }

        assert!(handler.max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_registry_forgets_settled_tasks() {
        let handler = Arc::new(ScriptedHandler::default());
        let config = ExecutorConfig {
            retained_keys: 4,
            ..test_config()
        };
        let executor = LocalTaskExecutor::new(handler.clone(), config);

        for batch in 0..10 {
            let preds = vec![
                executor.submit(vectorize(&format!("v{}:0", batch))).await.unwrap(),
                executor.submit(vectorize(&format!("v{}:1", batch))).await.unwrap(),
            ];
            let join = executor
                .submit_join(preds, check(&format!("c{}", batch)))
                .await
                .unwrap();
            assert_eq!(join.wait().await, TaskStatus::Succeeded);
        }

        // 30 tasks ran; only the newest keys are remembered
        assert_eq!(executor.registry_size().await, (4, 0, 0));
        assert!(executor.handle("c9").await.is_some());
        assert!(executor.handle("c0").await.is_none());

        // A remembered key is still deduplicated, a forgotten one runs again
        let recent = executor.submit(check("c9")).await.unwrap();
        assert_eq!(recent.status(), TaskStatus::Succeeded);
        assert_eq!(handler.attempts("c9"), 1);
        let old = executor.submit(vectorize("v0:0")).await.unwrap();
        assert_eq!(old.wait().await, TaskStatus::Succeeded);
        assert_eq!(handler.attempts("v0:0"), 2);
    }

    #[tokio::test]
    async fn test_skipped_join_leaves_nothing_behind() {
        let mut handler = ScriptedHandler::default();
        handler.fail_first.insert("v1".into(), u32::MAX);
        let handler = Arc::new(handler);
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());

        let v0 = executor.submit(vectorize("v0")).await.unwrap();
        let v1 = executor.submit(vectorize("v1")).await.unwrap();
        let join = executor.submit_join(vec![v0.clone(), v1], check("c")).await.unwrap();
        assert_eq!(join.wait().await, TaskStatus::Skipped);
        assert_eq!(v0.wait().await, TaskStatus::Succeeded);

        assert_eq!(executor.registry_size().await, (3, 0, 0));
    }

    #[tokio::test]
    async fn test_join_on_foreign_pending_handle_is_rejected() {
        let handler = Arc::new(ScriptedHandler::default());
        let executor = LocalTaskExecutor::new(handler.clone(), test_config());
        let (_tx, rx) = watch::channel(TaskStatus::Pending);
        let foreign = TaskHandle::new(Uuid::new_v4(), "elsewhere".to_string(), rx);

        let err = executor.submit_join(vec![foreign], check("c")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let handler = Arc::new(ScriptedHandler::default());
        let executor = LocalTaskExecutor::new(handler, test_config());

        executor.shutdown().await;

        assert!(executor.submit(vectorize("v0")).await.is_err());
    }
}
