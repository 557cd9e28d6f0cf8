//! Drain cycle and per-task execution.
//!
//! A drain resets abandoned `processing` tasks, loads everything pending,
//! partitions it by key and runs each key group as one serial lane. A
//! semaphore caps the number of lanes running at once, so a group holds its
//! slot for its entire run and tasks sharing a key never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use actionq_core::{AttemptOutcome, StoreError, Task};
use actionq_events::{NotificationSink, QueueEvent};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::handlers::HandlerRegistry;
use crate::store::TaskStore;

/// How one dispatch attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Handler succeeded and the task was deleted.
    Succeeded,
    /// Handler failed with attempts left; task is `pending` again.
    Requeued,
    /// Task is terminally `failed`.
    Failed,
    /// Handler declined to run; task is `pending` with its attempts intact.
    Deferred,
}

/// Counters for one `drain()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Passes performed (more than one when triggers arrived mid-drain).
    pub passes: usize,
    pub recovered: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub deferred: usize,
    pub failed: usize,
    pub store_errors: usize,
    /// Groups left alone because their head task is still cooling down.
    pub skipped_groups: usize,
    pub panicked_lanes: usize,
    /// Another drain was already running; this call did nothing itself.
    pub coalesced: bool,
}

impl DrainReport {
    fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: DrainReport) {
        self.passes += other.passes;
        self.recovered += other.recovered;
        self.dispatched += other.dispatched;
        self.succeeded += other.succeeded;
        self.requeued += other.requeued;
        self.deferred += other.deferred;
        self.failed += other.failed;
        self.store_errors += other.store_errors;
        self.skipped_groups += other.skipped_groups;
        self.panicked_lanes += other.panicked_lanes;
    }
}

/// Clears the in-flight flag when the drain ends, including on error.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The scheduler.
pub struct QueueEngine {
    store: Arc<dyn TaskStore>,
    handlers: HandlerRegistry,
    sink: Arc<dyn NotificationSink>,
    config: QueueConfig,
    in_flight: AtomicBool,
    rerun: AtomicBool,
}

impl QueueEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        handlers: HandlerRegistry,
        sink: Arc<dyn NotificationSink>,
        config: QueueConfig,
    ) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            store,
            handlers,
            sink,
            config,
            in_flight: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_draining(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn notify(&self, event: QueueEvent) {
        let name = event.name();
        if let Err(e) = self.sink.notify(event) {
            warn!(event = name, error = %e, "notification sink rejected event");
        }
    }

    /// Run pending tasks until each has succeeded, been requeued, been
    /// deferred or failed.
    ///
    /// Single-flight: a call that arrives while another drain is running
    /// returns immediately with `coalesced` set, and the running drain does
    /// one more pass before it finishes.
    ///
    /// Only store failures while recovering or loading pending tasks are
    /// returned as errors. Handler failures go through the retry policy.
    pub async fn drain(self: &Arc<Self>) -> Result<DrainReport, QueueError> {
        self.rerun.store(true, Ordering::SeqCst);
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("drain already in flight; request coalesced");
            return Ok(DrainReport::coalesced());
        }

        let mut report = DrainReport::default();
        loop {
            let guard = FlightGuard(&self.in_flight);
            while self.rerun.swap(false, Ordering::SeqCst) {
                let pass = self.drain_pass().await?;
                report.absorb(pass);
            }
            drop(guard);

            // A trigger may have landed between the last check and the
            // release; pick it up unless another caller already did.
            if !self.rerun.load(Ordering::SeqCst) || self.in_flight.swap(true, Ordering::SeqCst) {
                break;
            }
        }

        self.notify(QueueEvent::QueueChanged);
        Ok(report)
    }

    async fn drain_pass(self: &Arc<Self>) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport {
            passes: 1,
            ..DrainReport::default()
        };

        report.recovered = self.store.reset_processing_to_pending().await?;
        if report.recovered > 0 {
            info!(recovered = report.recovered, "reset abandoned tasks to pending");
        }

        let pending = self.store.get_pending_tasks().await?;
        if pending.is_empty() {
            debug!("no pending tasks");
            return Ok(report);
        }

        let total = pending.len();
        let groups = group_by_key(pending);
        info!(
            tasks = total,
            groups = groups.len(),
            concurrency = self.config.concurrency,
            "drain started"
        );

        let now = Utc::now();
        let min_delay = self.config.retry.min_retry_delay;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut lanes = JoinSet::new();

        for (key, tasks) in groups {
            let cooling = tasks
                .first()
                .is_some_and(|head| !head.is_eligible(now, min_delay));
            if cooling {
                debug!(key = %key, "head task still cooling down; group skipped");
                report.skipped_groups += 1;
                continue;
            }

            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            lanes.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return DrainReport::default();
                };
                engine.run_lane(&key, tasks).await
            });
        }

        while let Some(joined) = lanes.join_next().await {
            match joined {
                Ok(lane) => report.absorb(lane),
                Err(e) => {
                    // The in-flight task stays `processing` until the next
                    // drain resets it.
                    error!(error = %e, "drain lane panicked");
                    report.panicked_lanes += 1;
                }
            }
        }

        info!(
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            requeued = report.requeued,
            deferred = report.deferred,
            failed = report.failed,
            store_errors = report.store_errors,
            "drain finished"
        );
        Ok(report)
    }

    /// Run one key group strictly in order.
    ///
    /// A requeued or deferred task blocks the rest of its group until a later
    /// drain, so a newer task never overtakes an older one that is still
    /// waiting.
    async fn run_lane(&self, key: &str, tasks: Vec<Task>) -> DrainReport {
        let mut report = DrainReport::default();

        for task in tasks {
            let task_id = task.id;
            report.dispatched += 1;
            match self.run_task(task).await {
                Ok(TaskOutcome::Succeeded) => report.succeeded += 1,
                Ok(TaskOutcome::Failed) => report.failed += 1,
                Ok(TaskOutcome::Requeued) => {
                    report.requeued += 1;
                    break;
                }
                Ok(TaskOutcome::Deferred) => {
                    report.deferred += 1;
                    break;
                }
                Err(e) => {
                    error!(key = %key, task_id = %task_id, error = %e, "task store error; lane stopped");
                    report.store_errors += 1;
                    break;
                }
            }
        }

        report
    }

    /// Execute a single task and persist where it ended up.
    pub async fn run_task(&self, mut task: Task) -> Result<TaskOutcome, StoreError> {
        let task_type = task.task_type();

        task.mark_processing(Utc::now());
        self.store.update_task(&task).await?;
        debug!(
            task_id = %task.id,
            task_type = %task_type,
            key = %task.key,
            retry_count = task.retry_count,
            "dispatching task"
        );

        let result = self.handlers.dispatch(task.context.clone()).await;

        let outcome = match result {
            Ok(()) => {
                self.store.delete_task(task.id).await?;
                debug!(task_id = %task.id, task_type = %task_type, "task completed");
                self.notify(QueueEvent::succeeded(task.id, task_type));
                TaskOutcome::Succeeded
            }
            Err(err) => {
                let attempt = task.record_failure(&err, self.config.retry.max_attempts);
                self.store.update_task(&task).await?;
                match attempt {
                    AttemptOutcome::Requeued => {
                        warn!(
                            task_id = %task.id,
                            task_type = %task_type,
                            retry_count = task.retry_count,
                            error = %err,
                            "task failed; requeued"
                        );
                        TaskOutcome::Requeued
                    }
                    AttemptOutcome::Deferred => {
                        debug!(
                            task_id = %task.id,
                            task_type = %task_type,
                            reason = %err,
                            "task deferred; attempt not counted"
                        );
                        TaskOutcome::Deferred
                    }
                    AttemptOutcome::Failed => {
                        error!(
                            task_id = %task.id,
                            task_type = %task_type,
                            retry_count = task.retry_count,
                            error = %err,
                            "task failed permanently"
                        );
                        self.notify(QueueEvent::failed(task.id, task_type, err.to_string()));
                        TaskOutcome::Failed
                    }
                }
            }
        };

        self.notify(QueueEvent::QueueChanged);
        Ok(outcome)
    }
}

/// Partition by key, each group oldest first.
///
/// Ties on `created_at` fall back to id, which follows insertion order.
fn group_by_key(tasks: Vec<Task>) -> BTreeMap<String, Vec<Task>> {
    let mut groups: BTreeMap<String, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        groups.entry(task.key.clone()).or_default().push(task);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|t| (t.created_at, t.id));
    }
    groups
}
