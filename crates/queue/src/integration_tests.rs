//! End-to-end tests for the queue: enqueue → store → drain → handler →
//! store update → notification.
//!
//! Verifies:
//! - Same-key tasks run strictly in creation order
//! - Lanes never exceed the concurrency limit
//! - Retry bound, terminal failure and crash recovery
//! - Single-flight drains pick up work that lands mid-drain

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use proptest::prelude::*;
use serde_json::{Value, json};

use actionq_core::{
    HandlerError, KickUserContext, MessageId, NewTask, SendMessageContext, TaskContext, TaskId,
    TaskStatus, TaskType,
};
use actionq_events::{InMemoryNotificationSink, QueueEvent, Subscription};

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::handlers::{HandlerRegistry, TaskHandler, Unsupported};
use crate::queue::ActionQueue;
use crate::store::{InMemoryTaskStore, TaskStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    End,
}

/// Send-message handler that records every invocation.
///
/// Tasks are identified by `body.seq`.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<(u64, Phase)>>,
    attempts: Mutex<HashMap<u64, u32>>,
    fail_first: HashMap<u64, u32>,
    always_fail: Option<String>,
    panic_once: Option<u64>,
    delay: Option<Duration>,
    deferring: AtomicBool,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn new() -> Self {
        Self::default()
    }

    fn failing_first(mut self, seq: u64, times: u32) -> Self {
        self.fail_first.insert(seq, times);
        self
    }

    fn always_failing(mut self, msg: &str) -> Self {
        self.always_fail = Some(msg.to_string());
        self
    }

    fn panicking_once(mut self, seq: u64) -> Self {
        self.panic_once = Some(seq);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn set_deferring(&self, on: bool) {
        self.deferring.store(on, Ordering::SeqCst);
    }

    fn starts(&self) -> Vec<u64> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, p)| *p == Phase::Start)
            .map(|(seq, _)| *seq)
            .collect()
    }

    fn attempts(&self, seq: u64) -> u32 {
        self.attempts.lock().unwrap().get(&seq).copied().unwrap_or(0)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler<SendMessageContext> for Recorder {
    async fn handle(&self, ctx: SendMessageContext) -> Result<(), HandlerError> {
        let seq = ctx.body["seq"].as_u64().unwrap();
        if self.deferring.load(Ordering::SeqCst) {
            return Err(HandlerError::deferred("network unavailable"));
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.log.lock().unwrap().push((seq, Phase::Start));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(seq).or_insert(0);
            *n += 1;
            *n
        };

        self.log.lock().unwrap().push((seq, Phase::End));
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic_once == Some(seq) && attempt == 1 {
            panic!("handler crashed mid-send");
        }
        if let Some(msg) = &self.always_fail {
            return Err(HandlerError::msg(msg));
        }
        if attempt <= self.fail_first.get(&seq).copied().unwrap_or(0) {
            return Err(HandlerError::msg(format!("attempt {attempt} failed")));
        }
        Ok(())
    }
}

struct Harness {
    queue: ActionQueue,
    store: Arc<InMemoryTaskStore>,
    recorder: Arc<Recorder>,
    events: Subscription<QueueEvent>,
}

fn harness(recorder: Recorder, config: QueueConfig) -> Harness {
    let recorder = Arc::new(recorder);
    let store = InMemoryTaskStore::arc();
    let sink = Arc::new(InMemoryNotificationSink::new());
    let events = sink.subscribe();
    let registry = HandlerRegistry::new(recorder.clone(), Unsupported, Unsupported);
    let queue = ActionQueue::new(store.clone(), registry, sink, config).unwrap();
    Harness {
        queue,
        store,
        recorder,
        events,
    }
}

fn manual(concurrency: usize) -> QueueConfig {
    QueueConfig::default()
        .with_concurrency(concurrency)
        .with_drain_on_enqueue(false)
}

fn message(seq: u64, space: &str, channel: &str) -> SendMessageContext {
    SendMessageContext {
        space_id: space.into(),
        channel_id: channel.into(),
        message_id: MessageId::new(),
        sender_address: "addr-sender".into(),
        body: json!({ "seq": seq }),
        signing: Value::Null,
    }
}

async fn enqueue_at(h: &Harness, seq: u64, key: &str, offset_ms: i64) -> TaskId {
    let (space, channel) = key.split_once('/').unwrap_or((key, "general"));
    let task = NewTask::new(message(seq, space, channel).into(), key)
        .with_created_at(Utc::now() + chrono::Duration::milliseconds(offset_ms));
    h.queue.enqueue_task(task).await.unwrap()
}

async fn wait_until_empty(store: &InMemoryTaskStore) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !store.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn same_key_tasks_run_in_creation_order() {
    let h = harness(Recorder::new(), manual(4));
    for seq in 0..3 {
        enqueue_at(&h, seq, "space1/chan1", seq as i64 * 10).await;
    }

    let report = h.queue.drain().await.unwrap();

    assert_eq!(h.recorder.starts(), vec![0, 1, 2]);
    assert_eq!(report.succeeded, 3);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn creation_time_not_insertion_order_decides() {
    let h = harness(Recorder::new(), manual(4));
    enqueue_at(&h, 2, "space1/chan1", 20).await;
    enqueue_at(&h, 0, "space1/chan1", 0).await;
    enqueue_at(&h, 1, "space1/chan1", 10).await;

    h.queue.drain().await.unwrap();

    assert_eq!(h.recorder.starts(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_limit() {
    let h = harness(Recorder::new().with_delay(Duration::from_millis(30)), manual(2));
    for seq in 0..5 {
        enqueue_at(&h, seq, &format!("space{seq}/chan"), 0).await;
    }

    let report = h.queue.drain().await.unwrap();

    assert_eq!(report.succeeded, 5);
    assert!(h.recorder.peak() <= 2, "peak was {}", h.recorder.peak());
    assert_eq!(h.recorder.peak(), 2);
}

#[tokio::test]
async fn flaky_handler_succeeds_on_third_attempt() {
    let h = harness(Recorder::new().failing_first(0, 2), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;

    let mut drains = 0;
    while !h.store.is_empty() && drains < 10 {
        h.queue.drain().await.unwrap();
        drains += 1;
    }

    assert_eq!(drains, 3);
    assert_eq!(h.recorder.attempts(0), 3);
    assert!(h.store.get_task(id).await.unwrap().is_none());
}

#[tokio::test]
async fn always_failing_handler_reaches_failed_after_three_attempts() {
    let h = harness(Recorder::new().always_failing("boom"), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;

    for _ in 0..3 {
        h.queue.drain().await.unwrap();
    }

    let task = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.error.as_deref(), Some("boom"));

    // Terminal: further drains leave it alone.
    let report = h.queue.drain().await.unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.recorder.attempts(0), 3);

    let failures: Vec<_> = h
        .events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, QueueEvent::TaskFailed { .. }))
        .collect();
    assert_eq!(
        failures,
        vec![QueueEvent::failed(id, TaskType::SendMessage, "boom")]
    );
}

#[tokio::test]
async fn abandoned_processing_task_is_recovered_then_dispatched() {
    let h = harness(Recorder::new(), manual(4));
    let id = h
        .store
        .add_task(NewTask::new(message(0, "space1", "chan1").into(), "space1/chan1"))
        .await
        .unwrap();
    let mut task = h.store.get_task(id).await.unwrap().unwrap();
    task.mark_processing(Utc::now());
    h.store.update_task(&task).await.unwrap();

    let report = h.queue.drain().await.unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.recorder.attempts(0), 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn enqueue_returns_after_task_is_persisted() {
    let h = harness(Recorder::new(), manual(4));
    let id = h
        .queue
        .enqueue(message(0, "space1", "chan1"), "space1/chan1")
        .await
        .unwrap();

    let task = h.queue.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert_eq!(h.recorder.attempts(0), 0);
    assert_eq!(h.events.try_recv().unwrap(), QueueEvent::QueueChanged);
}

#[tokio::test]
async fn requeued_task_holds_back_its_group() {
    let h = harness(Recorder::new().failing_first(0, 1), manual(4));
    enqueue_at(&h, 0, "space1/chan1", 0).await;
    enqueue_at(&h, 1, "space1/chan1", 10).await;
    enqueue_at(&h, 2, "space2/chan1", 0).await;

    let first = h.queue.drain().await.unwrap();
    assert_eq!(first.requeued, 1);
    assert_eq!(first.succeeded, 1);
    assert_eq!(h.recorder.attempts(1), 0);

    h.queue.drain().await.unwrap();

    let same_key: Vec<_> = h
        .recorder
        .starts()
        .into_iter()
        .filter(|seq| *seq != 2)
        .collect();
    assert_eq!(same_key, vec![0, 0, 1]);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn missing_handler_fails_immediately_and_group_continues() {
    let h = harness(Recorder::new(), manual(4));
    let kick = KickUserContext {
        space_id: "space1".into(),
        user_address: "addr-kicked".into(),
        keysets: Value::Null,
        registration: Value::Null,
    };
    let kick_id = h
        .queue
        .enqueue_task(
            NewTask::new(TaskContext::from(kick), "space1/chan1")
                .with_created_at(Utc::now() - chrono::Duration::seconds(1)),
        )
        .await
        .unwrap();
    enqueue_at(&h, 1, "space1/chan1", 0).await;

    let report = h.queue.drain().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    let kick_task = h.store.get_task(kick_id).await.unwrap().unwrap();
    assert_eq!(kick_task.status, TaskStatus::Failed);
    assert_eq!(kick_task.retry_count, 0);
    assert_eq!(
        kick_task.error.as_deref(),
        Some("no handler registered for task type kick-user")
    );
}

#[tokio::test]
async fn success_emits_task_message_and_queue_changed() {
    let h = harness(Recorder::new(), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;
    let _ = h.events.drain();

    h.queue.drain().await.unwrap();

    let events = h.events.drain();
    assert!(events.contains(&QueueEvent::succeeded(id, TaskType::SendMessage)));
    assert_eq!(events.last(), Some(&QueueEvent::QueueChanged));
    match &events[0] {
        QueueEvent::TaskSucceeded { message, .. } => assert_eq!(message, "Message sent"),
        other => panic!("unexpected first event: {other:?}"),
    }
}

#[tokio::test]
async fn overlapping_drains_coalesce_into_one() {
    let h = harness(
        Recorder::new().with_delay(Duration::from_millis(50)),
        manual(4),
    );
    enqueue_at(&h, 0, "space1/chan1", 0).await;

    let queue = h.queue.clone();
    let running = tokio::spawn(async move { queue.drain().await });
    while !h.queue.engine().is_draining() {
        tokio::task::yield_now().await;
    }

    // Lands mid-drain; the running drain must pick it up.
    enqueue_at(&h, 1, "space2/chan1", 0).await;
    let second = h.queue.drain().await.unwrap();
    assert!(second.coalesced);
    assert_eq!(second.dispatched, 0);

    let first = running.await.unwrap().unwrap();
    assert_eq!(first.passes, 2);
    assert_eq!(first.succeeded, 2);
    assert!(h.store.is_empty());
    assert!(!h.queue.engine().is_draining());
}

#[tokio::test]
async fn min_retry_delay_skips_cooling_group() {
    let config = manual(4).with_min_retry_delay(Duration::from_secs(3600));
    let h = harness(Recorder::new().failing_first(0, 1), config);
    enqueue_at(&h, 0, "space1/chan1", 0).await;
    enqueue_at(&h, 1, "space1/chan1", 10).await;

    h.queue.drain().await.unwrap();
    let report = h.queue.drain().await.unwrap();

    assert_eq!(report.skipped_groups, 1);
    assert_eq!(report.dispatched, 0);
    assert_eq!(h.recorder.starts(), vec![0]);
}

#[tokio::test]
async fn retry_failed_requeues_with_fresh_budget() {
    let h = harness(Recorder::new().failing_first(0, 3), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;
    for _ in 0..3 {
        h.queue.drain().await.unwrap();
    }
    let failed = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);

    let new_id = h.queue.retry_failed(id).await.unwrap();

    assert_ne!(new_id, id);
    assert!(h.store.get_task(id).await.unwrap().is_none());
    let retried = h.store.get_task(new_id).await.unwrap().unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.retry_count, 0);
    assert_eq!(retried.created_at, failed.created_at);

    h.queue.drain().await.unwrap();
    assert!(h.store.is_empty());
    assert_eq!(h.recorder.attempts(0), 4);
}

#[tokio::test]
async fn retry_failed_rejects_live_tasks() {
    let h = harness(Recorder::new(), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;

    let err = h.queue.retry_failed(id).await.unwrap_err();
    assert_eq!(
        err,
        QueueError::NotFailed {
            id,
            status: TaskStatus::Pending
        }
    );
}

#[tokio::test]
async fn overlapping_retries_leave_one_copy() {
    let h = harness(Recorder::new().always_failing("boom"), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;
    for _ in 0..3 {
        h.queue.drain().await.unwrap();
    }

    let (a, b) = tokio::join!(h.queue.retry_failed(id), h.queue.retry_failed(id));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| *r == Err(QueueError::Store(actionq_core::StoreError::NotFound(id))))
    );
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.queue.counts().await.unwrap().pending, 1);
}

#[tokio::test]
async fn deferred_task_keeps_budget_and_holds_its_group() {
    let h = harness(Recorder::new(), manual(4));
    let head = enqueue_at(&h, 0, "space1/chan1", 0).await;
    enqueue_at(&h, 1, "space1/chan1", 10).await;
    h.recorder.set_deferring(true);

    for _ in 0..5 {
        let report = h.queue.drain().await.unwrap();
        assert_eq!(report.deferred, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.failed, 0);
    }

    let task = h.store.get_task(head).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert!(task.error.is_none());
    assert!(h.recorder.starts().is_empty());

    h.recorder.set_deferring(false);
    let report = h.queue.drain().await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(h.recorder.starts(), vec![0, 1]);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn counts_reflect_live_statuses() {
    let h = harness(Recorder::new().always_failing("offline"), manual(4));
    enqueue_at(&h, 0, "space1/chan1", 0).await;
    enqueue_at(&h, 1, "space2/chan1", 0).await;
    assert_eq!(h.queue.counts().await.unwrap().pending, 2);

    for _ in 0..3 {
        h.queue.drain().await.unwrap();
    }

    let counts = h.queue.counts().await.unwrap();
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 2);
    assert_eq!(counts.total(), 2);
    assert_eq!(
        h.queue.tasks_by_status(TaskStatus::Failed).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn panicking_handler_is_recovered_on_next_drain() {
    let h = harness(Recorder::new().panicking_once(0), manual(4));
    let id = enqueue_at(&h, 0, "space1/chan1", 0).await;

    let first = h.queue.drain().await.unwrap();
    assert_eq!(first.panicked_lanes, 1);
    let stuck = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(stuck.status, TaskStatus::Processing);

    let second = h.queue.drain().await.unwrap();
    assert_eq!(second.recovered, 1);
    assert_eq!(second.succeeded, 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn enqueue_triggers_background_drain() {
    let h = harness(Recorder::new(), QueueConfig::default());
    h.queue
        .enqueue(message(0, "space1", "chan1"), "space1/chan1")
        .await
        .unwrap();

    wait_until_empty(&h.store).await;
    assert_eq!(h.recorder.attempts(0), 1);
}

#[tokio::test]
async fn connectivity_restored_triggers_drain() {
    let h = harness(Recorder::new(), manual(4));
    enqueue_at(&h, 0, "space1/chan1", 0).await;

    h.queue.on_connectivity_restored();

    wait_until_empty(&h.store).await;
    assert_eq!(h.recorder.starts(), vec![0]);
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

    /// Whatever the failure pattern, a key's invocations never go back to an
    /// older task once a newer one has started.
    #[test]
    fn same_key_invocations_follow_creation_order(
        plan in prop::collection::vec((0usize..3, 0u32..4), 1..12),
        concurrency in 1usize..4,
    ) {
        let mut recorder = Recorder::new();
        for (seq, (_, fails)) in plan.iter().enumerate() {
            recorder = recorder.failing_first(seq as u64, *fails);
        }
        let h = harness(recorder, manual(concurrency));

        let keys: Vec<String> = plan.iter().map(|(k, _)| format!("space{k}/chan")).collect();
        block_on(async {
            for (seq, key) in keys.iter().enumerate() {
                enqueue_at(&h, seq as u64, key, seq as i64).await;
            }
            for _ in 0..(plan.len() * 3 + 1) {
                if h.store.count_by_status(TaskStatus::Pending).await.unwrap() == 0 {
                    break;
                }
                h.queue.drain().await.unwrap();
            }
        });

        prop_assert_eq!(block_on(h.store.count_by_status(TaskStatus::Pending)).unwrap(), 0);

        let starts = h.recorder.starts();
        for key in &keys {
            let order: Vec<u64> = starts
                .iter()
                .copied()
                .filter(|seq| &keys[*seq as usize] == key)
                .collect();
            prop_assert!(order.windows(2).all(|w| w[0] <= w[1]), "key {} ran {:?}", key, order);
        }

        for (seq, (_, fails)) in plan.iter().enumerate() {
            let expected = (*fails + 1).min(3);
            prop_assert_eq!(h.recorder.attempts(seq as u64), expected);
        }
    }
}
