//! Drain loop: replays queued tasks against the dispatcher when connectivity
//! allows.
//!
//! Drains are triggered on startup, on offline to online transitions, on a
//! fallback timer and on demand. At most one drain runs at a time; a trigger
//! that arrives while one is running is folded into a follow-up cycle of the
//! running drain rather than started in parallel.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::SyncSettings;
use crate::error::Result;
use crate::models::{SyncTask, TaskStatus};
use crate::queue::SyncQueue;

use super::dispatcher::{dispatch, DispatchError, TaskDispatcher};
use super::network::NetworkMonitor;
use super::observer::{Observer, TracingObserver};

const DRAIN_SPAN: &str = "sync_manager_process_queue";
const QUEUE_SIZE_METRIC: &str = "sync_queue_size";
const CONFLICT_METRIC: &str = "sync_conflict_detected";
const DEAD_LETTER_METRIC: &str = "sync_task_dead_lettered";

/// What caused a drain to be requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTrigger {
    Startup,
    Reconnected,
    Interval,
    Manual,
}

impl DrainTrigger {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Reconnected => "reconnected",
            Self::Interval => "interval",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tally of one drain (possibly spanning several coalesced cycles)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub succeeded: usize,
    /// Retryable failures left in `failed`
    pub failed: usize,
    pub dead_lettered: usize,
    pub conflicted: usize,
    /// A cycle found the device offline and did nothing
    pub skipped_offline: bool,
    /// A cycle stopped early because connectivity dropped
    pub interrupted: bool,
    pub cycles: usize,
}

impl DrainReport {
    fn merge(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.dead_lettered += other.dead_lettered;
        self.conflicted += other.conflicted;
        self.skipped_offline |= other.skipped_offline;
        self.interrupted |= other.interrupted;
        self.cycles += other.cycles;
    }

    /// Number of tasks attempted
    pub const fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.dead_lettered + self.conflicted
    }
}

/// Result of [`SyncOrchestrator::request_drain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// This call ran the drain
    Completed(DrainReport),
    /// Another drain was running; it will run one more cycle on our behalf
    Coalesced,
}

enum Attempt {
    Delivered,
    Conflict { remote_updated_at: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Failed,
    DeadLettered,
    Conflicted,
    Vanished,
}

/// Drains the [`SyncQueue`] through a [`TaskDispatcher`].
pub struct SyncOrchestrator {
    queue: SyncQueue,
    dispatcher: Arc<dyn TaskDispatcher>,
    observer: Arc<dyn Observer>,
    network: NetworkMonitor,
    settings: SyncSettings,
    drain_lock: Mutex<()>,
    rerun_requested: AtomicBool,
    wake: Notify,
}

impl SyncOrchestrator {
    pub fn new(
        queue: SyncQueue,
        dispatcher: Arc<dyn TaskDispatcher>,
        network: NetworkMonitor,
    ) -> Self {
        let settings = SyncSettings::default().with_max_attempts(queue.max_attempts());
        Self {
            queue,
            dispatcher,
            observer: Arc::new(TracingObserver),
            network,
            settings,
            drain_lock: Mutex::new(()),
            rerun_requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Replace the drain settings; the attempt cap is applied to the queue
    #[must_use]
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.queue = self.queue.with_max_attempts(settings.max_attempts);
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Drain now and wait for the result
    pub async fn sync_now(&self) -> DrainOutcome {
        self.request_drain(DrainTrigger::Manual).await
    }

    /// Drain and wait for the report, queueing behind a drain already running.
    ///
    /// Unlike [`sync_now`](Self::sync_now) this never coalesces: the caller
    /// always gets the report of a cycle that started after the call.
    pub async fn drain_now(&self) -> DrainReport {
        let guard = self.drain_lock.lock().await;
        self.rerun_requested.store(true, Ordering::SeqCst);
        let mut report = DrainReport::default();
        while self.rerun_requested.swap(false, Ordering::SeqCst) {
            report.merge(self.drain_cycle(DrainTrigger::Manual).await);
        }
        drop(guard);

        // Requests that coalesced into this drain after its last cycle.
        if self.rerun_requested.load(Ordering::SeqCst) {
            let outcome = self.request_drain(DrainTrigger::Manual).await;
            if let DrainOutcome::Completed(extra) = outcome {
                report.merge(extra);
            }
        }
        report
    }

    /// Ask a running [`run`](Self::run) loop to drain without waiting
    pub fn trigger_now(&self) {
        self.wake.notify_one();
    }

    /// Run a drain unless one is already running.
    ///
    /// When a drain is in progress the request sets a rerun flag and returns
    /// [`DrainOutcome::Coalesced`]; the running drain notices the flag and
    /// performs one more full cycle before releasing the lock.
    pub async fn request_drain(&self, trigger: DrainTrigger) -> DrainOutcome {
        self.rerun_requested.store(true, Ordering::SeqCst);
        let mut report: Option<DrainReport> = None;

        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                tracing::debug!("Drain already running; coalescing {trigger} trigger");
                break;
            };
            while self.rerun_requested.swap(false, Ordering::SeqCst) {
                let cycle = self.drain_cycle(trigger).await;
                report.get_or_insert_with(DrainReport::default).merge(cycle);
            }
            drop(guard);

            // A request may have landed between the last swap and the unlock.
            if !self.rerun_requested.load(Ordering::SeqCst) {
                break;
            }
        }

        report.map_or(DrainOutcome::Coalesced, DrainOutcome::Completed)
    }

    async fn drain_cycle(&self, trigger: DrainTrigger) -> DrainReport {
        let mut report = DrainReport {
            cycles: 1,
            ..DrainReport::default()
        };
        if !self.network.is_online() {
            tracing::debug!("Offline; skipping {trigger} drain");
            report.skipped_offline = true;
            return report;
        }

        let mut span = self
            .observer
            .start_span(DRAIN_SPAN, &[("trigger", trigger.to_string())]);

        if let Err(error) = self.queue.recover_interrupted(self.stale_after()).await {
            tracing::warn!("Failed to recover interrupted sync tasks: {error}");
        }

        let tasks = match self.queue.list_pending().await {
            Ok(tasks) => tasks,
            Err(error) => {
                tracing::error!("Failed to read sync queue: {error}");
                span.record_error(&error.to_string());
                span.end();
                return report;
            }
        };

        let depth = u32::try_from(tasks.len()).unwrap_or(u32::MAX);
        self.observer
            .track_metric(QUEUE_SIZE_METRIC, f64::from(depth), &[]);
        if !tasks.is_empty() {
            tracing::info!("Draining {} queued task(s) ({trigger})", tasks.len());
        }

        for task in &tasks {
            if !self.network.is_online() {
                tracing::info!("Connectivity lost; stopping drain");
                report.interrupted = true;
                break;
            }
            match self.process_task(task).await {
                TaskOutcome::Succeeded => report.succeeded += 1,
                TaskOutcome::Failed => report.failed += 1,
                TaskOutcome::DeadLettered => report.dead_lettered += 1,
                TaskOutcome::Conflicted => report.conflicted += 1,
                TaskOutcome::Vanished => {}
            }
        }

        span.end();
        report
    }

    /// Age after which a `syncing` task can no longer be in flight.
    ///
    /// Every dispatch is bounded by the task timeout; the margin covers the
    /// store writes around it and drainers in other processes sharing the
    /// store.
    fn stale_after(&self) -> Duration {
        self.settings.task_timeout.saturating_mul(2)
    }

    async fn process_task(&self, task: &SyncTask) -> TaskOutcome {
        let attributes = [("taskId", task.id.to_string()), ("type", task.kind.to_string())];
        let mut span = self.observer.start_span(task.kind.span_name(), &attributes);

        let outcome = match self.deliver(task).await {
            Ok(outcome) => outcome,
            Err(error) => {
                // The task stays where the store left it; a later cycle
                // recovers it once it is stale.
                tracing::error!("Sync task {} hit a storage error: {error}", task.id);
                span.record_error(&error.to_string());
                TaskOutcome::Failed
            }
        };

        match outcome {
            TaskOutcome::Succeeded | TaskOutcome::Vanished => {}
            TaskOutcome::Conflicted => {
                span.record_error("conflict");
                self.observer.track_metric(CONFLICT_METRIC, 1.0, &attributes);
            }
            TaskOutcome::DeadLettered => {
                span.record_error("dead-lettered");
                self.observer.track_metric(DEAD_LETTER_METRIC, 1.0, &attributes);
            }
            TaskOutcome::Failed => span.record_error("failed"),
        }
        span.end();
        outcome
    }

    async fn deliver(&self, task: &SyncTask) -> Result<TaskOutcome> {
        if self.queue.mark_syncing(&task.id).await?.is_none() {
            tracing::debug!("Sync task {} vanished before dispatch", task.id);
            return Ok(TaskOutcome::Vanished);
        }

        let timeout = self.settings.task_timeout;
        let attempt = match tokio::time::timeout(timeout, self.attempt(task)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::transient(format!(
                "timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        match attempt {
            Ok(Attempt::Delivered) => {
                self.queue.mark_succeeded(&task.id).await?;
                tracing::debug!("Synced {} task {}", task.kind, task.id);
                Ok(TaskOutcome::Succeeded)
            }
            Ok(Attempt::Conflict { remote_updated_at }) => {
                tracing::warn!(
                    "Conflict on {} task {}: server updated at {remote_updated_at}, queued at {}",
                    task.kind,
                    task.id,
                    task.created_at
                );
                self.queue
                    .mark_conflict(
                        &task.id,
                        &format!(
                            "server copy updated at {remote_updated_at} after task was queued at {}",
                            task.created_at
                        ),
                    )
                    .await?;
                Ok(TaskOutcome::Conflicted)
            }
            Err(error) => {
                let updated = self
                    .queue
                    .mark_failed(&task.id, &error.to_string(), error.is_retryable())
                    .await?;
                let dead = updated.is_some_and(|task| task.status == TaskStatus::Dead);
                if dead {
                    tracing::warn!("Dead-lettered {} task {}: {error}", task.kind, task.id);
                    Ok(TaskOutcome::DeadLettered)
                } else {
                    tracing::warn!("Sync task {} failed, will retry: {error}", task.id);
                    Ok(TaskOutcome::Failed)
                }
            }
        }
    }

    /// Conflict check (for kinds that modify existing entities) then dispatch
    async fn attempt(&self, task: &SyncTask) -> std::result::Result<Attempt, DispatchError> {
        if task.kind.targets_existing_entity() {
            if let Some(remote_updated_at) = self.dispatcher.remote_updated_at(task).await? {
                if remote_updated_at > task.created_at {
                    return Ok(Attempt::Conflict { remote_updated_at });
                }
            }
        }
        dispatch(self.dispatcher.as_ref(), task).await?;
        Ok(Attempt::Delivered)
    }

    /// Drive drains until `shutdown` resolves.
    ///
    /// Drains once, then drains on reconnection, on every interval tick and on
    /// [`trigger_now`](Self::trigger_now). Each cycle first recovers tasks left
    /// in `syncing` for longer than twice the task timeout.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut network = self.network.subscribe();
        let mut was_online = *network.borrow_and_update();
        let mut ticker = self.settings.sync_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        self.request_drain(DrainTrigger::Startup).await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *network.borrow_and_update();
                    let reconnected = online && !was_online;
                    was_online = online;
                    if reconnected {
                        tracing::info!("Connectivity restored");
                        self.request_drain(DrainTrigger::Reconnected).await;
                    }
                }
                () = next_tick(&mut ticker) => {
                    self.request_drain(DrainTrigger::Interval).await;
                }
                () = self.wake.notified() => {
                    self.request_drain(DrainTrigger::Manual).await;
                }
            }
        }
        tracing::debug!("Sync orchestrator stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use crate::services::OfflineStore;
    use crate::sync::observer::{Attributes, ObservedSpan};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Scripted dispatcher: records payloads, fails on demand
    #[derive(Default)]
    struct ScriptedDispatcher {
        delivered: StdMutex<Vec<Value>>,
        failures: StdMutex<Vec<DispatchError>>,
        remote_updated_at: StdMutex<Option<i64>>,
        delay: Option<Duration>,
        go_offline: Option<NetworkMonitor>,
    }

    impl ScriptedDispatcher {
        fn failing_with(errors: Vec<DispatchError>) -> Self {
            Self {
                failures: StdMutex::new(errors),
                ..Self::default()
            }
        }

        fn delivered(&self) -> Vec<Value> {
            self.delivered.lock().unwrap().clone()
        }

        async fn handle(&self, payload: &Value) -> std::result::Result<(), DispatchError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(network) = &self.go_offline {
                network.set_online(false);
            }
            let failure = {
                let mut failures = self.failures.lock().unwrap();
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            };
            if let Some(error) = failure {
                return Err(error);
            }
            self.delivered.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl TaskDispatcher for ScriptedDispatcher {
        async fn create_entity(&self, payload: &Value) -> std::result::Result<(), DispatchError> {
            self.handle(payload).await
        }

        async fn update_entity(&self, payload: &Value) -> std::result::Result<(), DispatchError> {
            self.handle(payload).await
        }

        async fn upsert_related_record(
            &self,
            payload: &Value,
        ) -> std::result::Result<(), DispatchError> {
            self.handle(payload).await
        }

        async fn remote_updated_at(
            &self,
            _task: &SyncTask,
        ) -> std::result::Result<Option<i64>, DispatchError> {
            Ok(*self.remote_updated_at.lock().unwrap())
        }
    }

    /// Blocks the first dispatch until released, tracking concurrency
    #[derive(Default)]
    struct GatedDispatcher {
        entered: Notify,
        release: Notify,
        blocked_once: AtomicBool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskDispatcher for GatedDispatcher {
        async fn create_entity(&self, _payload: &Value) -> std::result::Result<(), DispatchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.blocked_once.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn update_entity(&self, payload: &Value) -> std::result::Result<(), DispatchError> {
            self.create_entity(payload).await
        }

        async fn upsert_related_record(
            &self,
            payload: &Value,
        ) -> std::result::Result<(), DispatchError> {
            self.create_entity(payload).await
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        spans: StdMutex<Vec<String>>,
        metrics: StdMutex<Vec<(String, f64)>>,
    }

    struct NoopSpan;

    impl ObservedSpan for NoopSpan {
        fn record_error(&mut self, _error: &str) {}

        fn end(self: Box<Self>) {}
    }

    impl Observer for RecordingObserver {
        fn start_span(&self, name: &str, _attributes: Attributes<'_>) -> Box<dyn ObservedSpan> {
            self.spans.lock().unwrap().push(name.to_string());
            Box::new(NoopSpan)
        }

        fn track_metric(&self, name: &str, value: f64, _attributes: Attributes<'_>) {
            self.metrics.lock().unwrap().push((name.to_string(), value));
        }
    }

    async fn queue() -> SyncQueue {
        SyncQueue::new(OfflineStore::open_in_memory().await.unwrap())
    }

    async fn wait_for_deliveries(dispatcher: &ScriptedDispatcher, count: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.delivered().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn backdate(queue: &SyncQueue, id: &crate::models::TaskId, millis: i64) {
        queue
            .store()
            .update_task(id, |task| task.updated_at -= millis)
            .await
            .unwrap();
    }

    fn completed(outcome: DrainOutcome) -> DrainReport {
        match outcome {
            DrainOutcome::Completed(report) => report,
            DrainOutcome::Coalesced => panic!("expected the drain to run"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_drain_leaves_queue_untouched() {
        let queue = queue().await;
        let task = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::offline());

        let report = completed(orchestrator.sync_now().await);

        assert!(report.skipped_offline);
        assert_eq!(report.attempted(), 0);
        assert!(dispatcher.delivered().is_empty());
        let stored = queue.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_dispatches_in_creation_order_and_removes_tasks() {
        let queue = queue().await;
        for value in ["a", "b", "c"] {
            queue
                .enqueue(TaskKind::CreateEntity, json!({ "id": value }))
                .await
                .unwrap();
        }
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online());

        let report = completed(orchestrator.sync_now().await);

        assert_eq!(report.succeeded, 3);
        assert_eq!(report.cycles, 1);
        assert_eq!(
            dispatcher.delivered(),
            vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": "c"})]
        );
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failure_is_retried_on_next_drain() {
        let queue = queue().await;
        let task = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::failing_with(vec![
            DispatchError::transient("503 Service Unavailable"),
        ]));
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online());

        let first = completed(orchestrator.sync_now().await);
        assert_eq!(first.failed, 1);
        let stored = queue.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.error.as_deref(), Some("503 Service Unavailable"));

        let second = completed(orchestrator.sync_now().await);
        assert_eq!(second.succeeded, 1);
        assert!(queue.get(&task.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn permanent_failure_dead_letters_immediately() {
        let queue = queue().await;
        let task = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::failing_with(vec![
            DispatchError::permanent("422 invalid payload"),
        ]));
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher, NetworkMonitor::online())
                .with_observer(observer.clone());

        let report = completed(orchestrator.sync_now().await);

        assert_eq!(report.dead_lettered, 1);
        let stored = queue.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Dead);
        assert!(queue.list_pending().await.unwrap().is_empty());
        assert!(observer
            .metrics
            .lock()
            .unwrap()
            .iter()
            .any(|(name, _)| name == DEAD_LETTER_METRIC));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn attempt_cap_from_settings_dead_letters() {
        let queue = queue().await;
        let task = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::failing_with(vec![
            DispatchError::transient("e1"),
            DispatchError::transient("e2"),
        ]));
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher, NetworkMonitor::online())
                .with_settings(SyncSettings::default().with_max_attempts(Some(2)));

        assert_eq!(completed(orchestrator.sync_now().await).failed, 1);
        assert_eq!(completed(orchestrator.sync_now().await).dead_lettered, 1);

        let stored = queue.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Dead);
        assert_eq!(stored.attempts, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_dispatch_times_out_as_retryable_failure() {
        let queue = queue().await;
        let task = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedDispatcher::default()
        });
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher, NetworkMonitor::online())
                .with_settings(
                    SyncSettings::default().with_task_timeout(Duration::from_millis(50)),
                );

        let report = completed(orchestrator.sync_now().await);

        assert_eq!(report.failed, 1);
        let stored = queue.get(&task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn newer_server_copy_parks_update_as_conflict() {
        let queue = queue().await;
        let update = queue
            .enqueue(TaskKind::UpdateEntity, json!({"id": "x"}))
            .await
            .unwrap();
        let create = queue
            .enqueue(TaskKind::CreateEntity, json!({"id": "y"}))
            .await
            .unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher {
            remote_updated_at: StdMutex::new(Some(update.created_at + 1_000)),
            ..ScriptedDispatcher::default()
        });
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online())
                .with_observer(observer.clone());

        let report = completed(orchestrator.sync_now().await);

        assert_eq!(report.conflicted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(dispatcher.delivered(), vec![json!({"id": "y"})]);
        assert!(queue.get(&create.id).await.unwrap().is_none());
        let parked = queue.get(&update.id).await.unwrap().unwrap();
        assert_eq!(parked.status, TaskStatus::Conflict);
        assert!(observer
            .metrics
            .lock()
            .unwrap()
            .contains(&(CONFLICT_METRIC.to_string(), 1.0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn older_server_copy_does_not_conflict() {
        let queue = queue().await;
        let update = queue
            .enqueue(TaskKind::UpdateEntity, json!({"id": "x"}))
            .await
            .unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher {
            remote_updated_at: StdMutex::new(Some(update.created_at - 1)),
            ..ScriptedDispatcher::default()
        });
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online());

        let report = completed(orchestrator.sync_now().await);

        assert_eq!(report.succeeded, 1);
        assert_eq!(dispatcher.delivered(), vec![json!({"id": "x"})]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_requests_coalesce_into_one_drain() {
        let queue = queue().await;
        queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(GatedDispatcher::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            dispatcher.clone(),
            NetworkMonitor::online(),
        ));

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.sync_now().await }
        });
        dispatcher.entered.notified().await;

        // Enqueued after the first cycle listed the queue.
        queue.enqueue(TaskKind::CreateEntity, json!(2)).await.unwrap();
        assert_eq!(orchestrator.sync_now().await, DrainOutcome::Coalesced);

        dispatcher.release.notify_one();
        let report = completed(first.await.unwrap());

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.cycles, 2);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn losing_connectivity_stops_the_cycle() {
        let queue = queue().await;
        let first = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let second = queue.enqueue(TaskKind::CreateEntity, json!(2)).await.unwrap();
        let network = NetworkMonitor::online();
        let dispatcher = Arc::new(ScriptedDispatcher {
            go_offline: Some(network.clone()),
            ..ScriptedDispatcher::default()
        });
        let orchestrator = SyncOrchestrator::new(queue.clone(), dispatcher, network);

        let report = completed(orchestrator.sync_now().await);

        assert!(report.interrupted);
        assert_eq!(report.succeeded, 1);
        assert!(queue.get(&first.id).await.unwrap().is_none());
        let untouched = queue.get(&second.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskStatus::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_reports_queue_depth_and_spans() {
        let queue = queue().await;
        queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        queue
            .enqueue(TaskKind::UpsertRelatedRecord, json!(2))
            .await
            .unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let orchestrator = SyncOrchestrator::new(
            queue,
            Arc::new(ScriptedDispatcher::default()),
            NetworkMonitor::online(),
        )
        .with_observer(observer.clone());

        orchestrator.sync_now().await;

        assert_eq!(
            *observer.metrics.lock().unwrap(),
            vec![(QUEUE_SIZE_METRIC.to_string(), 2.0)]
        );
        assert_eq!(
            *observer.spans.lock().unwrap(),
            vec![
                DRAIN_SPAN.to_string(),
                "sync_task_create_entity".to_string(),
                "sync_task_upsert_related_record".to_string(),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_loop_drains_on_reconnect() {
        let queue = queue().await;
        let network = NetworkMonitor::offline();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), network.clone())
                .with_settings(SyncSettings::default().without_auto_sync()),
        );
        queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await;
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.depth().await.unwrap(), 1);

        network.set_online(true);
        assert!(
            wait_for_deliveries(&dispatcher, 1).await,
            "reconnect should drain the queue"
        );

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(dispatcher.delivered(), vec![json!(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_loop_recovers_interrupted_tasks_and_honours_trigger_now() {
        let queue = queue().await;
        let stuck = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        queue.mark_syncing(&stuck.id).await.unwrap();
        backdate(&queue, &stuck.id, 120_000).await;
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online())
                .with_settings(SyncSettings::default().without_auto_sync()),
        );

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await;
            }
        });

        assert!(
            wait_for_deliveries(&dispatcher, 1).await,
            "startup drain should recover the task"
        );

        queue.enqueue(TaskKind::CreateEntity, json!(2)).await.unwrap();
        orchestrator.trigger_now();
        assert!(
            wait_for_deliveries(&dispatcher, 2).await,
            "manual trigger should drain"
        );

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(dispatcher.delivered(), vec![json!(1), json!(2)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_loop_drains_on_interval_ticks() {
        let queue = queue().await;
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator = Arc::new(
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online())
                .with_settings(
                    SyncSettings::default().with_sync_interval(Duration::from_millis(50)),
                ),
        );

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await;
            }
        });

        // Enqueued after the startup drain; only the timer can pick it up.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(TaskKind::CreateEntity, json!("late")).await.unwrap();
        assert!(
            wait_for_deliveries(&dispatcher, 1).await,
            "interval tick should drain the queue"
        );

        stop_tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(dispatcher.delivered(), vec![json!("late")]);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_syncing_task_is_recovered_by_the_next_cycle() {
        let queue = queue().await;
        let stuck = queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        queue.mark_syncing(&stuck.id).await.unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let orchestrator =
            SyncOrchestrator::new(queue.clone(), dispatcher.clone(), NetworkMonitor::online())
                .with_settings(
                    SyncSettings::default().with_task_timeout(Duration::from_secs(10)),
                );

        // Still within the dispatch window: left for whoever is sending it.
        let report = completed(orchestrator.sync_now().await);
        assert_eq!(report.attempted(), 0);
        let stored = queue.get(&stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Syncing);

        backdate(&queue, &stuck.id, 60_000).await;
        let report = completed(orchestrator.sync_now().await);
        assert_eq!(report.succeeded, 1);
        assert_eq!(dispatcher.delivered(), vec![json!(1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_drainer_on_shared_store_skips_in_flight_task() {
        let queue = queue().await;
        queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let gated = Arc::new(GatedDispatcher::default());
        let first = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            gated.clone(),
            NetworkMonitor::online(),
        ));
        let running = tokio::spawn({
            let first = first.clone();
            async move { first.sync_now().await }
        });
        gated.entered.notified().await;

        let other = Arc::new(ScriptedDispatcher::default());
        let second =
            SyncOrchestrator::new(queue.clone(), other.clone(), NetworkMonitor::online());
        let report = second.drain_now().await;

        assert_eq!(report.attempted(), 0);
        assert!(other.delivered().is_empty());

        gated.release.notify_one();
        assert_eq!(completed(running.await.unwrap()).succeeded, 1);
        assert_eq!(gated.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drain_now_waits_for_a_running_drain_instead_of_coalescing() {
        let queue = queue().await;
        queue.enqueue(TaskKind::CreateEntity, json!(1)).await.unwrap();
        let dispatcher = Arc::new(GatedDispatcher::default());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            queue.clone(),
            dispatcher.clone(),
            NetworkMonitor::online(),
        ));
        let running = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.sync_now().await }
        });
        dispatcher.entered.notified().await;

        queue.enqueue(TaskKind::CreateEntity, json!(2)).await.unwrap();
        let waiting = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.drain_now().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.release.notify_one();

        let first = completed(running.await.unwrap());
        let second = waiting.await.unwrap();
        assert_eq!(first.succeeded + second.succeeded, 2);
        assert_eq!(second.cycles, 1);
        assert_eq!(dispatcher.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
