// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{
    sync::{Arc, LazyLock},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::{
    Key, KeyValue,
    metrics::{Counter, Histogram},
};
use pwl_storage::{RepositoryError, StorageCapability};
use thiserror::Error;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{METER, State};

const TASK_NAME: Key = Key::from_static_str("task.name");
const TASK_STATUS: Key = Key::from_static_str("task.status");

static TASK_RUN_DURATION: LazyLock<Histogram<u64>> = LazyLock::new(|| {
    METER
        .u64_histogram("task.run.duration")
        .with_description("The time it took to run a periodic task.")
        .with_unit("ms")
        .build()
});

static TASK_RUN_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("task.run.failures")
        .with_description("The number of runs of a periodic task which failed.")
        .with_unit("{run}")
        .build()
});

/// Error returned by a failing task run. The run is retried at the next
/// interval.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The storage backend failed
    #[error("storage backend failed")]
    Repository(#[from] RepositoryError),

    /// Subtracting the lifetime from the current time overflowed
    #[error("cannot compute the cutoff {lifetime} before {now}")]
    CutoffOutOfRange {
        /// The current time
        now: DateTime<Utc>,

        /// The configured lifetime
        lifetime: chrono::Duration,
    },
}

/// How a task is scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskMode {
    /// Wait a full interval before the first run, ignore interval overrides
    #[default]
    Production,

    /// Run immediately, honour interval overrides
    Test,
}

/// The timing of a [`PeriodicTask`], fixed when the task is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskTiming {
    default_interval: Duration,
    mode: TaskMode,
    interval_override: Option<Duration>,
}

impl TaskTiming {
    /// Create a new [`TaskTiming`]
    ///
    /// The override is kept but only used in [`TaskMode::Test`].
    #[must_use]
    pub const fn new(
        default_interval: Duration,
        mode: TaskMode,
        interval_override: Option<Duration>,
    ) -> Self {
        Self {
            default_interval,
            mode,
            interval_override,
        }
    }

    /// Production timing with the given interval
    #[must_use]
    pub const fn production(interval: Duration) -> Self {
        Self::new(interval, TaskMode::Production, None)
    }

    /// Time between the end of a run and the start of the next one
    #[must_use]
    pub fn interval(&self) -> Duration {
        match (self.mode, self.interval_override) {
            (TaskMode::Test, Some(interval)) => interval,
            _ => self.default_interval,
        }
    }

    /// Time to wait before the first run
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        match self.mode {
            TaskMode::Test => Duration::ZERO,
            TaskMode::Production => self.interval(),
        }
    }
}

/// A task run periodically by the [`TaskScheduler`]
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    /// A stable identifier for the task, used in logs, metrics and interval
    /// overrides
    fn name(&self) -> &'static str;

    /// The timing of the task
    fn timing(&self) -> &TaskTiming;

    /// Time between the end of a run and the start of the next one
    fn interval(&self) -> Duration {
        self.timing().interval()
    }

    /// Time to wait before the first run
    fn initial_delay(&self) -> Duration {
        self.timing().initial_delay()
    }

    /// The storage capability the task relies on. The task is not scheduled
    /// on backends which don't offer it.
    fn required_capability(&self) -> StorageCapability {
        StorageCapability::TransactionalRelational
    }

    /// Run the task once
    async fn run(&self, state: &State) -> Result<(), TaskError>;
}

/// Runs each registered [`PeriodicTask`] in its own loop
pub struct TaskScheduler {
    state: State,
    cancellation_token: CancellationToken,
    tasks: Vec<Arc<dyn PeriodicTask>>,
}

impl TaskScheduler {
    /// Create a new scheduler, without any task
    #[must_use]
    pub fn new(state: State, cancellation_token: CancellationToken) -> Self {
        Self {
            state,
            cancellation_token,
            tasks: Vec::new(),
        }
    }

    /// Register a task on the scheduler
    ///
    /// Tasks requiring a capability the storage backend doesn't offer are
    /// dropped.
    pub fn register(&mut self, task: impl PeriodicTask) -> &mut Self {
        let capability = self.state.capability();
        if task.required_capability() != capability {
            tracing::info!(
                task.name = task.name(),
                storage.capability = %capability,
                required_capability = %task.required_capability(),
                "Not scheduling task on this storage backend"
            );
            return self;
        }

        tracing::debug!(
            task.name = task.name(),
            interval = ?task.interval(),
            initial_delay = ?task.initial_delay(),
            "Registered task"
        );
        self.tasks.push(Arc::new(task));
        self
    }

    /// The names of the tasks which will be run
    pub fn task_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(|task| task.name())
    }

    /// Spawn a loop for each registered task on the [`TaskTracker`]
    pub fn run(self, task_tracker: &TaskTracker) {
        for task in self.tasks {
            task_tracker.spawn(run_loop(
                self.state.clone(),
                task,
                self.cancellation_token.clone(),
            ));
        }
    }
}

async fn run_loop(state: State, task: Arc<dyn PeriodicTask>, cancellation_token: CancellationToken) {
    let mut delay = task.initial_delay();

    loop {
        // Shutting down only interrupts the wait, never a run in progress
        tokio::select! {
            biased;

            () = cancellation_token.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        run_once(&state, task.as_ref()).await;
        delay = task.interval();
    }

    tracing::debug!(task.name = task.name(), "Task stopped");
}

async fn run_once(state: &State, task: &dyn PeriodicTask) {
    let span = tracing::info_span!(
        "task.run",
        task.name = task.name(),
        "otel.status_code" = tracing::field::Empty,
    );

    let start = Instant::now();
    let result = task.run(state).instrument(span.clone()).await;
    let duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);

    match result {
        Ok(()) => {
            span.record("otel.status_code", "OK");
            TASK_RUN_DURATION.record(
                duration_ms,
                &[
                    KeyValue::new(TASK_NAME, task.name()),
                    KeyValue::new(TASK_STATUS, "success"),
                ],
            );
        }

        Err(e) => {
            span.record("otel.status_code", "ERROR");
            TASK_RUN_DURATION.record(
                duration_ms,
                &[
                    KeyValue::new(TASK_NAME, task.name()),
                    KeyValue::new(TASK_STATUS, "error"),
                ],
            );
            TASK_RUN_FAILURES.add(1, &[KeyValue::new(TASK_NAME, task.name())]);

            tracing::error!(
                parent: &span,
                error = &e as &dyn std::error::Error,
                "Task failed, it will be retried at the next interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pwl_data_model::MockClock;
    use pwl_storage_memory::MemoryRepositoryFactory;

    use super::*;

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct TestTask {
        timing: TaskTiming,
        run_time: Duration,
        fail: bool,
        counters: Arc<Counters>,
    }

    impl TestTask {
        fn new(timing: TaskTiming) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let task = Self {
                timing,
                run_time: Duration::ZERO,
                fail: false,
                counters: Arc::clone(&counters),
            };
            (task, counters)
        }
    }

    #[async_trait]
    impl PeriodicTask for TestTask {
        fn name(&self) -> &'static str {
            "test-task"
        }

        fn timing(&self) -> &TaskTiming {
            &self.timing
        }

        async fn run(&self, _state: &State) -> Result<(), TaskError> {
            self.counters.started.fetch_add(1, Ordering::SeqCst);
            let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters
                .max_in_flight
                .fetch_max(in_flight, Ordering::SeqCst);

            tokio::time::sleep(self.run_time).await;

            self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(TaskError::Repository(RepositoryError::from_error(
                    std::io::Error::other("storage is down"),
                )))
            } else {
                Ok(())
            }
        }
    }

    fn state() -> State {
        State::new(MemoryRepositoryFactory::new(), MockClock::default())
    }

    fn started(counters: &Counters) -> usize {
        counters.started.load(Ordering::SeqCst)
    }

    #[test]
    fn test_production_timing() {
        let timing = TaskTiming::new(
            Duration::from_secs(3600),
            TaskMode::Production,
            Some(Duration::from_secs(5)),
        );

        // Overrides are ignored in production
        assert_eq!(timing.interval(), Duration::from_secs(3600));
        assert_eq!(timing.initial_delay(), timing.interval());
    }

    #[test]
    fn test_test_mode_timing() {
        let timing = TaskTiming::new(
            Duration::from_secs(3600),
            TaskMode::Test,
            Some(Duration::from_secs(5)),
        );
        assert_eq!(timing.interval(), Duration::from_secs(5));
        assert_eq!(timing.initial_delay(), Duration::ZERO);

        let timing = TaskTiming::new(Duration::from_secs(3600), TaskMode::Test, None);
        assert_eq!(timing.interval(), Duration::from_secs(3600));
        assert_eq!(timing.initial_delay(), Duration::ZERO);
    }

    #[test]
    fn test_register_checks_capability() {
        let (task, _) = TestTask::new(TaskTiming::production(Duration::from_secs(10)));
        let mut scheduler = TaskScheduler::new(state(), CancellationToken::new());
        scheduler.register(task);
        assert_eq!(scheduler.task_names().collect::<Vec<_>>(), vec!["test-task"]);

        let (task, _) = TestTask::new(TaskTiming::production(Duration::from_secs(10)));
        let state = State::new(
            MemoryRepositoryFactory::new().with_capability(StorageCapability::Other),
            MockClock::default(),
        );
        let mut scheduler = TaskScheduler::new(state, CancellationToken::new());
        scheduler.register(task);
        assert_eq!(scheduler.task_names().count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_production_waits_one_interval() {
        let (task, counters) = TestTask::new(TaskTiming::production(Duration::from_secs(10)));
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let mut scheduler = TaskScheduler::new(state(), cancellation_token.clone());
        scheduler.register(task);
        scheduler.run(&task_tracker);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(started(&counters), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(started(&counters), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(started(&counters), 2);

        cancellation_token.cancel();
        task_tracker.close();
        task_tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_test_mode_runs_immediately() {
        let (task, counters) = TestTask::new(TaskTiming::new(
            Duration::from_secs(3600),
            TaskMode::Test,
            Some(Duration::from_secs(10)),
        ));
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let mut scheduler = TaskScheduler::new(state(), cancellation_token.clone());
        scheduler.register(task);
        scheduler.run(&task_tracker);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(started(&counters), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(started(&counters), 2);

        cancellation_token.cancel();
        task_tracker.close();
        task_tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_never_overlap() {
        let (mut task, counters) = TestTask::new(TaskTiming::production(Duration::from_secs(10)));
        task.run_time = Duration::from_secs(15);
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let mut scheduler = TaskScheduler::new(state(), cancellation_token.clone());
        scheduler.register(task);
        scheduler.run(&task_tracker);

        // First run starts at 10s and ends at 25s, the second one starts at 35s
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(started(&counters), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(started(&counters), 2);
        assert_eq!(counters.max_in_flight.load(Ordering::SeqCst), 1);

        cancellation_token.cancel();
        task_tracker.close();
        task_tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_at_next_interval() {
        let (mut task, counters) = TestTask::new(TaskTiming::production(Duration::from_secs(10)));
        task.fail = true;
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let mut scheduler = TaskScheduler::new(state(), cancellation_token.clone());
        scheduler.register(task);
        scheduler.run(&task_tracker);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(started(&counters), 3);

        cancellation_token.cancel();
        task_tracker.close();
        task_tracker.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_lets_run_complete() {
        let (mut task, counters) = TestTask::new(TaskTiming::new(
            Duration::from_secs(10),
            TaskMode::Test,
            None,
        ));
        task.run_time = Duration::from_secs(5);
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        let mut scheduler = TaskScheduler::new(state(), cancellation_token.clone());
        scheduler.register(task);
        scheduler.run(&task_tracker);

        // Cancel while the first run is in progress
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counters.in_flight.load(Ordering::SeqCst), 1);
        cancellation_token.cancel();

        task_tracker.close();
        task_tracker.wait().await;

        assert_eq!(started(&counters), 1);
        assert_eq!(counters.in_flight.load(Ordering::SeqCst), 0);
    }
}
