// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Periodic maintenance tasks
//!
//! Tasks implement [`PeriodicTask`] and are registered on a [`TaskScheduler`],
//! which runs each of them in its own loop until the cancellation token is
//! triggered.

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use opentelemetry::metrics::Meter;
use pwl_data_model::Clock;
use pwl_storage::{BoxRepository, RepositoryError, RepositoryFactory, StorageCapability};
use tokio_util::sync::CancellationToken;

mod cleanup;
mod scheduler;

pub use self::{
    cleanup::{DeleteExpiredPasswordlessDevices, DeviceOutcome, SkipReason, SweepReport},
    scheduler::{PeriodicTask, TaskError, TaskMode, TaskScheduler, TaskTiming},
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

/// The dependencies shared by all the tasks
#[derive(Clone)]
pub struct State {
    repository_factory: Arc<dyn RepositoryFactory>,
    clock: Arc<dyn Clock>,
}

impl State {
    /// Create a new [`State`] from a storage backend and a clock
    pub fn new(
        repository_factory: impl RepositoryFactory + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        Self {
            repository_factory: Arc::new(repository_factory),
            clock: Arc::new(clock),
        }
    }

    /// The clock used to compute cutoffs
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        &self.clock
    }

    /// The guarantees offered by the storage backend
    #[must_use]
    pub fn capability(&self) -> StorageCapability {
        self.repository_factory.capability()
    }

    /// Start a new transaction on the storage backend
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails to start a transaction
    pub async fn repository(&self) -> Result<BoxRepository, RepositoryError> {
        self.repository_factory.create().await
    }
}

/// Initialise the task scheduler with all the tasks, without running it.
///
/// `interval_override` is asked for the override of each task by name. The
/// answer is only honoured in [`TaskMode::Test`].
#[must_use]
pub fn init(
    repository_factory: impl RepositoryFactory + 'static,
    clock: impl Clock + 'static,
    code_lifetime: chrono::Duration,
    mode: TaskMode,
    interval_override: impl Fn(&str) -> Option<Duration>,
    cancellation_token: CancellationToken,
) -> TaskScheduler {
    let state = State::new(repository_factory, clock);
    let mut scheduler = TaskScheduler::new(state, cancellation_token);

    let timing = TaskTiming::new(
        DeleteExpiredPasswordlessDevices::DEFAULT_INTERVAL,
        mode,
        interval_override(DeleteExpiredPasswordlessDevices::NAME),
    );
    scheduler.register(DeleteExpiredPasswordlessDevices::new(code_lifetime, timing));

    scheduler
}
