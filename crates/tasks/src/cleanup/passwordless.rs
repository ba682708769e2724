// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Deletion of expired passwordless devices
//!
//! A passwordless device has no expiry of its own: it is kept alive by its
//! codes. Once every code of a device is older than the code lifetime, the
//! device and its codes are deleted.
//!
//! Candidates are found by listing the codes created before the cutoff. Each
//! candidate is then re-checked in its own transaction, with the device row
//! locked, so that a code issued between the two steps keeps the device
//! alive.

use std::{collections::HashSet, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::metrics::Counter;
use pwl_data_model::is_device_expired;
use pwl_storage::{RepositoryAccess, RepositoryError, StorageCapability};
use tracing::{debug, info};

use crate::{
    METER, State,
    scheduler::{PeriodicTask, TaskError, TaskTiming},
};

static DEVICES_DELETED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("passwordless.devices.deleted")
        .with_description("The number of expired passwordless devices deleted.")
        .with_unit("{device}")
        .build()
});

/// Why a candidate device was not deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The device was already gone when its transaction started
    DeviceNotFound,

    /// The device has at least one code which is not expired
    CodesStillValid,
}

/// What happened to a single candidate device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOutcome {
    /// The device and all its codes were deleted
    Deleted,

    /// The device was left untouched
    Skipped(SkipReason),
}

/// Summary of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of distinct devices having at least one expired code
    pub candidates: usize,

    /// Number of devices deleted
    pub deleted: usize,

    /// Number of candidates which were already deleted
    pub not_found: usize,

    /// Number of candidates kept because one of their codes is still valid
    pub retained: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: DeviceOutcome) {
        match outcome {
            DeviceOutcome::Deleted => self.deleted += 1,
            DeviceOutcome::Skipped(SkipReason::DeviceNotFound) => self.not_found += 1,
            DeviceOutcome::Skipped(SkipReason::CodesStillValid) => self.retained += 1,
        }
    }
}

/// Periodically deletes passwordless devices whose codes all expired
pub struct DeleteExpiredPasswordlessDevices {
    code_lifetime: chrono::Duration,
    timing: TaskTiming,
}

impl DeleteExpiredPasswordlessDevices {
    /// The name of the task
    pub const NAME: &'static str = "delete-expired-passwordless-devices";

    /// Default time between two sweeps
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

    /// Create the task with the configured code lifetime
    #[must_use]
    pub fn new(code_lifetime: chrono::Duration, timing: TaskTiming) -> Self {
        Self {
            code_lifetime,
            timing,
        }
    }

    /// Run one sweep, deleting the expired devices
    ///
    /// Backends which are not transactional are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend fails, or if the code lifetime
    /// puts the cutoff out of the representable range. Devices handled before
    /// a failure stay deleted.
    #[tracing::instrument(name = "job.delete_expired_passwordless_devices", skip_all, err)]
    pub async fn sweep(&self, state: &State) -> Result<SweepReport, TaskError> {
        let capability = state.capability();
        if capability != StorageCapability::TransactionalRelational {
            debug!(
                storage.capability = %capability,
                "storage backend expires passwordless devices on its own"
            );
            return Ok(SweepReport::default());
        }

        let now = state.clock().now();
        let cutoff = now
            .checked_sub_signed(self.code_lifetime)
            .ok_or(TaskError::CutoffOutOfRange {
                now,
                lifetime: self.code_lifetime,
            })?;
        let candidates = Self::candidate_devices(state, cutoff).await?;

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for device_id_hash in &candidates {
            let outcome = Self::expire_device(state, cutoff, device_id_hash).await?;
            report.record(outcome);
        }

        DEVICES_DELETED.add(u64::try_from(report.deleted).unwrap_or(u64::MAX), &[]);

        if report.deleted == 0 {
            debug!(
                candidates = report.candidates,
                "no expired passwordless devices to clean up"
            );
        } else {
            info!(
                count = report.deleted,
                candidates = report.candidates,
                not_found = report.not_found,
                retained = report.retained,
                "cleaned up expired passwordless devices"
            );
        }

        Ok(report)
    }

    /// The distinct devices which have at least one code created before the
    /// cutoff
    pub(crate) async fn candidate_devices(
        state: &State,
        cutoff: DateTime<Utc>,
    ) -> Result<HashSet<String>, RepositoryError> {
        let mut repo = state.repository().await?;
        let codes = repo.passwordless().list_codes_before(cutoff).await?;
        repo.cancel().await?;

        Ok(codes.into_iter().map(|code| code.device_id_hash).collect())
    }

    /// Delete a single device if all its codes are expired, in its own
    /// transaction
    #[tracing::instrument(
        name = "job.delete_expired_passwordless_devices.expire_device",
        skip_all,
        fields(passwordless_device.id_hash = device_id_hash),
        err,
    )]
    pub(crate) async fn expire_device(
        state: &State,
        cutoff: DateTime<Utc>,
        device_id_hash: &str,
    ) -> Result<DeviceOutcome, RepositoryError> {
        let mut repo = state.repository().await?;

        let Some(device) = repo.passwordless().lookup_device(device_id_hash).await? else {
            repo.cancel().await?;
            debug!("passwordless device already deleted");
            return Ok(DeviceOutcome::Skipped(SkipReason::DeviceNotFound));
        };

        let codes = repo
            .passwordless()
            .list_codes_for_device(&device.id_hash)
            .await?;

        let outcome = if is_device_expired(cutoff, &codes) {
            repo.passwordless().remove_device(&device.id_hash).await?;
            DeviceOutcome::Deleted
        } else {
            debug!("passwordless device still has a valid code");
            DeviceOutcome::Skipped(SkipReason::CodesStillValid)
        };

        repo.save().await?;

        Ok(outcome)
    }
}

#[async_trait]
impl PeriodicTask for DeleteExpiredPasswordlessDevices {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn timing(&self) -> &TaskTiming {
        &self.timing
    }

    async fn run(&self, state: &State) -> Result<(), TaskError> {
        self.sweep(state).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use assert_matches::assert_matches;
    use pwl_data_model::{Clock, MockClock, PasswordlessContact, PasswordlessDevice};
    use pwl_storage::{BoxRepository, RepositoryFactory};
    use pwl_storage_memory::MemoryRepositoryFactory;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaChaRng;

    use super::*;

    struct TestContext {
        factory: MemoryRepositoryFactory,
        clock: Arc<MockClock>,
        state: State,
        rng: ChaChaRng,
        task: DeleteExpiredPasswordlessDevices,
    }

    impl TestContext {
        fn new() -> Self {
            let factory = MemoryRepositoryFactory::new();
            let clock = Arc::new(MockClock::default());
            let state = State::new(factory.clone(), Arc::clone(&clock));
            let task = DeleteExpiredPasswordlessDevices::new(
                chrono::Duration::minutes(15),
                TaskTiming::production(DeleteExpiredPasswordlessDevices::DEFAULT_INTERVAL),
            );

            Self {
                factory,
                clock,
                state,
                rng: ChaChaRng::seed_from_u64(42),
                task,
            }
        }

        fn cutoff(&self) -> DateTime<Utc> {
            self.clock.now() - chrono::Duration::minutes(15)
        }

        async fn repo(&self) -> BoxRepository {
            self.factory.create().await.unwrap()
        }

        async fn add_device(&self, hash: &str) -> PasswordlessDevice {
            let mut repo = self.repo().await;
            let device = repo
                .passwordless()
                .add_device(
                    hash.to_owned(),
                    PasswordlessContact::Email(format!("{hash}@example.com")),
                    "salt".to_owned(),
                )
                .await
                .unwrap();
            repo.save().await.unwrap();
            device
        }

        /// Add a code to the device, created the given time ago
        async fn add_code(&mut self, device: &PasswordlessDevice, age: chrono::Duration) {
            let clock = MockClock::new(self.clock.now() - age);
            let link_code_hash = format!("{}-{}", device.id_hash, self.rng.next_u64());
            let mut repo = self.repo().await;
            repo.passwordless()
                .add_code(&mut self.rng, &clock, device, link_code_hash)
                .await
                .unwrap();
            repo.save().await.unwrap();
        }

        async fn add_device_with_codes(
            &mut self,
            hash: &str,
            ages_in_minutes: &[i64],
        ) -> PasswordlessDevice {
            let device = self.add_device(hash).await;
            for age in ages_in_minutes {
                self.add_code(&device, chrono::Duration::minutes(*age)).await;
            }
            device
        }

        async fn device_exists(&self, hash: &str) -> bool {
            let mut repo = self.repo().await;
            let device = repo.passwordless().lookup_device(hash).await.unwrap();
            repo.cancel().await.unwrap();
            device.is_some()
        }

        async fn code_count(&self, hash: &str) -> usize {
            let mut repo = self.repo().await;
            let codes = repo.passwordless().list_codes_for_device(hash).await.unwrap();
            repo.cancel().await.unwrap();
            codes.len()
        }
    }

    /// A backend which fails to start any transaction, and counts attempts
    struct UnavailableFactory {
        capability: StorageCapability,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RepositoryFactory for UnavailableFactory {
        fn capability(&self) -> StorageCapability {
            self.capability
        }

        async fn create(&self) -> Result<BoxRepository, RepositoryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(RepositoryError::from_error(std::io::Error::other(
                "storage unavailable",
            )))
        }
    }

    fn unavailable_state(capability: StorageCapability) -> (State, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let factory = UnavailableFactory {
            capability,
            attempts: Arc::clone(&attempts),
        };
        (State::new(factory, MockClock::default()), attempts)
    }

    #[tokio::test]
    async fn test_deletes_only_fully_expired_devices() {
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("expired", &[20, 30]).await;
        ctx.add_device_with_codes("mixed", &[20, 5]).await;
        ctx.add_device_with_codes("fresh", &[5]).await;

        let report = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                candidates: 2,
                deleted: 1,
                not_found: 0,
                retained: 1,
            }
        );

        assert!(!ctx.device_exists("expired").await);
        assert_eq!(ctx.code_count("expired").await, 0);

        // The expired code of a device with a valid one is kept
        assert!(ctx.device_exists("mixed").await);
        assert_eq!(ctx.code_count("mixed").await, 2);

        assert!(ctx.device_exists("fresh").await);
        assert_eq!(ctx.code_count("fresh").await, 1);
    }

    #[tokio::test]
    async fn test_code_created_at_cutoff_is_kept() {
        let mut ctx = TestContext::new();
        let at_cutoff = ctx.add_device("at-cutoff").await;
        ctx.add_code(&at_cutoff, chrono::Duration::minutes(15)).await;
        let just_before = ctx.add_device("just-before").await;
        ctx.add_code(
            &just_before,
            chrono::Duration::minutes(15) + chrono::Duration::milliseconds(1),
        )
        .await;

        let report = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.deleted, 1);

        assert!(ctx.device_exists("at-cutoff").await);
        assert!(!ctx.device_exists("just-before").await);
    }

    #[tokio::test]
    async fn test_device_without_codes_is_deleted() {
        let ctx = TestContext::new();
        ctx.add_device("empty").await;

        let outcome = DeleteExpiredPasswordlessDevices::expire_device(
            &ctx.state,
            ctx.cutoff(),
            "empty",
        )
        .await
        .unwrap();

        assert_eq!(outcome, DeviceOutcome::Deleted);
        assert!(!ctx.device_exists("empty").await);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("expired", &[20]).await;
        ctx.add_device_with_codes("mixed", &[20, 1]).await;

        let first = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(first.deleted, 1);
        let after_first = ctx.factory.snapshot().await;

        let second = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(second.deleted, 0);
        assert_eq!(second.retained, 1);
        let after_second = ctx.factory.snapshot().await;

        assert_eq!(after_first.device_count(), after_second.device_count());
        assert_eq!(after_first.code_count(), after_second.code_count());
    }

    #[tokio::test]
    async fn test_code_issued_after_candidate_read_keeps_device() {
        let mut ctx = TestContext::new();
        let device = ctx.add_device_with_codes("device", &[20]).await;
        let cutoff = ctx.cutoff();

        let candidates = DeleteExpiredPasswordlessDevices::candidate_devices(&ctx.state, cutoff)
            .await
            .unwrap();
        assert!(candidates.contains("device"));

        // A new code is issued before the device gets its transaction
        ctx.add_code(&device, chrono::Duration::zero()).await;

        let outcome = DeleteExpiredPasswordlessDevices::expire_device(&ctx.state, cutoff, "device")
            .await
            .unwrap();
        assert_eq!(outcome, DeviceOutcome::Skipped(SkipReason::CodesStillValid));
        assert!(ctx.device_exists("device").await);
        assert_eq!(ctx.code_count("device").await, 2);
    }

    #[tokio::test]
    async fn test_device_deleted_concurrently_is_skipped() {
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("first", &[20]).await;
        ctx.add_device_with_codes("second", &[30]).await;
        let cutoff = ctx.cutoff();

        let candidates = DeleteExpiredPasswordlessDevices::candidate_devices(&ctx.state, cutoff)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);

        // Another actor deletes the first device in the meantime
        let mut repo = ctx.repo().await;
        repo.passwordless().remove_device("first").await.unwrap();
        repo.save().await.unwrap();

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };
        for hash in &candidates {
            let outcome = DeleteExpiredPasswordlessDevices::expire_device(&ctx.state, cutoff, hash)
                .await
                .unwrap();
            if hash == "first" {
                assert_eq!(outcome, DeviceOutcome::Skipped(SkipReason::DeviceNotFound));
            } else {
                assert_eq!(outcome, DeviceOutcome::Deleted);
            }
            report.record(outcome);
        }

        assert_eq!(report.deleted, 1);
        assert_eq!(report.not_found, 1);
        assert!(!ctx.device_exists("second").await);
    }

    #[tokio::test]
    async fn test_non_relational_backend_is_skipped() {
        let (state, attempts) = unavailable_state(StorageCapability::Other);
        let task = TestContext::new().task;

        let report = task.sweep(&state).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        // Same thing with data in the backend: nothing is touched
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("expired", &[20]).await;
        let state = State::new(
            ctx.factory
                .clone()
                .with_capability(StorageCapability::Other),
            Arc::clone(&ctx.clock),
        );
        let report = ctx.task.sweep(&state).await.unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(ctx.device_exists("expired").await);
    }

    #[tokio::test]
    async fn test_storage_failure_fails_the_run() {
        let (state, attempts) = unavailable_state(StorageCapability::TransactionalRelational);
        let task = TestContext::new().task;

        let result = task.run(&state).await;
        assert_matches!(result, Err(TaskError::Repository(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_fails_the_run() {
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("expired", &[20]).await;
        let task = DeleteExpiredPasswordlessDevices::new(
            chrono::Duration::milliseconds(9_000_000_000_000_000),
            TaskTiming::production(DeleteExpiredPasswordlessDevices::DEFAULT_INTERVAL),
        );

        let result = task.run(&ctx.state).await;
        assert_matches!(result, Err(TaskError::CutoffOutOfRange { .. }));
        assert!(ctx.device_exists("expired").await);

        // The same task keeps running at the next interval
        assert_matches!(
            task.run(&ctx.state).await,
            Err(TaskError::CutoffOutOfRange { .. })
        );
    }

    #[tokio::test]
    async fn test_expiry_follows_the_clock() {
        let mut ctx = TestContext::new();
        ctx.add_device_with_codes("device", &[10]).await;

        let report = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert!(ctx.device_exists("device").await);

        ctx.clock.advance(chrono::Duration::minutes(6));
        let report = ctx.task.sweep(&ctx.state).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(!ctx.device_exists("device").await);
    }

    #[test]
    fn test_timing() {
        let task = TestContext::new().task;
        assert_eq!(task.name(), "delete-expired-passwordless-devices");
        assert_eq!(task.interval(), Duration::from_secs(3600));
        assert_eq!(task.initial_delay(), task.interval());
        assert_eq!(
            task.required_capability(),
            StorageCapability::TransactionalRelational
        );
    }
}
