// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use futures_util::{FutureExt, future::BoxFuture};
use pwl_data_model::{PasswordlessCode, PasswordlessDevice};
use pwl_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction, StorageCapability,
    passwordless::PasswordlessRepository,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::{MemoryError, passwordless::MemoryPasswordlessRepository};

/// The whole content of the in-memory storage
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub(crate) devices: BTreeMap<String, PasswordlessDevice>,
    pub(crate) codes: BTreeMap<Ulid, PasswordlessCode>,
}

impl MemoryState {
    /// Number of devices currently stored
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of codes currently stored, across all devices
    #[must_use]
    pub fn code_count(&self) -> usize {
        self.codes.len()
    }
}

/// A [`RepositoryFactory`] handing out repositories over a shared
/// [`MemoryState`]
#[derive(Clone)]
pub struct MemoryRepositoryFactory {
    state: Arc<Mutex<MemoryState>>,
    capability: StorageCapability,
}

impl Default for MemoryRepositoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepositoryFactory {
    /// Create a new factory over an empty state
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            capability: StorageCapability::TransactionalRelational,
        }
    }

    /// Advertise a different [`StorageCapability`] than the default
    /// transactional one
    #[must_use]
    pub fn with_capability(mut self, capability: StorageCapability) -> Self {
        self.capability = capability;
        self
    }

    /// Box the factory
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }

    /// Get a copy of the committed state
    ///
    /// This waits for any in-flight repository to be saved or cancelled.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    fn capability(&self) -> StorageCapability {
        self.capability
    }

    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        Ok(MemoryRepository::new(guard).boxed())
    }
}

/// A single transaction over the [`MemoryState`]
pub struct MemoryRepository {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryRepository {
    fn new(guard: OwnedMutexGuard<MemoryState>) -> Self {
        let working = guard.clone();
        Self { guard, working }
    }

    /// Transform the repository into a type-erased [`BoxRepository`]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl Repository<MemoryError> for MemoryRepository {}

impl RepositoryTransaction for MemoryRepository {
    type Error = MemoryError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let Self { mut guard, working } = *self;
        *guard = working;
        tracing::trace!("Committed in-memory transaction");
        futures_util::future::ok(()).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        drop(self);
        futures_util::future::ok(()).boxed()
    }
}

impl RepositoryAccess for MemoryRepository {
    type Error = MemoryError;

    fn passwordless<'c>(
        &'c mut self,
    ) -> Box<dyn PasswordlessRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryPasswordlessRepository::new(&mut self.working))
    }
}
