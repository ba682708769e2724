// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use pwl_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction, StorageCapability,
    passwordless::PasswordlessRepository,
};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::Instrument;

use crate::{
    DatabaseError,
    passwordless::PgPasswordlessRepository,
    telemetry::{DB_CLIENT_CONNECTIONS_CREATE_TIME_HISTOGRAM, DB_TRANSACTIONS_ROLLED_BACK_COUNTER},
};

/// Hands out a [`PgRepository`] per transaction, taken from a connection
/// pool
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: PgPool,
}

impl PgRepositoryFactory {
    /// Wrap a PostgreSQL connection pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Box the factory
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }
}

#[async_trait]
impl RepositoryFactory for PgRepositoryFactory {
    fn capability(&self) -> StorageCapability {
        StorageCapability::TransactionalRelational
    }

    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let start = Instant::now();
        let repo = PgRepository::begin(&self.pool)
            .await
            .map_err(RepositoryError::from_error)?;

        let elapsed_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        DB_CLIENT_CONNECTIONS_CREATE_TIME_HISTOGRAM.record(elapsed_ms, &[]);

        Ok(repo.boxed())
    }
}

/// A single PostgreSQL transaction, exposing the repositories
///
/// Dropping it without calling [`RepositoryTransaction::save`] rolls the
/// transaction back.
pub struct PgRepository<C = Transaction<'static, Postgres>> {
    conn: C,
}

impl PgRepository {
    /// Start a transaction on a connection taken from the pool
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if no connection could be acquired or the
    /// transaction could not be started
    pub async fn begin(pool: &PgPool) -> Result<Self, DatabaseError> {
        let conn = pool.begin().await?;
        Ok(Self { conn })
    }

    /// Erase the backend error type behind a [`RepositoryError`]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl Repository<DatabaseError> for PgRepository {}

impl RepositoryTransaction for PgRepository {
    type Error = DatabaseError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        self.conn
            .commit()
            .map_err(DatabaseError::from)
            .instrument(tracing::info_span!("db.save"))
            .boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        DB_TRANSACTIONS_ROLLED_BACK_COUNTER.add(1, &[]);
        self.conn
            .rollback()
            .map_err(DatabaseError::from)
            .instrument(tracing::info_span!("db.cancel"))
            .boxed()
    }
}

impl<C> RepositoryAccess for PgRepository<C>
where
    C: AsMut<PgConnection> + Send,
{
    type Error = DatabaseError;

    fn passwordless<'c>(
        &'c mut self,
    ) -> Box<dyn PasswordlessRepository<Error = Self::Error> + 'c> {
        Box::new(PgPasswordlessRepository::new(self.conn.as_mut()))
    }
}
