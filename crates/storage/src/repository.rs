// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};
use thiserror::Error;

use crate::passwordless::PasswordlessRepository;

/// Wraps a repository, mapping its errors with a function
///
/// Backends use it to erase their own error type behind a
/// [`RepositoryError`].
pub struct MapErr<R, F> {
    pub(crate) inner: R,
    pub(crate) mapper: F,
}

impl<R, F> MapErr<R, F> {
    /// Wrap a repository
    #[must_use]
    pub fn new(inner: R, mapper: F) -> Self {
        Self { inner, mapper }
    }
}

/// The guarantees a storage backend offers to the code using it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCapability {
    /// A relational backend, where each repository is a database transaction
    /// with consistent reads and atomic commits
    TransactionalRelational,

    /// Any other backend, which handles expiry of records on its own
    Other,
}

impl std::fmt::Display for StorageCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransactionalRelational => f.write_str("transactional-relational"),
            Self::Other => f.write_str("other"),
        }
    }
}

/// A [`RepositoryFactory`] creates [`BoxRepository`], each of them scoped to
/// a single transaction
#[async_trait]
pub trait RepositoryFactory: Send + Sync {
    /// The guarantees offered by the repositories created by this factory
    fn capability(&self) -> StorageCapability;

    /// Create a new [`BoxRepository`], starting a new transaction
    ///
    /// # Errors
    ///
    /// Returns a [`RepositoryError`] if the transaction could not be started
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a (boxed) typed-erased repository
    fn boxed(self) -> BoxRepository<E>
    where
        Self: Sync + Sized + 'static,
    {
        Box::new(self)
    }

    /// Map the error type of the repository with the given function
    fn map_err<Mapper>(self, mapper: Mapper) -> MapErr<Self, Mapper>
    where
        Self: Sized,
    {
        MapErr::new(self, mapper)
    }
}

/// An opaque, type-erased error
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RepositoryError {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] from any error kind
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(value),
        }
    }
}

/// A type-erased [`Repository`]
pub type BoxRepository<E = RepositoryError> = Box<dyn Repository<E> + Send + Sync + 'static>;

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
///
/// Dropping a [`RepositoryTransaction`] without saving it rolls it back.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`]
    /// functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit
    /// the transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`PasswordlessRepository`]
    fn passwordless<'c>(
        &'c mut self,
    ) -> Box<dyn PasswordlessRepository<Error = Self::Error> + 'c>;
}

impl<R, F, E> Repository<E> for MapErr<R, F>
where
    R: RepositoryAccess + RepositoryTransaction<Error = <R as RepositoryAccess>::Error>,
    F: FnMut(<R as RepositoryAccess>::Error) -> E + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
}

impl<R, F, E> RepositoryTransaction for MapErr<R, F>
where
    R: RepositoryTransaction,
    R::Error: 'static,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: 'static,
{
    type Error = E;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let this = *self;
        Box::new(this.inner).save().map_err(this.mapper).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let this = *self;
        Box::new(this.inner).cancel().map_err(this.mapper).boxed()
    }
}

impl<R, F, E> RepositoryAccess for MapErr<R, F>
where
    R: RepositoryAccess,
    F: FnMut(R::Error) -> E + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn passwordless<'c>(
        &'c mut self,
    ) -> Box<dyn PasswordlessRepository<Error = Self::Error> + 'c> {
        Box::new(MapErr::new(self.inner.passwordless(), &mut self.mapper))
    }
}

impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
    type Error = R::Error;

    fn passwordless<'c>(
        &'c mut self,
    ) -> Box<dyn PasswordlessRepository<Error = Self::Error> + 'c> {
        (**self).passwordless()
    }
}
