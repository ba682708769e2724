// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interactions with the storage backend
//!
//! This crate provides a set of traits that can be implemented to interact with
//! the storage backend. Those traits are called repositories and are grouped by
//! the type of data they manage.
//!
//! Each of those repositories can be accessed via the [`RepositoryAccess`]
//! trait. This trait can be wrapped in a [`BoxRepository`] to allow using it
//! without caring about the underlying storage backend, and without carrying
//! around the generic type parameter.
//!
//! A repository is always scoped to a single transaction: it is started when
//! the repository is created by a [`RepositoryFactory`], committed by
//! [`RepositoryTransaction::save`], and rolled back by
//! [`RepositoryTransaction::cancel`] or when the repository is dropped.
//!
//! Backends also advertise a [`StorageCapability`], which lets callers that
//! rely on transactional guarantees skip backends which don't offer them.
//!
//! # Defining a new repository
//!
//! To define a new repository, you have to:
//!   1. Define a new (async) repository trait, with the methods you need
//!   2. Write an implementation of this trait for each storage backend you want
//!      (currently [`pwl-storage-pg`] and [`pwl-storage-memory`])
//!   3. Implement it for [`Box`] and [`MapErr`] by delegating to the inner
//!      repository
//!   4. Make it accessible via the [`RepositoryAccess`] trait
//!
//! Repository traits follow a few conventions:
//!
//!   1. They define an associated error type, and all functions are faillible,
//!      and use that error type
//!   2. Lookups return an `Result<Option<T>, Self::Error>`, because 'not found'
//!      errors are usually cases that are handled differently
//!   3. Operations that need to record the current time use a [`Clock`]
//!      parameter. Operations that need to generate new IDs also use a random
//!      number generator.
//!   4. All the methods use an `&mut self`. This is ensures only one operation
//!      is done at a time on a single repository instance.
//!
//! [`pwl-storage-pg`]: https://docs.rs/pwl-storage-pg
//! [`pwl-storage-memory`]: https://docs.rs/pwl-storage-memory

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub(crate) mod repository;

pub mod passwordless;

pub use pwl_data_model::clock;

pub use self::{
    clock::{Clock, SystemClock},
    repository::{
        BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess,
        RepositoryError, RepositoryFactory, RepositoryTransaction, StorageCapability,
    },
};
