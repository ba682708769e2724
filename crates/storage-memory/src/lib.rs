// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An in-memory implementation of the storage traits
//!
//! All the data lives in a single [`MemoryState`] behind an asynchronous
//! mutex. Creating a repository locks that state for the whole lifetime of
//! the repository and hands out a working copy of it: saving the repository
//! writes the copy back, cancelling or dropping it throws the copy away.
//!
//! Transactions are therefore fully serialised, which is stricter than what
//! the PostgreSQL backend offers, but gives the same guarantees to code
//! relying on row locks.
//!
//! This backend is meant for tests and local development. Nothing is
//! persisted across restarts.

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod errors;
mod passwordless;
mod repository;

pub use self::{
    errors::MemoryError,
    passwordless::MemoryPasswordlessRepository,
    repository::{MemoryRepository, MemoryRepositoryFactory, MemoryState},
};
