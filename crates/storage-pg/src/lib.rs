// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for a PostgreSQL database
//!
//! This backend uses [`sqlx`] to interact with the database. Each
//! [`PgRepository`] wraps a database transaction, which is committed when the
//! repository is saved, and rolled back when it is cancelled or dropped.
//!
//! Queries are built at runtime and their text is recorded on the current
//! tracing span as `db.query.text`.
//!
//! # Migrations
//!
//! The database schema is managed by the migrations in the `migrations`
//! directory, which are embedded in the [`MIGRATOR`]. They are run by the
//! `database migrate` command of the CLI.

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::migrate::Migrator;

mod errors;
pub(crate) mod passwordless;
pub(crate) mod repository;
pub(crate) mod telemetry;
pub(crate) mod tracing;

pub use self::{
    errors::{DatabaseError, DatabaseInconsistencyError},
    passwordless::PgPasswordlessRepository,
    repository::{PgRepository, PgRepositoryFactory},
    tracing::ExecuteExt,
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();
