// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repositories to interact with passwordless login devices and their codes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pwl_data_model::{Clock, PasswordlessCode, PasswordlessContact, PasswordlessDevice};
use rand_core::RngCore;

use crate::MapErr;

/// A [`PasswordlessRepository`] helps interacting with [`PasswordlessDevice`]
/// and [`PasswordlessCode`] saved in the storage backend
#[async_trait]
pub trait PasswordlessRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup a [`PasswordlessDevice`] by the hash of its ID
    ///
    /// Backends with row-level locking lock the device row for the rest of
    /// the transaction, so that no code can be added to it concurrently.
    ///
    /// Returns `None` if no [`PasswordlessDevice`] was found
    ///
    /// # Parameters
    ///
    /// * `device_id_hash`: The hash of the device ID to lookup
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<PasswordlessDevice>, Self::Error>;

    /// Create a new [`PasswordlessDevice`]
    ///
    /// Returns the newly created [`PasswordlessDevice`]
    ///
    /// # Parameters
    ///
    /// * `device_id_hash`: The hash of the device ID
    /// * `contact`: The email address or phone number codes are sent to
    /// * `link_code_salt`: The salt used to hash the magic link codes
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if a
    /// device with the same hash already exists
    async fn add_device(
        &mut self,
        device_id_hash: String,
        contact: PasswordlessContact,
        link_code_salt: String,
    ) -> Result<PasswordlessDevice, Self::Error>;

    /// Create a new [`PasswordlessCode`] for a [`PasswordlessDevice`]
    ///
    /// Returns the newly created [`PasswordlessCode`]
    ///
    /// # Parameters
    ///
    /// * `rng`: The random number generator to use
    /// * `clock`: The clock used to generate timestamps
    /// * `device`: The [`PasswordlessDevice`] the code is issued for
    /// * `link_code_hash`: The hash of the magic link code
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn add_code(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        device: &PasswordlessDevice,
        link_code_hash: String,
    ) -> Result<PasswordlessCode, Self::Error>;

    /// List all the [`PasswordlessCode`] currently attached to a device
    ///
    /// # Parameters
    ///
    /// * `device_id_hash`: The hash of the device ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_codes_for_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<PasswordlessCode>, Self::Error>;

    /// List all the [`PasswordlessCode`] created strictly before the given
    /// timestamp, across all devices
    ///
    /// # Parameters
    ///
    /// * `before`: The exclusive upper bound on the creation time
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list_codes_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<PasswordlessCode>, Self::Error>;

    /// Delete a [`PasswordlessDevice`] and all of its codes
    ///
    /// # Parameters
    ///
    /// * `device_id_hash`: The hash of the device ID to delete
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// device does not exist
    async fn remove_device(&mut self, device_id_hash: &str) -> Result<(), Self::Error>;
}

#[async_trait]
impl<R> PasswordlessRepository for Box<R>
where
    R: PasswordlessRepository + ?Sized,
{
    type Error = R::Error;

    async fn lookup_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<PasswordlessDevice>, Self::Error> {
        (**self).lookup_device(device_id_hash).await
    }

    async fn add_device(
        &mut self,
        device_id_hash: String,
        contact: PasswordlessContact,
        link_code_salt: String,
    ) -> Result<PasswordlessDevice, Self::Error> {
        (**self)
            .add_device(device_id_hash, contact, link_code_salt)
            .await
    }

    async fn add_code(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        device: &PasswordlessDevice,
        link_code_hash: String,
    ) -> Result<PasswordlessCode, Self::Error> {
        (**self).add_code(rng, clock, device, link_code_hash).await
    }

    async fn list_codes_for_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        (**self).list_codes_for_device(device_id_hash).await
    }

    async fn list_codes_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        (**self).list_codes_before(before).await
    }

    async fn remove_device(&mut self, device_id_hash: &str) -> Result<(), Self::Error> {
        (**self).remove_device(device_id_hash).await
    }
}

#[async_trait]
impl<R, F, E> PasswordlessRepository for MapErr<R, F>
where
    R: PasswordlessRepository,
    F: FnMut(R::Error) -> E + Send + Sync,
{
    type Error = E;

    async fn lookup_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<PasswordlessDevice>, Self::Error> {
        self.inner
            .lookup_device(device_id_hash)
            .await
            .map_err(&mut self.mapper)
    }

    async fn add_device(
        &mut self,
        device_id_hash: String,
        contact: PasswordlessContact,
        link_code_salt: String,
    ) -> Result<PasswordlessDevice, Self::Error> {
        self.inner
            .add_device(device_id_hash, contact, link_code_salt)
            .await
            .map_err(&mut self.mapper)
    }

    async fn add_code(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        device: &PasswordlessDevice,
        link_code_hash: String,
    ) -> Result<PasswordlessCode, Self::Error> {
        self.inner
            .add_code(rng, clock, device, link_code_hash)
            .await
            .map_err(&mut self.mapper)
    }

    async fn list_codes_for_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        self.inner
            .list_codes_for_device(device_id_hash)
            .await
            .map_err(&mut self.mapper)
    }

    async fn list_codes_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        self.inner
            .list_codes_before(before)
            .await
            .map_err(&mut self.mapper)
    }

    async fn remove_device(&mut self, device_id_hash: &str) -> Result<(), Self::Error> {
        self.inner
            .remove_device(device_id_hash)
            .await
            .map_err(&mut self.mapper)
    }
}
