// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pwl_data_model::{Clock, PasswordlessCode, PasswordlessContact, PasswordlessDevice};
use pwl_storage::passwordless::PasswordlessRepository;
use rand::RngCore;
use ulid::Ulid;

use crate::{MemoryError, MemoryState};

/// An implementation of [`PasswordlessRepository`] over the working copy of
/// a [`MemoryState`]
pub struct MemoryPasswordlessRepository<'c> {
    state: &'c mut MemoryState,
}

impl<'c> MemoryPasswordlessRepository<'c> {
    /// Create a new [`MemoryPasswordlessRepository`] over a state
    pub fn new(state: &'c mut MemoryState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl PasswordlessRepository for MemoryPasswordlessRepository<'_> {
    type Error = MemoryError;

    async fn lookup_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Option<PasswordlessDevice>, Self::Error> {
        Ok(self.state.devices.get(device_id_hash).cloned())
    }

    async fn add_device(
        &mut self,
        device_id_hash: String,
        contact: PasswordlessContact,
        link_code_salt: String,
    ) -> Result<PasswordlessDevice, Self::Error> {
        if self.state.devices.contains_key(&device_id_hash) {
            return Err(MemoryError::DuplicateDevice { device_id_hash });
        }

        let device = PasswordlessDevice {
            id_hash: device_id_hash.clone(),
            contact,
            link_code_salt,
            failed_attempts: 0,
        };
        self.state.devices.insert(device_id_hash, device.clone());

        Ok(device)
    }

    async fn add_code(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        device: &PasswordlessDevice,
        link_code_hash: String,
    ) -> Result<PasswordlessCode, Self::Error> {
        if !self.state.devices.contains_key(&device.id_hash) {
            return Err(MemoryError::DeviceNotFound {
                device_id_hash: device.id_hash.clone(),
            });
        }

        if self
            .state
            .codes
            .values()
            .any(|code| code.link_code_hash == link_code_hash)
        {
            return Err(MemoryError::DuplicateLinkCode);
        }

        let created_at = clock.now();
        let id = Ulid::from_datetime_with_source(created_at.into(), rng);
        let code = PasswordlessCode {
            id,
            device_id_hash: device.id_hash.clone(),
            link_code_hash,
            created_at,
        };
        self.state.codes.insert(id, code.clone());

        Ok(code)
    }

    async fn list_codes_for_device(
        &mut self,
        device_id_hash: &str,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        let mut codes: Vec<_> = self
            .state
            .codes
            .values()
            .filter(|code| code.device_id_hash == device_id_hash)
            .cloned()
            .collect();
        codes.sort_by_key(|code| code.created_at);

        Ok(codes)
    }

    async fn list_codes_before(
        &mut self,
        before: DateTime<Utc>,
    ) -> Result<Vec<PasswordlessCode>, Self::Error> {
        Ok(self
            .state
            .codes
            .values()
            .filter(|code| code.created_at < before)
            .cloned()
            .collect())
    }

    async fn remove_device(&mut self, device_id_hash: &str) -> Result<(), Self::Error> {
        if self.state.devices.remove(device_id_hash).is_none() {
            return Err(MemoryError::DeviceNotFound {
                device_id_hash: device_id_hash.to_owned(),
            });
        }

        // Cascade to the codes of the device
        self.state
            .codes
            .retain(|_, code| code.device_id_hash != device_id_hash);

        Ok(())
    }
}
