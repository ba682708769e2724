// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use thiserror::Error;

/// Errors returned by the in-memory backend, mirroring the constraints the
/// PostgreSQL schema enforces
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// The operation referenced a device which doesn't exist
    #[error("passwordless device {device_id_hash:?} not found")]
    DeviceNotFound {
        /// The hash of the device ID which was looked up
        device_id_hash: String,
    },

    /// A device with the same hash already exists
    #[error("passwordless device {device_id_hash:?} already exists")]
    DuplicateDevice {
        /// The hash of the device ID which was inserted
        device_id_hash: String,
    },

    /// A code with the same link code hash already exists
    #[error("a passwordless code with this link code hash already exists")]
    DuplicateLinkCode,
}
