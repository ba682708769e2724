// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub(crate) mod passwordless;

pub use ulid::Ulid;

pub use self::{
    clock::{Clock, MockClock, SystemClock},
    passwordless::{
        InvalidContactError, PasswordlessCode, PasswordlessContact, PasswordlessDevice,
        is_device_expired,
    },
};
