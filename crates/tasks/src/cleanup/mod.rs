// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Storage cleanup tasks
//!
//! - [`passwordless`]: deletion of passwordless login devices whose codes all
//!   expired

mod passwordless;

pub use self::passwordless::{
    DeleteExpiredPasswordlessDevices, DeviceOutcome, SkipReason, SweepReport,
};
