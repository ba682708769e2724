// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

fn main() {
    // Recompile when a migration is added, as they are embedded in the crate
    println!("cargo:rerun-if-changed=migrations");
}
