// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::Duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{ConfigurationSection, util::error_on_field};

/// Longest accepted code lifetime
fn max_code_lifetime() -> Duration {
    Duration::days(365)
}

fn default_code_lifetime() -> Duration {
    Duration::minutes(15)
}

fn is_default_code_lifetime(value: &Duration) -> bool {
    *value == default_code_lifetime()
}

/// Configuration related to passwordless logins
#[serde_as]
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize, PartialEq, Eq)]
pub struct PasswordlessConfig {
    /// How long a passwordless code stays valid after it was issued, in
    /// milliseconds. Defaults to 15 minutes, at most one year.
    ///
    /// Devices whose codes are all older than this are deleted by the
    /// `delete-expired-passwordless-devices` task.
    #[schemars(with = "u64", range(min = 1, max = 31_536_000_000_u64))]
    #[serde(
        default = "default_code_lifetime",
        skip_serializing_if = "is_default_code_lifetime"
    )]
    #[serde_as(as = "serde_with::DurationMilliSeconds<i64>")]
    pub code_lifetime: Duration,
}

impl Default for PasswordlessConfig {
    fn default() -> Self {
        Self {
            code_lifetime: default_code_lifetime(),
        }
    }
}

impl PasswordlessConfig {
    pub(crate) fn is_default(&self) -> bool {
        is_default_code_lifetime(&self.code_lifetime)
    }
}

impl ConfigurationSection for PasswordlessConfig {
    const PATH: Option<&'static str> = Some("passwordless");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.code_lifetime <= Duration::zero() {
            return Err(error_on_field(
                figment,
                figment::Error::from("code_lifetime must be greater than zero"),
                "passwordless",
                "code_lifetime",
            )
            .into());
        }

        if self.code_lifetime > max_code_lifetime() {
            return Err(error_on_field(
                figment,
                figment::Error::from("code_lifetime must not exceed one year"),
                "passwordless",
                "code_lifetime",
            )
            .into());
        }

        Ok(())
    }
}
