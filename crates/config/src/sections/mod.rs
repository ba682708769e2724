// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod database;
mod passwordless;
mod tasks;

pub use self::{
    database::{DatabaseConfig, PgSslMode},
    passwordless::PasswordlessConfig,
    tasks::{TaskMode, TasksConfig},
};
use crate::util::ConfigurationSection;

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct AppConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Configuration related to passwordless logins
    #[serde(default, skip_serializing_if = "PasswordlessConfig::is_default")]
    pub passwordless: PasswordlessConfig,

    /// Configuration of the periodic tasks
    #[serde(default, skip_serializing_if = "TasksConfig::is_default")]
    pub tasks: TasksConfig,
}

impl ConfigurationSection for AppConfig {
    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        self.database.validate(figment)?;
        self.passwordless.validate(figment)?;
        self.tasks.validate(figment)?;

        Ok(())
    }
}

/// Partial configuration actually used by the worker
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    #[allow(missing_docs)]
    #[serde(default)]
    pub database: DatabaseConfig,

    #[allow(missing_docs)]
    #[serde(default)]
    pub passwordless: PasswordlessConfig,

    #[allow(missing_docs)]
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl ConfigurationSection for WorkerConfig {
    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        self.database.validate(figment)?;
        self.passwordless.validate(figment)?;
        self.tasks.validate(figment)?;

        Ok(())
    }
}
