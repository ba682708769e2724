// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{ConfigurationSection, util::error_on_field};

/// How the periodic tasks are scheduled
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Tasks wait a full interval before their first run, and always use
    /// their built-in interval
    #[default]
    Production,

    /// Tasks run as soon as the worker starts, and their interval can be
    /// overridden
    Test,
}

/// Configuration of the periodic tasks run by the worker
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct TasksConfig {
    /// The scheduling mode
    #[serde(default)]
    pub mode: TaskMode,

    /// Interval overrides in seconds, keyed by task name
    ///
    /// Only allowed in `test` mode.
    #[schemars(with = "BTreeMap<String, u64>")]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[serde_as(as = "BTreeMap<_, serde_with::DurationSeconds<u64>>")]
    pub intervals: BTreeMap<String, Duration>,
}

impl TasksConfig {
    pub(crate) fn is_default(&self) -> bool {
        self == &Self::default()
    }

    /// The interval override configured for the given task, if any
    ///
    /// Overrides are only honoured in [`TaskMode::Test`].
    #[must_use]
    pub fn interval_override(&self, task: &str) -> Option<Duration> {
        match self.mode {
            TaskMode::Test => self.intervals.get(task).copied(),
            TaskMode::Production => None,
        }
    }
}

impl ConfigurationSection for TasksConfig {
    const PATH: Option<&'static str> = Some("tasks");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.mode == TaskMode::Production && !self.intervals.is_empty() {
            return Err(error_on_field(
                figment,
                figment::Error::from("interval overrides are only allowed in test mode"),
                "tasks",
                "intervals",
            )
            .into());
        }

        if let Some(task) = self.intervals.iter().find_map(|(task, interval)| {
            interval.is_zero().then_some(task)
        }) {
            return Err(error_on_field(
                figment,
                figment::Error::from(format!("interval of task {task:?} must not be zero")),
                "tasks",
                "intervals",
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_test_mode() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    tasks:
                      mode: test
                      intervals:
                        delete-expired-passwordless-devices: 5
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = TasksConfig::extract(&figment).map_err(|e| e.to_string())?;

            assert_eq!(config.mode, TaskMode::Test);
            assert_eq!(
                config.interval_override("delete-expired-passwordless-devices"),
                Some(Duration::from_secs(5))
            );
            assert_eq!(config.interval_override("something-else"), None);

            Ok(())
        });
    }

    #[test]
    fn reject_overrides_in_production() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    tasks:
                      intervals:
                        delete-expired-passwordless-devices: 5
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let error = TasksConfig::extract(&figment).unwrap_err();
            assert!(error.to_string().contains("only allowed in test mode"));

            Ok(())
        });
    }

    #[test]
    fn reject_zero_interval() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    tasks:
                      mode: test
                      intervals:
                        delete-expired-passwordless-devices: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(TasksConfig::extract(&figment).is_err());

            Ok(())
        });
    }
}
