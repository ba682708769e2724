// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod config;
mod database;
mod worker;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Manage the database
    Database(self::database::Options),

    /// Run the periodic maintenance tasks
    Worker(self::worker::Options),
}

#[derive(Parser, Debug)]
#[command(version = crate::VERSION)]
pub struct Options {
    /// Path to the configuration file. Can be repeated, later files override
    /// earlier ones.
    ///
    /// Must be given before the subcommand.
    #[arg(
        short,
        long,
        action = clap::ArgAction::Append,
        default_value = "config.yaml",
    )]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            S::Config(c) => Box::pin(c.run(figment)).await,
            S::Database(c) => Box::pin(c.run(figment)).await,
            S::Worker(c) => Box::pin(c.run(figment)).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration files and the
    /// environment variables loaded
    pub fn figment(&self) -> Figment {
        self.config
            .iter()
            .fold(Figment::new(), |f, path| f.admerge(Yaml::file(path)))
            .merge(Env::prefixed("PWL_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use pwl_config::{AppConfig, ConfigurationSection, TaskMode};

    use super::*;

    #[test]
    fn parse_options() {
        let opts = Options::try_parse_from(["pwl", "worker"]).unwrap();
        assert_eq!(opts.config, vec![Utf8PathBuf::from("config.yaml")]);

        let opts = Options::try_parse_from([
            "pwl",
            "-c",
            "base.yaml",
            "--config",
            "override.yaml",
            "database",
            "migrate",
        ])
        .unwrap();
        assert_eq!(
            opts.config,
            vec![
                Utf8PathBuf::from("base.yaml"),
                Utf8PathBuf::from("override.yaml")
            ]
        );
    }

    #[test]
    fn config_after_subcommand_is_rejected() {
        // Only the top-level command takes configuration files
        let res = Options::try_parse_from([
            "pwl",
            "-c",
            "base.yaml",
            "database",
            "migrate",
            "--config",
            "override.yaml",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn environment_overrides_files() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    passwordless:
                      code_lifetime: 60000
                ",
            )?;
            jail.set_env("PWL_PASSWORDLESS__CODE_LIFETIME", "120000");
            jail.set_env("PWL_TASKS__MODE", "test");

            let opts = Options::try_parse_from(["pwl", "config", "check"])
                .map_err(|e| e.to_string())?;
            let config = AppConfig::extract(&opts.figment()).map_err(|e| e.to_string())?;

            assert_eq!(config.passwordless.code_lifetime.num_minutes(), 2);
            assert_eq!(config.tasks.mode, TaskMode::Test);

            Ok(())
        });
    }
}
