// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use clap::Parser;
use figment::Figment;
use pwl_config::{ConfigurationSection, WorkerConfig};
use pwl_storage::SystemClock;
use pwl_storage_memory::MemoryRepositoryFactory;
use pwl_storage_pg::PgRepositoryFactory;
use tracing::{info, info_span, warn};

use crate::{
    shutdown::ShutdownManager,
    util::{database_pool_from_config, task_mode_from_config},
};

#[derive(Parser, Debug, Default)]
pub(super) struct Options {
    /// Keep everything in memory instead of using the database.
    ///
    /// Nothing is persisted, this is only useful for local development.
    #[arg(long)]
    in_memory: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let shutdown = ShutdownManager::new()?;
        let span = info_span!("cli.worker.init").entered();
        let config = WorkerConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        let mode = task_mode_from_config(config.tasks.mode);
        let clock = SystemClock::default();

        let scheduler = if self.in_memory {
            warn!("Using the in-memory storage backend, nothing will be persisted");
            pwl_tasks::init(
                MemoryRepositoryFactory::new(),
                clock,
                config.passwordless.code_lifetime,
                mode,
                |task| config.tasks.interval_override(task),
                shutdown.soft_shutdown_token(),
            )
        } else {
            // Connect to the database
            info!("Connecting to the database");
            let pool = database_pool_from_config(&config.database).await?;

            pwl_tasks::init(
                PgRepositoryFactory::new(pool),
                clock,
                config.passwordless.code_lifetime,
                mode,
                |task| config.tasks.interval_override(task),
                shutdown.soft_shutdown_token(),
            )
        };

        info!(
            tasks = ?scheduler.task_names().collect::<Vec<_>>(),
            ?mode,
            "Starting task scheduler"
        );
        scheduler.run(shutdown.task_tracker());
        span.exit();

        shutdown.run().await;

        Ok(ExitCode::SUCCESS)
    }
}
