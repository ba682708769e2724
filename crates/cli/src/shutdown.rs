// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{future::Future, time::Duration};

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Waits for SIGTERM and SIGINT, and drives the shutdown of the tasks.
///
/// The first signal triggers a soft shutdown: periodic tasks stop waiting for
/// their next run, but a run in progress is allowed to finish. On the second
/// signal, or once the timeout is reached, the manager stops waiting and
/// returns, leaving the remaining tasks to be dropped with the runtime.
///
/// Everything that needs to finish before the process exits must be spawned
/// on the [`TaskTracker`].
pub struct ShutdownManager {
    soft_shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
    timeout: Duration,
}

/// How the wait for the tracked tasks ended
#[derive(Debug, PartialEq, Eq)]
enum DrainOutcome {
    /// Every task finished
    Graceful,

    /// The timeout elapsed first
    TimedOut,

    /// Another signal arrived first
    Aborted(&'static str),
}

/// Wait for either SIGTERM or SIGINT, returning the name of the signal
async fn next_signal(sigterm: &mut Signal, sigint: &mut Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

/// Wait for a closed tracker to become empty, giving up after `timeout` or
/// when `abort` resolves
async fn drain(
    tracker: &TaskTracker,
    timeout: Duration,
    abort: impl Future<Output = &'static str>,
) -> DrainOutcome {
    tokio::select! {
        () = tracker.wait() => DrainOutcome::Graceful,
        () = tokio::time::sleep(timeout) => DrainOutcome::TimedOut,
        signal = abort => DrainOutcome::Aborted(signal),
    }
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler could not be installed
    pub fn new() -> Result<Self, std::io::Error> {
        let sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
        let sigint = tokio::signal::unix::signal(SignalKind::interrupt())?;

        Ok(Self {
            soft_shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            sigterm,
            sigint,
            timeout: Duration::from_secs(60),
        })
    }

    /// Get a reference to the task tracker
    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Get a cancellation token that can be used to react to a soft shutdown
    #[must_use]
    pub fn soft_shutdown_token(&self) -> CancellationToken {
        self.soft_shutdown_token.clone()
    }

    /// Run until the tasks are done, or until we give up waiting for them.
    pub async fn run(mut self) {
        let signal = next_signal(&mut self.sigterm, &mut self.sigint).await;
        tracing::info!(signal, "Shutdown signal received, shutting down");

        self.soft_shutdown_token.cancel();
        self.task_tracker.close();

        let outcome = drain(
            &self.task_tracker,
            self.timeout,
            next_signal(&mut self.sigterm, &mut self.sigint),
        )
        .await;

        match outcome {
            DrainOutcome::Graceful => tracing::info!("All tasks are done, exiting"),
            DrainOutcome::TimedOut => {
                tracing::warn!(
                    remaining = self.task_tracker.len(),
                    "Shutdown timeout reached, exiting without waiting for the remaining tasks"
                );
            }
            DrainOutcome::Aborted(signal) => {
                tracing::warn!(
                    signal,
                    remaining = self.task_tracker.len(),
                    "Second shutdown signal received, exiting without waiting for the remaining tasks"
                );
            }
        }
    }
}
