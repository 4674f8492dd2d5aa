//! mirrorkeep daemon - one-way mirroring of local folders to backup drives
//!
//! This binary runs in the user session and handles:
//! - Initial replication of every active include rule
//! - Live reflection of changes onto the targets
//! - Periodic re-attempts of operations blocked by locks or permissions
//! - Rule activation as backup drives are plugged and unplugged
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon loads and validates the rule set, runs the initial sync on
//! the blocking pool, then idles until a shutdown signal. Watchers and the
//! volume monitor run on their own threads; the retry queue is a tokio task.
//! Everything is stopped through a `CancellationToken`.

mod autostart;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mirrorkeep_core::config::{Config, Settings};
use mirrorkeep_core::domain::rule::{Configuration, IncludeRule};
use mirrorkeep_core::ports::autostart::AutostartRegistrar;
use mirrorkeep_core::ports::notifier::{Category, Notifier, Severity, TracingNotifier};
use mirrorkeep_core::ports::volume::VolumeMonitor;
use mirrorkeep_sync::drives::{DrivePresenceTracker, MountTableProbe, PollingVolumeMonitor};
use mirrorkeep_sync::retry::RetryQueue;
use mirrorkeep_sync::supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::autostart::XdgAutostart;

const APP_NAME: &str = "mirrorkeep";

// ============================================================================
// Daemon
// ============================================================================

/// Wires the replication components together for one process lifetime
struct Daemon {
    settings: Settings,
    notifier: Arc<dyn Notifier>,
    config: Arc<RwLock<Configuration>>,
    retry: Arc<RetryQueue>,
    supervisor: Arc<Supervisor>,
    tracker: Arc<DrivePresenceTracker>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Parses and validates the rule set, then builds every component
    ///
    /// Rules whose drive is absent start inactive.
    fn new(raw: &Config, shutdown: CancellationToken) -> Result<Self> {
        let settings = raw.settings.clone();
        let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);

        let mut configuration = Configuration::parse(raw, notifier.as_ref())
            .context("invalid configuration")?;
        configuration.validate(notifier.as_ref());
        debug!(configuration = %configuration.describe(), "Configuration loaded");
        let config = Arc::new(RwLock::new(configuration));

        let retry = Arc::new(RetryQueue::new(
            Duration::from_secs(settings.retry_interval_secs),
            Arc::clone(&notifier),
        ));
        let supervisor = Arc::new(Supervisor::new(Arc::clone(&retry), Arc::clone(&notifier)));

        let on_activated = {
            let supervisor = Arc::clone(&supervisor);
            Box::new(move |rules: &[IncludeRule]| {
                supervisor.activate(rules);
            })
        };
        let on_deactivated = {
            let supervisor = Arc::clone(&supervisor);
            Box::new(move |rules: &[IncludeRule]| {
                supervisor.deactivate(rules);
            })
        };
        let tracker = Arc::new(DrivePresenceTracker::new(
            Arc::clone(&config),
            Arc::new(MountTableProbe),
            Arc::clone(&notifier),
            on_activated,
            on_deactivated,
        ));
        tracker.refresh();

        Ok(Self {
            settings,
            notifier,
            config,
            retry,
            supervisor,
            tracker,
            shutdown,
        })
    }

    /// Runs until the shutdown token is cancelled
    async fn run(&self) -> Result<()> {
        let retry_task = tokio::spawn(Arc::clone(&self.retry).run(self.shutdown.clone()));

        let snapshot = self
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        let supervisor = Arc::clone(&self.supervisor);
        let watched = tokio::task::spawn_blocking(move || supervisor.start_initial(&snapshot))
            .await
            .context("initial sync task failed")?;

        let mut monitor = PollingVolumeMonitor::new(
            Duration::from_secs(self.settings.volume_poll_interval_secs),
            self.tracker.drive_roots(),
        );
        let tracker = Arc::clone(&self.tracker);
        monitor.start(Arc::new(move || {
            tracker.devices_changed();
        }))?;

        // Catch drives that came or went while the initial sync ran
        let tracker = Arc::clone(&self.tracker);
        let changes = tokio::task::spawn_blocking(move || tracker.devices_changed())
            .await
            .context("drive reconciliation task failed")?;
        if !changes.is_empty() {
            info!(
                activated = changes.activated.len(),
                deactivated = changes.deactivated.len(),
                "Drive set changed during initial sync"
            );
        }

        self.notifier.notify(
            &format!("{APP_NAME} is monitoring {watched} source path(s)"),
            Category::Lifecycle,
            Severity::Info,
        );

        self.shutdown.cancelled().await;
        info!("Shutting down");

        // Joins may block on an in-progress activation
        let supervisor = Arc::clone(&self.supervisor);
        tokio::task::spawn_blocking(move || {
            monitor.stop();
            supervisor.shutdown();
        })
        .await
        .context("shutdown task failed")?;

        if let Err(err) = retry_task.await {
            warn!(error = %err, "Retry queue task ended abnormally");
        }

        self.notifier.notify(
            &format!("{APP_NAME} monitoring is interrupted"),
            Category::Lifecycle,
            Severity::Info,
        );
        Ok(())
    }
}

// ============================================================================
// Startup helpers
// ============================================================================

/// Initialises tracing; `RUST_LOG` wins over the configured level
fn init_tracing(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}

/// Registers the running executable to start at login; failures are only logged
fn register_autostart(registrar: &dyn AutostartRegistrar, executable: &Path) {
    match registrar.ensure_registered(executable, APP_NAME) {
        Ok(true) => info!(path = %executable.display(), "Registered for start at login"),
        Ok(false) => debug!("Start at login already registered"),
        Err(err) => warn!(error = %err, "Unable to register for start at login"),
    }
}

fn check_settings(settings: &Settings) -> Result<()> {
    let errors = settings.validate();
    if errors.is_empty() {
        return Ok(());
    }
    for err in &errors {
        error!(field = %err.field, "{}", err.message);
    }
    bail!("{} invalid setting(s)", errors.len())
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let loaded = Config::load(&config_path);

    let level = loaded
        .as_ref()
        .map(|config| config.settings.log_level.clone())
        .unwrap_or_else(|_| Settings::default().log_level);
    init_tracing(&level);

    let executable = std::env::current_exe().unwrap_or_else(|_| PathBuf::from(APP_NAME));
    info!(path = %executable.display(), "{APP_NAME} started");

    let raw = match loaded {
        Ok(raw) => raw,
        Err(err) => {
            error!(path = %config_path.display(), error = %err, "Unable to load configuration");
            return Err(err.into());
        }
    };
    check_settings(&raw.settings)?;

    if raw.settings.autostart {
        register_autostart(&XdgAutostart::new(), &executable);
    }

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let daemon = match Daemon::new(&raw, shutdown_token.clone()) {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(error = %format!("{err:#}"), "Startup halted");
            return Err(err);
        }
    };

    let result = daemon.run().await;

    match &result {
        Ok(()) => info!("{APP_NAME} shut down gracefully"),
        Err(e) => error!(error = %e, "{APP_NAME} exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
