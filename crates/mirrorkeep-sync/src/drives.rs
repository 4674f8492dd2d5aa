//! Drive presence tracking
//!
//! A rule is eligible for replication only while the volume holding its
//! target path is present. [`DrivePresenceTracker`] recomputes every rule's
//! `is_active` flag whenever the set of volumes may have changed and hands
//! the rules that flipped to the controlling process.
//!
//! [`PollingVolumeMonitor`] is the default source of "volumes changed"
//! notifications: a dedicated thread that samples the mount table and the
//! configured drive roots, firing when the sample differs from the last one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context};
use mirrorkeep_core::domain::rule::{ActivationChanges, Configuration, IncludeRule};
use mirrorkeep_core::ports::notifier::Notifier;
use mirrorkeep_core::ports::volume::{VolumeMonitor, VolumesChanged};
use tracing::{debug, info, warn};

// ============================================================================
// DriveProbe
// ============================================================================

/// Answers whether a drive root is currently present
pub trait DriveProbe: Send + Sync {
    fn is_present(&self, root: &Path) -> bool;
}

/// Checks drive roots against the filesystem and the kernel mount table
///
/// Every root must exist. Roots under `/media` or `/run/media` must also be
/// listed as mount points, since the desktop leaves an empty directory
/// behind there after a drive is unplugged. When the mount table cannot be
/// read, existence alone decides.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountTableProbe;

impl DriveProbe for MountTableProbe {
    fn is_present(&self, root: &Path) -> bool {
        if !root.exists() {
            return false;
        }
        if !requires_mount_entry(root) {
            return true;
        }
        match read_mount_points() {
            Some(mounts) => mounts.iter().any(|m| m == root),
            None => true,
        }
    }
}

/// Whether a root lives where removable media is auto-mounted
pub fn requires_mount_entry(root: &Path) -> bool {
    root.parent().is_some()
        && (root.starts_with("/media") || root.starts_with("/run/media"))
}

/// Mount points listed in `/proc/self/mounts`
#[cfg(target_os = "linux")]
pub fn read_mount_points() -> Option<Vec<PathBuf>> {
    let table = std::fs::read_to_string("/proc/self/mounts").ok()?;
    Some(parse_mount_table(&table))
}

#[cfg(not(target_os = "linux"))]
pub fn read_mount_points() -> Option<Vec<PathBuf>> {
    None
}

/// Extracts the mount point column from a `mounts(5)` formatted table
pub fn parse_mount_table(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .collect()
}

/// Decodes the octal escapes (`\040` for space) used in the mount table
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or_default();
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ============================================================================
// DrivePresenceTracker
// ============================================================================

/// Receives the rules whose activity flipped
pub type RulesChanged = Box<dyn Fn(&[IncludeRule]) + Send + Sync>;

/// Keeps rule activation in step with drive presence
pub struct DrivePresenceTracker {
    config: Arc<RwLock<Configuration>>,
    probe: Arc<dyn DriveProbe>,
    notifier: Arc<dyn Notifier>,
    on_activated: RulesChanged,
    on_deactivated: RulesChanged,
}

impl DrivePresenceTracker {
    pub fn new(
        config: Arc<RwLock<Configuration>>,
        probe: Arc<dyn DriveProbe>,
        notifier: Arc<dyn Notifier>,
        on_activated: RulesChanged,
        on_deactivated: RulesChanged,
    ) -> Self {
        Self {
            config,
            probe,
            notifier,
            on_activated,
            on_deactivated,
        }
    }

    /// Recomputes activation without delivering the flips
    ///
    /// Used once at startup, before anything is synced or watched.
    pub fn refresh(&self) -> ActivationChanges {
        let mut config = self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        config.refresh_activation(|root| self.probe.is_present(root), self.notifier.as_ref())
    }

    /// Handles a "volumes changed" notification
    ///
    /// Newly activated rules are delivered first, then newly deactivated
    /// ones. The configuration lock is released before either callback runs.
    pub fn devices_changed(&self) -> ActivationChanges {
        let changes = self.refresh();
        debug!(
            activated = changes.activated.len(),
            deactivated = changes.deactivated.len(),
            "Drive presence recomputed"
        );
        if !changes.activated.is_empty() {
            (self.on_activated)(&changes.activated);
        }
        if !changes.deactivated.is_empty() {
            (self.on_deactivated)(&changes.deactivated);
        }
        changes
    }

    /// Distinct drive roots of every configured rule
    pub fn drive_roots(&self) -> Vec<PathBuf> {
        let config = self
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut seen = HashSet::new();
        config
            .includes
            .iter()
            .map(IncludeRule::drive_root)
            .filter(|root| seen.insert(root.clone()))
            .collect()
    }
}

// ============================================================================
// PollingVolumeMonitor
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct VolumeSample {
    mounts: Option<Vec<PathBuf>>,
    roots_present: Vec<bool>,
}

impl VolumeSample {
    fn take(roots: &[PathBuf]) -> Self {
        Self {
            mounts: read_mount_points(),
            roots_present: roots.iter().map(|root| root.exists()).collect(),
        }
    }
}

/// Samples volumes on a dedicated thread and reports differences
pub struct PollingVolumeMonitor {
    period: Duration,
    roots: Vec<PathBuf>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PollingVolumeMonitor {
    pub fn new(period: Duration, roots: Vec<PathBuf>) -> Self {
        Self {
            period,
            roots,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl VolumeMonitor for PollingVolumeMonitor {
    fn start(&mut self, on_change: VolumesChanged) -> anyhow::Result<()> {
        if self.handle.is_some() {
            bail!("volume monitor is already running");
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let period = self.period;
        let roots = self.roots.clone();
        // Sampled before returning so changes right after start() are seen
        let mut last = VolumeSample::take(&roots);

        let handle = std::thread::Builder::new()
            .name("volume-monitor".into())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    let current = VolumeSample::take(&roots);
                    if current != last {
                        debug!("Volume set changed");
                        last = current;
                        on_change();
                    }
                }
            })
            .context("failed to spawn volume monitor thread")?;

        info!(period_ms = period.as_millis() as u64, "Volume monitor started");
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The thread may have exited already
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Volume monitor thread panicked");
            }
            info!("Volume monitor stopped");
        }
    }
}

impl Drop for PollingVolumeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Unit tests
// ============================================================================
