//! Persistence (spec.md §6 "Persistence"): a single JSON file holding the
//! day's price/device snapshot and doubling as the energy-debt store.
//! Debt updates patch only the debt-related fields of the existing file
//! rather than overwriting unrelated keys (spec.md §4.5); the whole-file
//! write is atomic via write-then-rename (spec.md §6 recommendation).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::price::{NetworkPackage, PriceSlot};

/// SPEC_FULL.md §F: one opportunistic debt recovery, kept for the dashboard
/// and for post-hoc auditing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub device: String,
    pub slot_index: u8,
    pub price: f64,
    pub minutes_recovered: f64,
    pub timestamp: DateTime<Utc>,
}

/// Eviction policy for the ring buffer: oldest entry dropped once the
/// buffer exceeds this many entries (SPEC_FULL.md §F).
pub const MAX_RECENT_RECOVERIES: usize = 20;

/// Per-device slice of the persisted snapshot (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDevice {
    pub name: String,
    pub slots: Vec<bool>,
    pub energy_debt: f64,
    pub weather: Option<f64>,
    pub package: Option<NetworkPackage>,
    #[serde(default)]
    pub recent_recoveries: Vec<RecoveryEntry>,
    /// SPEC_FULL.md §F: short human status text, purely presentational.
    #[serde(default)]
    pub status_text: Option<String>,
}

/// The whole-file persisted shape (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub calculated_at: DateTime<Utc>,
    pub prices: Vec<PriceSlot>,
    pub devices: Vec<PersistedDevice>,
}

/// Owns the single JSON file at `path`. Cheap to clone (just a `PathBuf`);
/// every read re-parses the file since writes only ever happen once a day
/// or once a minute (debt tick), never on the PBC's 10 s path.
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn load(&self) -> Option<PersistedSnapshot> {
        let bytes = tokio::fs::read(&self.path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "persisted snapshot failed to parse");
                None
            }
        }
    }

    /// Replaces the whole file with a freshly computed daily snapshot
    /// (spec.md §4.4's materialization run). Atomic: write to a sibling
    /// `.tmp` path, then rename over the target.
    pub async fn save_snapshot(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        self.atomic_write(snapshot).await
    }

    /// spec.md §4.5 "patching only the debt fields of the existing persisted
    /// JSON". Loads the current file (if any), mutates just the named
    /// device's `energy_debt`, and writes the whole structure back — the
    /// rest of the file, including other devices' schedules, is untouched.
    pub async fn patch_debt(&self, device_name: &str, energy_debt: f64) -> Result<()> {
        let Some(mut snapshot) = self.load().await else {
            warn!(device_name, "patch_debt called with no existing snapshot, skipping");
            return Ok(());
        };
        if let Some(device) = snapshot.devices.iter_mut().find(|d| d.name == device_name) {
            device.energy_debt = energy_debt;
        }
        self.atomic_write(&snapshot).await
    }

    /// SPEC_FULL.md §F: appends a recovery, evicting the oldest once the
    /// buffer exceeds `MAX_RECENT_RECOVERIES`.
    pub async fn push_recovery(&self, device_name: &str, entry: RecoveryEntry) -> Result<()> {
        let Some(mut snapshot) = self.load().await else {
            warn!(device_name, "push_recovery called with no existing snapshot, skipping");
            return Ok(());
        };
        if let Some(device) = snapshot.devices.iter_mut().find(|d| d.name == device_name) {
            device.recent_recoveries.push(entry);
            if device.recent_recoveries.len() > MAX_RECENT_RECOVERIES {
                let excess = device.recent_recoveries.len() - MAX_RECENT_RECOVERIES;
                device.recent_recoveries.drain(0..excess);
            }
        }
        self.atomic_write(&snapshot).await
    }

    async fn atomic_write(&self, snapshot: &PersistedSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot).context("failed to serialize persisted snapshot")?;
        let tmp_path = tmp_path_for(&self.path);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.context("failed to create persistence directory")?;
        }
        tokio::fs::write(&tmp_path, &json).await.context("failed to write persistence tmp file")?;
        tokio::fs::rename(&tmp_path, &self.path).await.context("failed to rename persistence tmp file into place")?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
