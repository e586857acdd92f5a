use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

/// Noise filter and validity gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    /// Measurement noise (R) of the per-axis filter.
    pub measurement_noise: f64,
    /// Process noise (Q) of the per-axis filter.
    pub process_noise: f64,
    /// Samples reporting a worse accuracy than this are rejected.
    pub max_accuracy_m: f64,
    /// Minimum raw movement from the last accepted sample.
    pub min_movement_m: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            measurement_noise: 0.1,
            process_noise: 0.1,
            max_accuracy_m: 30.0,
            min_movement_m: 0.5,
        }
    }
}

/// Automatic point capture thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub min_interval_secs: u64,
    pub min_speed_mps: f64,
    /// Average pairwise distance of the recent history above which the fix is too jittery.
    pub max_jitter_m: f64,
    pub min_distance_m: f64,
    pub max_bearing_change_deg: f64,
    /// Number of history entries used for the jitter and bearing checks.
    pub history_window: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_secs: 5,
            min_speed_mps: 0.5,
            max_jitter_m: 5.0,
            min_distance_m: 10.0,
            max_bearing_change_deg: 45.0,
            history_window: 3,
        }
    }
}

/// Longest lease a config file may ask for.
pub const MAX_LEASE_SECS: u64 = 24 * 60 * 60;

const DEFAULT_LEASE_SECS: u64 = 300;

/// Edit lease timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LockConfig {
    pub lease_secs: u64,
    pub heartbeat_secs: u64,
}

impl LockConfig {
    /// Zero or anything above [`MAX_LEASE_SECS`] falls back to the default.
    pub fn lease(&self) -> chrono::Duration {
        let secs = if (1..=MAX_LEASE_SECS).contains(&self.lease_secs) {
            self.lease_secs
        } else {
            warn!(
                "lease_secs {} out of range, using {DEFAULT_LEASE_SECS}",
                self.lease_secs
            );
            DEFAULT_LEASE_SECS
        };
        chrono::Duration::seconds(secs as i64)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: DEFAULT_LEASE_SECS,
            heartbeat_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Subscribe to remote change notifications for the open project.
    pub realtime: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { realtime: true }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoreConfig {
    pub signal: SignalConfig,
    pub capture: CaptureConfig,
    pub lock: LockConfig,
    pub sync: SyncConfig,
}

/// JSON-file backed configuration with in-memory cache.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<CoreConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unparsable config {}: {err}", path.display());
                CoreConfig::default()
            })
        } else {
            CoreConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> CoreConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, config: CoreConfig) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&config)?;
        *guard = config;
        Ok(())
    }

    fn persist(&self, data: &CoreConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}
