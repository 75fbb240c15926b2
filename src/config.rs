//! Configuration types for the questline engine.
//!
//! Loaded from TOML. Every section has defaults so a partial file (or no
//! file at all) yields a working single-category daily setup.

use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::clock::{PeriodPolicy, PolicyKind, parse_duration, parse_time_of_day, resolve_zone};
use crate::error::{Result, TaskError};
use crate::policy::CategoryPolicy;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Zone used for cycle boundaries: `"system"`, `"utc"` or `"+08:00"`.
    pub timezone: String,
    /// Backing store settings.
    pub database: DatabaseConfig,
    /// Persistence queue settings.
    pub queue: QueueConfig,
    /// Periodic maintenance settings.
    pub schedule: MaintenanceConfig,
    /// Log output settings (used by the `questd` binary).
    pub logging: LoggingConfig,
    /// Task categories, in display order.
    pub categories: Vec<CategoryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "system".to_owned(),
            database: DatabaseConfig::default(),
            queue: QueueConfig::default(),
            schedule: MaintenanceConfig::default(),
            logging: LoggingConfig::default(),
            categories: vec![CategoryConfig::default()],
        }
    }
}

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. Defaults to `<data dir>/questline/questline.db`.
    pub path: Option<PathBuf>,
    /// SQLite busy timeout, shared with other processes on the same file.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Persistence queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending jobs.
    pub capacity: usize,
    /// How long a submission waits for room before the job is dropped.
    pub submit_timeout_ms: u64,
    /// Jobs slower than this are logged.
    pub slow_query_ms: u64,
    /// How long shutdown waits for the backlog to drain.
    pub shutdown_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1_024,
            submit_timeout_ms: 5_000,
            slow_query_ms: 1_000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Background maintenance cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Minutes between online-player expiry sweeps. `0` disables the sweep.
    pub sweep_interval_minutes: u64,
    /// Seconds between catalog delta syncs. `0` disables syncing.
    pub template_sync_secs: u64,
    /// Days to keep stale task rows. `0` disables cleanup.
    pub retention_days: u32,
    /// Hours between retention cleanups.
    pub cleanup_interval_hours: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_minutes: 5,
            template_sync_secs: 0,
            retention_days: 7,
            cleanup_interval_hours: 6,
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily rolling log files. Stderr only when unset.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            directory: None,
        }
    }
}

/// One task category as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    /// Stable identifier stored alongside every task row.
    pub id: String,
    pub enabled: bool,
    /// Name shown in refresh notifications. Falls back to `id`.
    pub display_name: Option<String>,
    /// Concurrency cap: how many active tasks a player holds at once.
    pub max_concurrent: usize,
    /// Generate replacements automatically during refresh.
    pub auto_assign: bool,
    /// Grant rewards on completion instead of waiting for a claim.
    pub auto_claim: bool,
    /// When assigned tasks expire.
    pub expire: PeriodConfig,
    /// Reroll rules, with their own reset cycle.
    pub reroll: RerollConfig,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            id: "daily".to_owned(),
            enabled: true,
            display_name: None,
            max_concurrent: 3,
            auto_assign: true,
            auto_claim: false,
            expire: PeriodConfig::default(),
            reroll: RerollConfig::default(),
        }
    }
}

/// Reroll rules for a category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerollConfig {
    pub enabled: bool,
    /// Money withdrawn per reroll. `0` means free.
    pub cost: f64,
    /// Rerolls allowed per reset cycle.
    pub max_count: u32,
    /// Keep completed tasks when rerolling.
    pub keep_completed: bool,
    /// When the per-player reroll count resets.
    pub reset: PeriodConfig,
}

impl Default for RerollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cost: 0.0,
            max_count: 3,
            keep_completed: true,
            reset: PeriodConfig {
                duration: "1d".to_owned(),
                ..PeriodConfig::default()
            },
        }
    }
}

/// Flat, string-friendly form of a [`PeriodPolicy`].
///
/// Only the fields relevant to `policy` are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodConfig {
    pub policy: PolicyKind,
    /// `"HH:MM"`, used by daily, weekly and monthly.
    pub reset_time: String,
    /// Weekday name, used by weekly.
    pub reset_day_of_week: String,
    /// Day of month, used by monthly. Clamped to the month length.
    pub reset_day_of_month: u32,
    /// `"7d"`, `"24h"`, ... used by relative.
    pub duration: String,
    /// RFC 3339 instants, used by fixed.
    pub fixed_start: Option<String>,
    pub fixed_end: Option<String>,
}

impl Default for PeriodConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Daily,
            reset_time: "04:00".to_owned(),
            reset_day_of_week: "monday".to_owned(),
            reset_day_of_month: 1,
            duration: "7d".to_owned(),
            fixed_start: None,
            fixed_end: None,
        }
    }
}

impl PeriodConfig {
    /// Validate and convert to a [`PeriodPolicy`].
    pub fn to_policy(&self) -> Result<PeriodPolicy> {
        Ok(match self.policy {
            PolicyKind::Daily => PeriodPolicy::Daily {
                reset_time: parse_time_of_day(&self.reset_time)?,
            },
            PolicyKind::Weekly => PeriodPolicy::Weekly {
                reset_day: self.reset_day_of_week.trim().parse::<Weekday>().map_err(|_| {
                    TaskError::Config(format!("invalid weekday '{}'", self.reset_day_of_week))
                })?,
                reset_time: parse_time_of_day(&self.reset_time)?,
            },
            PolicyKind::Monthly => {
                if !(1..=31).contains(&self.reset_day_of_month) {
                    return Err(TaskError::Config(format!(
                        "reset_day_of_month {} out of range 1..=31",
                        self.reset_day_of_month
                    )));
                }
                PeriodPolicy::Monthly {
                    reset_day: self.reset_day_of_month,
                    reset_time: parse_time_of_day(&self.reset_time)?,
                }
            }
            PolicyKind::Relative => PeriodPolicy::Relative {
                duration: parse_duration(&self.duration)?,
            },
            PolicyKind::Fixed => {
                let start = parse_instant(self.fixed_start.as_deref())?;
                let end = parse_instant(self.fixed_end.as_deref())?;
                if let (Some(start), Some(end)) = (start, end) {
                    if start > end {
                        return Err(TaskError::Config(format!(
                            "fixed window starts at {start} after it ends at {end}"
                        )));
                    }
                }
                PeriodPolicy::Fixed { start, end }
            }
            PolicyKind::Permanent => PeriodPolicy::Permanent,
        })
    }
}

fn parse_instant(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| TaskError::Config(format!("invalid instant '{s}': {e}"))),
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TaskError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TaskError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/questline/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("questline").join("config.toml")
        } else if let Some(dir) = dirs::config_dir() {
            dir.join("questline").join("config.toml")
        } else {
            PathBuf::from("/tmp/questline-config/config.toml")
        }
    }

    /// Database file, falling back to the platform data directory.
    pub fn database_path(&self) -> PathBuf {
        match &self.database.path {
            Some(path) => path.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("questline")
                .join("questline.db"),
        }
    }

    /// Resolved zone for cycle math.
    pub fn zone(&self) -> Result<FixedOffset> {
        resolve_zone(&self.timezone)
    }

    /// Validate every category and convert to runtime policies.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] on duplicate ids, a zero cap, or any
    /// unparseable period field.
    pub fn category_policies(&self) -> Result<Vec<CategoryPolicy>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            if !seen.insert(category.id.as_str()) {
                return Err(TaskError::Config(format!(
                    "duplicate category id '{}'",
                    category.id
                )));
            }
            out.push(CategoryPolicy::from_config(category)?);
        }
        Ok(out)
    }
}
