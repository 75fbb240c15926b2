//! Maintenance job definitions.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::MaintenanceConfig;

/// What a maintenance job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Refresh every online player's categories.
    ExpirySweep,
    /// Delta-sync the template catalog from the store.
    TemplateSync,
    /// Delete task and quota rows past the retention window.
    RetentionCleanup,
}

impl JobKind {
    pub fn id(self) -> &'static str {
        match self {
            Self::ExpirySweep => "expiry_sweep",
            Self::TemplateSync => "template_sync",
            Self::RetentionCleanup => "retention_cleanup",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success(String),
    Error(String),
}

impl JobResult {
    pub fn summary(&self) -> &str {
        match self {
            Self::Success(s) | Self::Error(s) => s,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// A job run on a fixed interval.
#[derive(Debug, Clone)]
pub struct MaintenanceJob {
    pub kind: JobKind,
    pub every: Duration,
    pub last_run: Option<Instant>,
    /// Consecutive failures, reset on success.
    pub failure_streak: u32,
}

impl MaintenanceJob {
    pub fn new(kind: JobKind, every: Duration) -> Self {
        Self {
            kind,
            every,
            last_run: None,
            failure_streak: 0,
        }
    }

    /// Due when never run, or when `every` has elapsed since the last run.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.every,
        }
    }

    pub fn record(&mut self, now: Instant, result: &JobResult) {
        self.last_run = Some(now);
        if result.is_error() {
            self.failure_streak = self.failure_streak.saturating_add(1);
        } else {
            self.failure_streak = 0;
        }
    }
}

/// Jobs enabled by `config`. A zero interval disables a job.
pub fn jobs_from_config(config: &MaintenanceConfig) -> Vec<MaintenanceJob> {
    let mut jobs = Vec::new();
    if config.sweep_interval_minutes > 0 {
        jobs.push(MaintenanceJob::new(
            JobKind::ExpirySweep,
            Duration::from_secs(config.sweep_interval_minutes * 60),
        ));
    }
    if config.template_sync_secs > 0 {
        jobs.push(MaintenanceJob::new(
            JobKind::TemplateSync,
            Duration::from_secs(config.template_sync_secs),
        ));
    }
    if config.retention_days > 0 && config.cleanup_interval_hours > 0 {
        jobs.push(MaintenanceJob::new(
            JobKind::RetentionCleanup,
            Duration::from_secs(config.cleanup_interval_hours * 3600),
        ));
    }
    jobs
}
