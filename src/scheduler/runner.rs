//! Maintenance background loop.
//!
//! Spawns a tokio task that wakes on a fixed tick, runs whichever jobs are
//! due against the shared [`Engine`], and keeps a short run history.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::engine::Engine;
use crate::scheduler::jobs::{JobKind, JobResult, MaintenanceJob, jobs_from_config};

/// Upper bound on the sleep between ticks.
const MAX_TICK: Duration = Duration::from_secs(60);

/// Number of run-history entries to keep.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One finished job run.
#[derive(Debug, Clone)]
pub struct JobRunRecord {
    pub kind: JobKind,
    pub elapsed: Duration,
    pub result: JobResult,
}

/// Runs the expiry sweep, template sync and retention cleanup.
pub struct MaintenanceRunner {
    engine: Arc<Engine>,
    jobs: Vec<MaintenanceJob>,
    retention_days: u32,
    history: VecDeque<JobRunRecord>,
    max_history_entries: usize,
}

impl MaintenanceRunner {
    pub fn new(engine: Arc<Engine>, config: &MaintenanceConfig) -> Self {
        Self {
            engine,
            jobs: jobs_from_config(config),
            retention_days: config.retention_days,
            history: VecDeque::new(),
            max_history_entries: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Override the history limit.
    pub fn with_history_limit(mut self, max_entries: usize) -> Self {
        self.max_history_entries = max_entries.max(1);
        self
    }

    pub fn jobs(&self) -> &[MaintenanceJob] {
        &self.jobs
    }

    pub fn history(&self) -> impl Iterator<Item = &JobRunRecord> {
        self.history.iter()
    }

    /// Sleep between ticks: the shortest job interval, capped.
    pub fn tick_interval(&self) -> Duration {
        self.jobs
            .iter()
            .map(|j| j.every)
            .min()
            .unwrap_or(MAX_TICK)
            .min(MAX_TICK)
            .max(Duration::from_secs(1))
    }

    /// Spawn the loop. It stops when `cancel` fires and returns the runner.
    pub fn spawn(mut self, cancel: CancellationToken) -> tokio::task::JoinHandle<Self> {
        tokio::spawn(async move {
            let tick = self.tick_interval();
            info!(
                jobs = self.jobs.len(),
                tick_secs = tick.as_secs(),
                "maintenance runner started"
            );
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("maintenance runner stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.run_due(Instant::now()).await;
                    }
                }
            }
            self
        })
    }

    /// Run every job due at `now`. Returns how many ran.
    pub async fn run_due(&mut self, now: Instant) -> usize {
        let due: Vec<usize> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.is_due(now))
            .map(|(i, _)| i)
            .collect();

        for &index in &due {
            let kind = self.jobs[index].kind;
            let started = Instant::now();
            let result = self.execute(kind).await;
            let elapsed = started.elapsed();

            let job = &mut self.jobs[index];
            job.record(now, &result);
            match &result {
                JobResult::Success(summary) => {
                    debug!(job = %kind, elapsed_ms = elapsed.as_millis() as u64, %summary, "maintenance job finished");
                }
                JobResult::Error(summary) => {
                    warn!(job = %kind, failures = job.failure_streak, %summary, "maintenance job failed");
                }
            }
            self.push_history(JobRunRecord {
                kind,
                elapsed,
                result,
            });
        }
        due.len()
    }

    async fn execute(&self, kind: JobKind) -> JobResult {
        match kind {
            JobKind::ExpirySweep => {
                let changed = self.engine.sweep().await;
                JobResult::Success(format!("{changed} players refreshed"))
            }
            JobKind::TemplateSync => match self.engine.sync_templates().await {
                Ok(report) => JobResult::Success(format!(
                    "{} added, {} updated, {} removed",
                    report.added.len(),
                    report.updated.len(),
                    report.removed.len()
                )),
                Err(e) => JobResult::Error(format!("template sync failed: {e}")),
            },
            JobKind::RetentionCleanup => {
                match self.engine.cleanup_retained(self.retention_days).await {
                    Ok(report) => JobResult::Success(format!(
                        "{} task rows, {} quota rows removed",
                        report.tasks, report.quotas
                    )),
                    Err(e) => JobResult::Error(format!("retention cleanup failed: {e}")),
                }
            }
        }
    }

    fn push_history(&mut self, run: JobRunRecord) {
        self.history.push_back(run);
        while self.history.len() > self.max_history_entries {
            self.history.pop_front();
        }
    }
}
