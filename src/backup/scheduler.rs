// Backup scheduler: cron-driven snapshot jobs with persisted outcomes.

use chrono::{DateTime, Utc};
use cron::Schedule;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{BackupStore, StoreError};
use crate::config::{BackupJobSpec, Config, ConfigTrait};
use crate::error::{ControllerError, Result};
use crate::model::{BackupOutcome, BackupRecord};
use crate::orchestrator::{JobHandle, JobSpec, JobState, Orchestrator, OrchestratorError};
use crate::registry::ControllerEvent;

const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_POLL: Duration = Duration::from_secs(5);

struct Job {
    spec: BackupJobSpec,
    schedule: Schedule,
    record: Mutex<BackupRecord>,
}

impl Job {
    fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    /// Moves the job to Pending unless it already is. The check and the
    /// transition happen under one lock so two triggers cannot both win.
    fn try_begin(&self, now: DateTime<Utc>) -> Option<BackupRecord> {
        let mut record = self.record.lock();
        if record.is_pending() {
            return None;
        }
        record.last_outcome = Some(BackupOutcome::Pending);
        record.last_run = Some(now);
        record.last_error = None;
        record.runs += 1;
        Some(record.clone())
    }
}

/// Runs configured backup jobs on their cron schedules.
///
/// At most one run per target is Pending at any time: a tick that finds its
/// job, or another job on the same target, still running is skipped and
/// counted. Outcomes are written to the
/// injected store after every transition; a failed run never stops the
/// schedule.
pub struct BackupScheduler {
    jobs: BTreeMap<String, Arc<Job>>,
    orchestrator: Arc<dyn Orchestrator>,
    store: Arc<dyn BackupStore>,
    events: broadcast::Sender<ControllerEvent>,
    /// Target service -> job currently running against it.
    in_flight: Mutex<HashMap<String, String>>,
    tick: Duration,
    poll: Duration,
}

impl BackupScheduler {
    pub fn new(
        cfg: &Config,
        orchestrator: Arc<dyn Orchestrator>,
        store: Arc<dyn BackupStore>,
        events: broadcast::Sender<ControllerEvent>,
    ) -> Result<Arc<Self>> {
        let (tick, poll, specs) = match cfg.backups() {
            Some(b) => (b.tick, b.poll_interval, b.jobs.clone()),
            None => (DEFAULT_TICK, DEFAULT_POLL, Vec::new()),
        };

        let mut jobs = BTreeMap::new();
        for spec in specs {
            let schedule = Schedule::from_str(&spec.schedule).map_err(|e| {
                ControllerError::Config(format!("backup job {}: {e}", spec.name))
            })?;
            let record = BackupRecord::new(spec.name.clone(), spec.target.clone(), spec.schedule.clone());
            let job = Job {
                spec,
                schedule,
                record: Mutex::new(record),
            };
            jobs.insert(job.spec.name.clone(), Arc::new(job));
        }

        Ok(Arc::new(Self {
            jobs,
            orchestrator,
            store,
            events,
            in_flight: Mutex::new(HashMap::new()),
            tick,
            poll,
        }))
    }

    /// Claims the job's target and moves the job to Pending. Fails with the
    /// name of the job already running against the same target.
    fn begin(&self, job: &Job, now: DateTime<Utc>) -> std::result::Result<BackupRecord, String> {
        let mut in_flight = self.in_flight.lock();
        if let Some(holder) = in_flight.get(&job.spec.target) {
            return Err(holder.clone());
        }
        let pending = job.try_begin(now).ok_or_else(|| job.spec.name.clone())?;
        in_flight.insert(job.spec.target.clone(), job.spec.name.clone());
        Ok(pending)
    }

    fn release(&self, job: &Job) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&job.spec.target) == Some(&job.spec.name) {
            in_flight.remove(&job.spec.target);
        }
    }

    fn job(&self, name: &str) -> Result<&Arc<Job>> {
        self.jobs
            .get(name)
            .ok_or_else(|| ControllerError::UnknownJob(name.to_string()))
    }

    pub fn records(&self) -> Vec<BackupRecord> {
        self.jobs.values().map(|job| job.record.lock().clone()).collect()
    }

    pub fn record(&self, name: &str) -> Result<BackupRecord> {
        Ok(self.job(name)?.record.lock().clone())
    }

    /// Loads last-run data from the store and schedules every job's next run
    /// after `now`. A run that was still Pending when the previous process
    /// died is recorded as a Failure. Returns how many records were restored.
    pub async fn restore(&self, now: DateTime<Utc>) -> std::result::Result<usize, StoreError> {
        let saved = self.store.load().await?;
        let mut restored = 0;
        let mut interrupted = Vec::new();

        for saved in saved {
            let Some(job) = self.jobs.get(&saved.job) else {
                warn!(component = "backup", job = %saved.job, "stored record for unknown job ignored");
                continue;
            };
            let mut record = job.record.lock();
            record.last_run = saved.last_run;
            record.last_outcome = saved.last_outcome;
            record.last_error = saved.last_error;
            record.runs = saved.runs;
            record.skipped = saved.skipped;
            if record.is_pending() {
                record.last_outcome = Some(BackupOutcome::Failure);
                record.last_error = Some("interrupted by controller restart".to_string());
                interrupted.push(record.clone());
            }
            restored += 1;
        }

        for job in self.jobs.values() {
            job.record.lock().next_run = job.next_after(now);
        }
        for record in interrupted {
            warn!(component = "backup", event = "interrupted", job = %record.job, "previous run did not finish");
            self.persist(&record).await;
        }

        info!(component = "backup", event = "restored", records = restored, jobs = self.jobs.len(), "backup schedule restored");
        Ok(restored)
    }

    /// Starts every job due at `now` and returns handles of the spawned runs.
    ///
    /// A job seen for the first time is only scheduled, not run.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Vec<JoinHandle<BackupOutcome>> {
        let mut runs = Vec::new();

        for job in self.jobs.values() {
            {
                let mut record = job.record.lock();
                let next_run = record.next_run;
                match next_run {
                    None => {
                        record.next_run = job.next_after(now);
                        continue;
                    }
                    Some(next) if next > now => continue,
                    Some(_) => record.next_run = job.next_after(now),
                }

                if record.is_pending() {
                    Self::skip(job, &mut record, &job.spec.name);
                    continue;
                }
            }

            match self.begin(job, now) {
                Ok(pending) => runs.push(self.spawn_run(job.clone(), pending)),
                Err(holder) => Self::skip(job, &mut job.record.lock(), &holder),
            }
        }
        runs
    }

    fn skip(job: &Job, record: &mut BackupRecord, holder: &str) {
        record.skipped += 1;
        metrics::counter!("stackctl_backup_skipped_total", "job" => job.spec.name.clone()).increment(1);
        warn!(
            component = "backup",
            event = "skipped",
            job = %job.spec.name,
            target = %job.spec.target,
            running = holder,
            skipped = record.skipped,
            "previous run still pending, tick skipped"
        );
    }

    /// Triggers `name` immediately, outside its schedule.
    pub fn run_now(self: &Arc<Self>, name: &str) -> Result<(BackupRecord, JoinHandle<BackupOutcome>)> {
        let job = self.job(name)?.clone();
        let pending = self
            .begin(&job, Utc::now())
            .map_err(ControllerError::JobAlreadyPending)?;
        let handle = self.spawn_run(job, pending.clone());
        Ok((pending, handle))
    }

    /// Ticks on the configured interval until shutdown.
    pub async fn serve(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(component = "backup", "backup scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(Utc::now());
                }
            }
        }
    }

    fn spawn_run(self: &Arc<Self>, job: Arc<Job>, pending: BackupRecord) -> JoinHandle<BackupOutcome> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.execute(job, pending).await })
    }

    async fn execute(self: Arc<Self>, job: Arc<Job>, pending: BackupRecord) -> BackupOutcome {
        let name = job.spec.name.clone();
        info!(component = "backup", event = "started", job = %name, target = %job.spec.target, "backup started");
        self.persist(&pending).await;

        let mut handle = None;
        let result = tokio::time::timeout(job.spec.timeout, self.run_job(&job.spec, &mut handle)).await;
        if result.is_err() {
            if let Some(handle) = handle {
                if let Err(e) = self.orchestrator.cancel_job(&handle).await {
                    warn!(component = "backup", job = %name, error = %e, "cannot cancel timed out job");
                }
            }
        }
        let (outcome, failure) = match result {
            Ok(Ok(())) => (BackupOutcome::Success, None),
            Ok(Err(e)) => (BackupOutcome::Failure, Some(e.to_string())),
            Err(_) => (
                BackupOutcome::Failure,
                Some(format!(
                    "timed out after {}",
                    humantime::format_duration(job.spec.timeout)
                )),
            ),
        };

        let finished = {
            let mut record = job.record.lock();
            record.last_outcome = Some(outcome);
            record.last_error = failure.clone();
            record.clone()
        };
        self.release(&job);
        self.persist(&finished).await;

        metrics::counter!(
            "stackctl_backups_total",
            "job" => name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        match &failure {
            None => info!(component = "backup", event = "finished", job = %name, outcome = outcome.as_str(), "backup finished"),
            Some(e) => error!(component = "backup", event = "finished", job = %name, outcome = outcome.as_str(), error = %e, "backup failed"),
        }
        let _ = self.events.send(ControllerEvent::BackupFinished { job: name, outcome });

        outcome
    }

    async fn run_job(
        &self,
        spec: &BackupJobSpec,
        started: &mut Option<JobHandle>,
    ) -> std::result::Result<(), OrchestratorError> {
        let handle = self
            .orchestrator
            .trigger_job(&JobSpec {
                name: spec.name.clone(),
                target: spec.target.clone(),
                command: spec.command.clone(),
            })
            .await?;
        *started = Some(handle.clone());

        loop {
            match self.orchestrator.job_status(&handle).await? {
                JobState::Running => tokio::time::sleep(self.poll).await,
                JobState::Succeeded => return Ok(()),
                JobState::Failed(reason) => {
                    return Err(OrchestratorError::new("backup job", spec.target.clone(), reason))
                }
            }
        }
    }

    async fn persist(&self, record: &BackupRecord) {
        if let Err(e) = self.store.save(record).await {
            warn!(component = "backup", job = %record.job, error = %e, "cannot persist backup record");
        }
    }
}
